/*!
 * Pool Arena
 * Chunk usage lists, small subpage pools, and allocation metrics
 */

use super::chunk::{PoolChunk, PoolHandle, PoolSubpage};
use super::size_class::{round_up, SizeClass, SizeClasses};
use super::ArenaStats;
use crate::core::errors::BufferError;
use crate::core::types::{BufferResult, Size};
use crate::lifecycle::{ArcDrop, ReleaseAction};
use crate::memory::{MemoryManager, Region};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Chunk usage bins. Allocation prefers fuller bins for locality; a chunk
/// migrates as its usage crosses a bin's bounds. A chunk that empties out
/// of `q000` is destroyed; chunks parked in `q_init` are never destroyed.
const Q_INIT: usize = 0;
const Q000: usize = 1;
const Q025: usize = 2;
const Q050: usize = 3;
const Q075: usize = 4;
const Q100: usize = 5;

/// (min_usage, max_usage) per bin; a chunk moves forward at `usage >= max`
/// and backward at `usage < min`.
const LIST_BOUNDS: [(i32, i32); 6] = [
    (i32::MIN, 25), // q_init
    (1, 50),        // q000
    (25, 75),       // q025
    (50, 100),      // q050
    (75, 100),      // q075
    (100, i32::MAX),
];

/// Allocation attempt order over the bins: higher occupancy first
const ALLOC_ORDER: [usize; 5] = [Q050, Q025, Q000, Q_INIT, Q075];

/// What a pooled allocation resolved to; everything the release path needs
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolLease {
    pub chunk_slot: usize,
    pub handle: PoolHandle,
    pub offset: Size,
    /// Normalized (class) size actually reserved
    pub norm: Size,
    pub class: LeaseClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseClass {
    Small { index: usize },
    Normal { cache_index: usize },
}

#[derive(Default)]
struct ArenaMetrics {
    allocations_small: AtomicU64,
    allocations_normal: AtomicU64,
    allocations_huge: AtomicU64,
    deallocations: AtomicU64,
    active_bytes: AtomicU64,
}

struct ArenaInner {
    chunks: Vec<Option<PoolChunk>>,
    free_slots: Vec<usize>,
    /// Chunk slots per usage bin
    lists: [Vec<usize>; 6],
    /// Per small class: subpages (chunk slot, leaf index) with free slots
    small_pools: Vec<Vec<(usize, usize)>>,
}

/// One partition of the pool: a set of chunks plus size-class free lists.
/// All bookkeeping is mutex-guarded; thread caches front-run the mutex for
/// the hot path.
pub(crate) struct PoolArena {
    pub index: usize,
    manager: Arc<dyn MemoryManager>,
    pub page_size: Size,
    pub max_order: u32,
    pub chunk_size: Size,
    pub alignment: Size,
    pub size_classes: SizeClasses,
    inner: Mutex<ArenaInner>,
    /// Number of thread caches currently affinitised to this arena
    pub num_thread_caches: AtomicUsize,
    metrics: ArenaMetrics,
    closed: AtomicBool,
}

impl PoolArena {
    pub fn new(
        index: usize,
        manager: Arc<dyn MemoryManager>,
        page_size: Size,
        page_shifts: u32,
        max_order: u32,
        chunk_size: Size,
        alignment: Size,
    ) -> Self {
        let size_classes = SizeClasses::new(page_size, page_shifts, chunk_size);
        let small_pools = (0..size_classes.small_class_count())
            .map(|_| Vec::new())
            .collect();
        Self {
            index,
            manager,
            page_size,
            max_order,
            chunk_size,
            alignment,
            size_classes,
            inner: Mutex::new(ArenaInner {
                chunks: Vec::new(),
                free_slots: Vec::new(),
                lists: std::array::from_fn(|_| Vec::new()),
                small_pools,
            }),
            num_thread_caches: AtomicUsize::new(0),
            metrics: ArenaMetrics::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Normalize a request for alignment, then classify it
    pub fn classify(&self, size: Size) -> SizeClass {
        let size = if self.alignment > 0 {
            round_up(size, self.alignment)
        } else {
            size
        };
        self.size_classes.classify(size)
    }

    /// Allocate a pooled run or subpage element of `size` bytes.
    /// `size` must classify as Small or Normal for this arena.
    pub fn allocate(&self, size: Size) -> BufferResult<(Region, PoolLease)> {
        let class = self.classify(size);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let lease = match class {
            SizeClass::Small { index, elem_size } => {
                self.allocate_small(inner, index, elem_size)?
            }
            SizeClass::Normal { run_size } => self.allocate_normal(inner, run_size)?,
            SizeClass::Huge => {
                return Err(BufferError::AllocationFailure {
                    requested: size,
                    reason: "huge allocations are not pooled".into(),
                })
            }
        };
        let chunk = inner.chunks[lease.chunk_slot]
            .as_mut()
            .expect("leased chunk slot is occupied");
        chunk.in_use += 1;
        let region = chunk.region.slice(lease.offset, size);
        self.move_chunk_by_usage(inner, lease.chunk_slot);
        match lease.class {
            LeaseClass::Small { .. } => {
                self.metrics.allocations_small.fetch_add(1, Ordering::Relaxed)
            }
            LeaseClass::Normal { .. } => {
                self.metrics.allocations_normal.fetch_add(1, Ordering::Relaxed)
            }
        };
        self.metrics
            .active_bytes
            .fetch_add(lease.norm as u64, Ordering::Relaxed);
        Ok((region, lease))
    }

    fn allocate_small(
        &self,
        inner: &mut ArenaInner,
        index: usize,
        elem_size: Size,
    ) -> BufferResult<PoolLease> {
        // Head of the class pool first: a partially used subpage.
        while let Some(&(slot, leaf)) = inner.small_pools[index].last() {
            let chunk = match inner.chunks[slot].as_mut() {
                Some(chunk) => chunk,
                None => {
                    inner.small_pools[index].pop();
                    continue;
                }
            };
            let Some(subpage) = chunk.subpage_mut(leaf) else {
                inner.small_pools[index].pop();
                continue;
            };
            if subpage.class_index != index || subpage.num_avail() == 0 {
                inner.small_pools[index].pop();
                continue;
            }
            let leaf_id = subpage.leaf_id;
            debug_assert_eq!(subpage.elem_size, elem_size);
            let bitmap_idx = subpage.allocate().expect("subpage reported free slots");
            let exhausted = subpage.num_avail() == 0;
            let offset = chunk.run_offset(leaf_id) + bitmap_idx as Size * elem_size;
            if exhausted {
                inner.small_pools[index].pop();
            }
            return Ok(PoolLease {
                chunk_slot: slot,
                handle: PoolHandle {
                    memory_idx: leaf_id,
                    bitmap_idx: Some(bitmap_idx),
                },
                offset,
                norm: elem_size,
                class: LeaseClass::Small { index },
            });
        }

        // No usable subpage: carve a fresh leaf page into one.
        let (slot, leaf_id) = self.allocate_run(inner, self.max_order)?;
        let chunk = inner.chunks[slot].as_mut().expect("fresh run chunk");
        let leaf = chunk.leaf_index(leaf_id);
        let mut subpage = PoolSubpage::new(leaf_id, index, self.page_size, elem_size);
        let bitmap_idx = subpage.allocate().expect("fresh subpage has free slots");
        let has_more = subpage.num_avail() > 0;
        let offset = chunk.run_offset(leaf_id) + bitmap_idx as Size * elem_size;
        chunk.install_subpage(leaf, subpage);
        if has_more {
            inner.small_pools[index].push((slot, leaf));
        }
        Ok(PoolLease {
            chunk_slot: slot,
            handle: PoolHandle {
                memory_idx: leaf_id,
                bitmap_idx: Some(bitmap_idx),
            },
            offset,
            norm: elem_size,
            class: LeaseClass::Small { index },
        })
    }

    fn allocate_normal(&self, inner: &mut ArenaInner, run_size: Size) -> BufferResult<PoolLease> {
        let depth = self.size_classes.depth_for_run(self.max_order, run_size);
        let (slot, id) = self.allocate_run(inner, depth)?;
        let chunk = inner.chunks[slot].as_ref().expect("fresh run chunk");
        Ok(PoolLease {
            chunk_slot: slot,
            handle: PoolHandle {
                memory_idx: id,
                bitmap_idx: None,
            },
            offset: chunk.run_offset(id),
            norm: run_size,
            class: LeaseClass::Normal {
                cache_index: self.size_classes.normal_cache_index(run_size),
            },
        })
    }

    /// Find or create a chunk that can allocate a run at `depth`
    fn allocate_run(&self, inner: &mut ArenaInner, depth: u32) -> BufferResult<(usize, u32)> {
        for &list in &ALLOC_ORDER {
            // Iterate over a snapshot: a successful allocation moves the
            // chunk between lists.
            let candidates: Vec<usize> = inner.lists[list].clone();
            for slot in candidates {
                let Some(chunk) = inner.chunks[slot].as_mut() else {
                    continue;
                };
                if let Some(id) = chunk.allocate_run(depth) {
                    return Ok((slot, id));
                }
            }
        }

        // Nothing fits: acquire a fresh chunk from the manager.
        let region = self
            .manager
            .allocate_region(self.chunk_size, self.alignment)?;
        debug!(
            "Arena {} created a new {} byte chunk",
            self.index, self.chunk_size
        );
        let mut chunk = PoolChunk::new(region, self.max_order, self.chunk_size);
        let id = chunk
            .allocate_run(depth)
            .expect("fresh chunk satisfies any depth");
        chunk.list_id = Q_INIT;
        let slot = match inner.free_slots.pop() {
            Some(slot) => {
                inner.chunks[slot] = Some(chunk);
                slot
            }
            None => {
                inner.chunks.push(Some(chunk));
                inner.chunks.len() - 1
            }
        };
        inner.lists[Q_INIT].push(slot);
        Ok((slot, id))
    }

    /// Return a lease to the arena. Called on buffer close (directly or
    /// when a thread cache evicts the entry).
    pub fn free(&self, lease: PoolLease) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(chunk) = inner.chunks[lease.chunk_slot].as_mut() else {
            return;
        };
        match lease.handle.bitmap_idx {
            Some(bitmap_idx) => {
                let leaf = chunk.leaf_index(lease.handle.memory_idx);
                let class_index = match lease.class {
                    LeaseClass::Small { index } => index,
                    LeaseClass::Normal { .. } => unreachable!("subpage lease has a small class"),
                };
                let Some(subpage) = chunk.subpage_mut(leaf) else {
                    return;
                };
                let was_exhausted = subpage.num_avail() == 0;
                subpage.free(bitmap_idx);
                if subpage.num_avail() == subpage.max_elems() {
                    // Entirely free: hand the page back to the buddy.
                    chunk.remove_subpage(leaf);
                    chunk.free_run(lease.handle.memory_idx);
                    inner.small_pools[class_index]
                        .retain(|&(slot, l)| !(slot == lease.chunk_slot && l == leaf));
                } else if was_exhausted {
                    inner.small_pools[class_index].push((lease.chunk_slot, leaf));
                }
            }
            None => chunk.free_run(lease.handle.memory_idx),
        }
        chunk.in_use -= 1;
        self.metrics.deallocations.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .active_bytes
            .fetch_sub(lease.norm as u64, Ordering::Relaxed);

        if self.is_closed() {
            if inner.chunks[lease.chunk_slot]
                .as_ref()
                .map(|c| c.in_use == 0)
                .unwrap_or(false)
            {
                self.destroy_chunk(inner, lease.chunk_slot);
            }
            return;
        }
        self.move_chunk_by_usage(inner, lease.chunk_slot);
    }

    /// Region view for a lease handed back out of a thread cache.
    /// The chunk is guaranteed alive: cached leases count as in-use.
    pub fn cached_region(&self, lease: &PoolLease, size: Size) -> Option<Region> {
        let guard = self.inner.lock();
        guard.chunks[lease.chunk_slot]
            .as_ref()
            .map(|chunk| chunk.region.slice(lease.offset, size))
    }

    /// Unpooled allocation for requests beyond the chunk size; metrics are
    /// still attributed to this arena.
    pub fn allocate_huge(
        self: &Arc<Self>,
        size: Size,
    ) -> BufferResult<(Region, ArcDrop)> {
        let region = self.manager.allocate_region(size, self.alignment)?;
        self.metrics.allocations_huge.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .active_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
        let arena = Arc::clone(self);
        let manager = Arc::clone(&self.manager);
        let drop = ArcDrop::new(ReleaseAction::Custom(Box::new(move || {
            manager.release_region(region);
            arena.metrics.deallocations.fetch_add(1, Ordering::Relaxed);
            arena
                .metrics
                .active_bytes
                .fetch_sub(size as u64, Ordering::Relaxed);
        })));
        Ok((region, drop))
    }

    /// Reassign a chunk to the usage bin matching its occupancy, destroying
    /// chunks that empty out of `q000`.
    fn move_chunk_by_usage(&self, inner: &mut ArenaInner, slot: usize) {
        let Some(chunk) = inner.chunks[slot].as_ref() else {
            return;
        };
        let usage = chunk.usage() as i32;
        let mut list = chunk.list_id;
        while usage >= LIST_BOUNDS[list].1 {
            list = match list {
                Q_INIT => Q000,
                Q000 => Q025,
                Q025 => Q050,
                Q050 => Q075,
                Q075 => Q100,
                _ => break,
            };
        }
        while usage < LIST_BOUNDS[list].0 {
            list = match list {
                Q100 => Q075,
                Q075 => Q050,
                Q050 => Q025,
                Q025 => Q000,
                Q000 => {
                    // Below q000's floor means empty: release it to the OS.
                    self.remove_from_list(inner, slot);
                    self.destroy_chunk(inner, slot);
                    return;
                }
                _ => break,
            };
        }
        let current = inner.chunks[slot].as_ref().map(|c| c.list_id);
        if current != Some(list) {
            self.remove_from_list(inner, slot);
            inner.lists[list].push(slot);
            if let Some(chunk) = inner.chunks[slot].as_mut() {
                chunk.list_id = list;
            }
        }
    }

    fn remove_from_list(&self, inner: &mut ArenaInner, slot: usize) {
        let Some(list_id) = inner.chunks[slot].as_ref().map(|c| c.list_id) else {
            return;
        };
        if let Some(pos) = inner.lists[list_id].iter().position(|&s| s == slot) {
            inner.lists[list_id].swap_remove(pos);
        }
    }

    fn destroy_chunk(&self, inner: &mut ArenaInner, slot: usize) {
        self.remove_from_list(inner, slot);
        if let Some(chunk) = inner.chunks[slot].take() {
            debug_assert_eq!(chunk.in_use, 0);
            debug!(
                "Arena {} returned a {} byte chunk to the memory manager",
                self.index, self.chunk_size
            );
            self.manager.release_region(chunk.region);
            inner.free_slots.push(slot);
        }
    }

    /// Stop pooling: destroy every idle chunk. Chunks with outstanding
    /// allocations stay alive until their last buffer closes, then return
    /// to the OS instead of the arena.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let slots: Vec<usize> = (0..inner.chunks.len())
            .filter(|&slot| {
                inner.chunks[slot]
                    .as_ref()
                    .map(|c| c.in_use == 0)
                    .unwrap_or(false)
            })
            .collect();
        for slot in slots {
            self.destroy_chunk(inner, slot);
        }
        for pool in &mut inner.small_pools {
            pool.clear();
        }
    }

    /// Number of chunks currently held
    pub fn num_chunks(&self) -> usize {
        self.inner.lock().chunks.iter().filter(|c| c.is_some()).count()
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            index: self.index,
            allocations_small: self.metrics.allocations_small.load(Ordering::Relaxed),
            allocations_normal: self.metrics.allocations_normal.load(Ordering::Relaxed),
            allocations_huge: self.metrics.allocations_huge.load(Ordering::Relaxed),
            deallocations: self.metrics.deallocations.load(Ordering::Relaxed),
            active_bytes: self.metrics.active_bytes.load(Ordering::Relaxed),
            num_chunks: self.num_chunks(),
            num_thread_caches: self.num_thread_caches.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PoolArena {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "PoolArena[index:{}, chunk:{}, caches:{}]",
            self.index,
            self.chunk_size,
            self.num_thread_caches.load(Ordering::Relaxed)
        )
    }
}
