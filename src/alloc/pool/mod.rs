/*!
 * Pooled Allocator
 *
 * Arena-based, thread-local-cached, size-classed allocation.
 *
 * Requests below a page split leaf pages into bitmap-tracked subpage
 * elements; requests up to a chunk take buddy runs of whole pages;
 * anything larger bypasses the pool and goes straight to the memory
 * manager. Each thread binds to the arena with the fewest attached caches
 * and, when caching is enabled for it, parks released leases in
 * thread-local free lists that are trimmed when they run cold.
 */

pub mod config;

mod arena;
mod chunk;
mod size_class;
mod thread_cache;

use crate::alloc::{AllocatorControl, Untethered};
use crate::buffer::Buffer;
use crate::core::limits;
use crate::core::types::{BufferResult, Size};
use crate::lifecycle::{ArcDrop, ReleaseAction};
use crate::memory::{MemoryManager, Region};
use arena::PoolArena;
use config::{PoolConfig, ValidatedConfig};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use size_class::SizeClass;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thread_cache::{ThreadBinding, ThreadCache};

/// Metrics for one arena
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaStats {
    pub index: usize,
    pub allocations_small: u64,
    pub allocations_normal: u64,
    pub allocations_huge: u64,
    pub deallocations: u64,
    pub active_bytes: u64,
    pub num_chunks: usize,
    pub num_thread_caches: usize,
}

/// Aggregated metrics for a pooled allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub num_arenas: usize,
    pub page_size: Size,
    pub chunk_size: Size,
    pub num_thread_caches: usize,
    pub active_bytes: u64,
    pub arenas: Vec<ArenaStats>,
}

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Arena-pooled allocator. Shared behind an `Arc`; buffers keep their
/// arena alive through the release closure in their drop.
pub(crate) struct PooledAllocator {
    id: u64,
    manager: Arc<dyn MemoryManager>,
    config: ValidatedConfig,
    arenas: Vec<Arc<PoolArena>>,
    closed: AtomicBool,
    /// Serializes arena selection so concurrent first allocations spread
    /// threads evenly over the arenas
    binding_lock: Mutex<()>,
    /// Back-reference to the owning Arc, for the control trait's re-entry
    /// into the allocation path
    self_ref: Weak<PooledAllocator>,
}

impl PooledAllocator {
    pub(crate) fn new(
        manager: Arc<dyn MemoryManager>,
        config: PoolConfig,
    ) -> BufferResult<Arc<Self>> {
        let validated = config.validate(manager.is_native())?;
        let arenas = (0..validated.num_arenas)
            .map(|index| {
                Arc::new(PoolArena::new(
                    index,
                    Arc::clone(&manager),
                    validated.page_size,
                    validated.page_shifts,
                    validated.max_order,
                    validated.chunk_size,
                    validated.alignment,
                ))
            })
            .collect();
        Ok(Arc::new_cyclic(|self_ref| Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            manager,
            config: validated,
            arenas,
            closed: AtomicBool::new(false),
            binding_lock: Mutex::new(()),
            self_ref: self_ref.clone(),
        }))
    }

    pub(crate) fn num_arenas(&self) -> usize {
        self.arenas.len()
    }

    pub(crate) fn chunk_size(&self) -> Size {
        self.config.chunk_size
    }

    pub(crate) fn is_native(&self) -> bool {
        self.manager.is_native()
    }

    /// Allocate a zero-filled pooled buffer
    pub(crate) fn allocate(self: &Arc<Self>, size: Size) -> BufferResult<Buffer> {
        let (region, drop) = self.allocate_parts(size)?;
        let control = Arc::clone(self) as Arc<dyn AllocatorControl>;
        let mut buf = Buffer::from_parts(region, control, drop);
        // Pooled runs are recycled dirty.
        buf.fill(0)?;
        Ok(buf)
    }

    fn allocate_parts(self: &Arc<Self>, size: Size) -> BufferResult<(Region, ArcDrop)> {
        limits::check_buffer_size(size as u64)?;

        // Pooling disabled entirely: plain manager allocation.
        if self.arenas.is_empty() || self.closed.load(Ordering::Acquire) {
            return self.allocate_unpooled(size);
        }

        let arena = self.bound_arena();
        let class = arena.classify(size);
        if class == SizeClass::Huge {
            return arena.allocate_huge(size);
        }

        let lease_class = match class {
            SizeClass::Small { index, .. } => arena::LeaseClass::Small { index },
            SizeClass::Normal { run_size } => arena::LeaseClass::Normal {
                cache_index: arena.size_classes.normal_cache_index(run_size),
            },
            SizeClass::Huge => unreachable!(),
        };

        // Hot path: the current thread's cache.
        let cached = thread_cache::with_existing_binding(self.id, |binding| {
            let cache = binding.cache.as_mut()?;
            if cache.bump_allocations() {
                cache.trim(&binding.arena);
            }
            cache.allocate(lease_class)
        })
        .flatten();

        let (region, lease) = match cached {
            Some(lease) => {
                let region = arena
                    .cached_region(&lease, size)
                    .expect("cached lease chunk is alive");
                (region, lease)
            }
            None => arena.allocate(size)?,
        };

        let release_arena = Arc::clone(&arena);
        let allocator_id = self.id;
        let drop = ArcDrop::new(ReleaseAction::Custom(Box::new(move || {
            thread_cache::release_lease(&release_arena, allocator_id, lease);
        })));
        Ok((region, drop))
    }

    fn allocate_unpooled(&self, size: Size) -> BufferResult<(Region, ArcDrop)> {
        let region = self.manager.allocate_region(size, self.config.alignment)?;
        let drop = ArcDrop::new(ReleaseAction::Manager {
            manager: Arc::clone(&self.manager),
            region,
        });
        Ok((region, drop))
    }

    /// The arena this thread is pinned to, pinning it on first use to the
    /// arena with the fewest attached thread caches (ties by index).
    fn bound_arena(&self) -> Arc<PoolArena> {
        thread_cache::with_binding(
            self.id,
            || self.new_binding(),
            |binding| Arc::clone(&binding.arena),
        )
    }

    fn new_binding(&self) -> ThreadBinding {
        let _guard = self.binding_lock.lock();
        let arena = self
            .arenas
            .iter()
            .min_by_key(|a| a.num_thread_caches.load(Ordering::Acquire))
            .expect("at least one arena exists")
            .clone();
        let cache = if self.config.use_cache_for_all_threads
            || thread_cache::thread_opted_in(self.id)
        {
            arena.num_thread_caches.fetch_add(1, Ordering::AcqRel);
            Some(ThreadCache::new(&arena, &self.config))
        } else {
            None
        };
        debug!(
            "Thread bound to arena {} (cache: {})",
            arena.index,
            cache.is_some()
        );
        ThreadBinding { arena, cache }
    }

    /// Opt the current thread into caching with this allocator and bind it
    /// eagerly.
    pub(crate) fn enable_thread_cache_for_current(&self) {
        if self.arenas.is_empty() {
            return;
        }
        thread_cache::opt_in_current_thread(self.id);
        thread_cache::with_binding(
            self.id,
            || self.new_binding(),
            |binding| {
                if binding.cache.is_none() {
                    binding
                        .arena
                        .num_thread_caches
                        .fetch_add(1, Ordering::AcqRel);
                    binding.cache = Some(ThreadCache::new(&binding.arena, &self.config));
                }
            },
        );
    }

    /// Trim the current thread's cache now; true when a cache existed
    pub(crate) fn trim_current_thread_cache(&self) -> bool {
        thread_cache::with_existing_binding(self.id, |binding| {
            let arena = Arc::clone(&binding.arena);
            match binding.cache.as_mut() {
                Some(cache) => {
                    cache.trim(&arena);
                    true
                }
                None => false,
            }
        })
        .unwrap_or(false)
    }

    /// Stop pooling. The current thread's cache drains; other threads'
    /// caches drain on their exit, and in-flight buffers keep their chunks
    /// alive until closed.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        thread_cache::drop_binding(self.id);
        for arena in &self.arenas {
            arena.close();
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let arenas: Vec<ArenaStats> = self.arenas.iter().map(|a| a.stats()).collect();
        PoolStats {
            num_arenas: arenas.len(),
            page_size: self.config.page_size,
            chunk_size: self.config.chunk_size,
            num_thread_caches: arenas.iter().map(|a| a.num_thread_caches).sum(),
            active_bytes: arenas.iter().map(|a| a.active_bytes).sum(),
            arenas,
        }
    }

    pub(crate) fn dump_stats(&self) -> String {
        let stats = self.stats();
        let mut out = format!("{} arena(s):\n", stats.num_arenas);
        for arena in &stats.arenas {
            let _ = writeln!(
                out,
                "  arena {}: chunks {}, active {} B, alloc {}/{}/{} (small/normal/huge), freed {}, caches {}",
                arena.index,
                arena.num_chunks,
                arena.active_bytes,
                arena.allocations_small,
                arena.allocations_normal,
                arena.allocations_huge,
                arena.deallocations,
                arena.num_thread_caches,
            );
        }
        out
    }
}

impl AllocatorControl for PooledAllocator {
    fn allocate_untethered(&self, size: Size) -> BufferResult<Untethered> {
        let this = self
            .self_ref
            .upgrade()
            .expect("control is reached through a live Arc");
        let (region, drop) = this.allocate_parts(size)?;
        Ok(Untethered { region, drop })
    }
}

impl std::fmt::Debug for PooledAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "PooledAllocator[id:{}, arenas:{}, chunk:{}]",
            self.id,
            self.arenas.len(),
            self.config.chunk_size
        )
    }
}
