/*!
 * Thread Cache
 * Per-thread free-list caching of recently released pool leases
 */

use super::arena::{LeaseClass, PoolArena, PoolLease};
use super::config::ValidatedConfig;
use ahash::RandomState;
use log::debug;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A thread's affinity to one arena, with an optional hot cache.
///
/// The registry below is thread-local, which makes every cache strictly
/// single-threaded: the owning thread allocates from it and frees into it,
/// and a free from any other thread falls through to the arena mutex.
pub(crate) struct ThreadBinding {
    pub arena: Arc<PoolArena>,
    pub cache: Option<ThreadCache>,
}

impl ThreadBinding {
    fn teardown(mut self) {
        if let Some(mut cache) = self.cache.take() {
            cache.free_all(&self.arena);
            self.arena.num_thread_caches.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Per-class queues of released leases, served LIFO for locality.
pub(crate) struct ThreadCache {
    small: Vec<CacheBin>,
    normal: Vec<CacheBin>,
    allocations: u64,
    trim_interval: u64,
}

struct CacheBin {
    entries: Vec<PoolLease>,
    capacity: usize,
    /// Cache hits since the last trim; a bin colder than its own depth
    /// gives half of it back
    hits: usize,
}

impl CacheBin {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            hits: 0,
        }
    }
}

impl ThreadCache {
    pub fn new(arena: &PoolArena, config: &ValidatedConfig) -> Self {
        let small = (0..arena.size_classes.small_class_count())
            .map(|_| CacheBin::new(config.small_cache_size))
            .collect();
        let normal_classes = arena
            .size_classes
            .normal_cache_classes(config.max_cached_buffer_capacity);
        let normal = (0..normal_classes)
            .map(|_| CacheBin::new(config.normal_cache_size))
            .collect();
        Self {
            small,
            normal,
            allocations: 0,
            trim_interval: config.cache_trim_interval,
        }
    }

    fn bin_mut(&mut self, class: LeaseClass) -> Option<&mut CacheBin> {
        match class {
            LeaseClass::Small { index } => self.small.get_mut(index),
            LeaseClass::Normal { cache_index } => self.normal.get_mut(cache_index),
        }
    }

    /// Serve an allocation from the cache, if an entry of this class is hot
    pub fn allocate(&mut self, class: LeaseClass) -> Option<PoolLease> {
        let bin = self.bin_mut(class)?;
        let lease = bin.entries.pop()?;
        bin.hits += 1;
        Some(lease)
    }

    /// Park a released lease; hands it back when the bin has no room
    pub fn park(&mut self, lease: PoolLease) -> Result<(), PoolLease> {
        match self.bin_mut(lease.class) {
            Some(bin) if bin.entries.len() < bin.capacity => {
                bin.entries.push(lease);
                Ok(())
            }
            _ => Err(lease),
        }
    }

    /// Count an allocation; true when a trim pass is due
    pub fn bump_allocations(&mut self) -> bool {
        self.allocations += 1;
        if self.allocations >= self.trim_interval {
            self.allocations = 0;
            true
        } else {
            false
        }
    }

    /// Release half of every bin that saw fewer hits than it holds entries
    pub fn trim(&mut self, arena: &PoolArena) {
        let mut released = 0;
        for bin in self.small.iter_mut().chain(self.normal.iter_mut()) {
            if bin.hits < bin.entries.len() {
                let drop_count = (bin.entries.len() + 1) / 2;
                for lease in bin.entries.drain(..drop_count) {
                    arena.free(lease);
                    released += 1;
                }
            }
            bin.hits = 0;
        }
        if released > 0 {
            debug!(
                "Thread cache trim released {} entries to arena {}",
                released, arena.index
            );
        }
    }

    /// Drain every entry back to the arena (thread exit, allocator close)
    pub fn free_all(&mut self, arena: &PoolArena) {
        for bin in self.small.iter_mut().chain(self.normal.iter_mut()) {
            for lease in bin.entries.drain(..) {
                arena.free(lease);
            }
            bin.hits = 0;
        }
    }
}

#[derive(Default)]
struct BindingRegistry {
    map: HashMap<u64, ThreadBinding, RandomState>,
}

impl Drop for BindingRegistry {
    fn drop(&mut self) {
        // Thread exit: every cache drains back to its arena.
        for (_, binding) in self.map.drain() {
            binding.teardown();
        }
    }
}

thread_local! {
    static BINDINGS: RefCell<BindingRegistry> = RefCell::new(BindingRegistry::default());
    /// Allocator ids this thread opted into caching for, used when
    /// `use_cache_for_all_threads` is off
    static CACHE_OPT_IN: RefCell<HashSet<u64, RandomState>> =
        RefCell::new(HashSet::default());
}

/// Whether the current thread opted into caching for this allocator
pub(crate) fn thread_opted_in(allocator_id: u64) -> bool {
    CACHE_OPT_IN
        .try_with(|set| set.borrow().contains(&allocator_id))
        .unwrap_or(false)
}

pub(crate) fn opt_in_current_thread(allocator_id: u64) {
    let _ = CACHE_OPT_IN.try_with(|set| set.borrow_mut().insert(allocator_id));
}

/// Run `f` with the current thread's binding for this allocator, creating
/// the binding through `init` on first use.
pub(crate) fn with_binding<R>(
    allocator_id: u64,
    init: impl FnOnce() -> ThreadBinding,
    f: impl FnOnce(&mut ThreadBinding) -> R,
) -> R {
    BINDINGS.with(|registry| {
        let mut registry = registry.borrow_mut();
        let binding = registry.map.entry(allocator_id).or_insert_with(init);
        f(binding)
    })
}

/// Run `f` with the binding only if it already exists on this thread
pub(crate) fn with_existing_binding<R>(
    allocator_id: u64,
    f: impl FnOnce(&mut ThreadBinding) -> R,
) -> Option<R> {
    BINDINGS
        .try_with(|registry| {
            let mut registry = registry.borrow_mut();
            registry.map.get_mut(&allocator_id).map(f)
        })
        .ok()
        .flatten()
}

/// Remove and tear down the current thread's binding for one allocator
pub(crate) fn drop_binding(allocator_id: u64) {
    let binding = BINDINGS
        .try_with(|registry| registry.borrow_mut().map.remove(&allocator_id))
        .ok()
        .flatten();
    if let Some(binding) = binding {
        binding.teardown();
    }
}

/// Release path for pooled leases. Frees into the owning thread's cache
/// when one exists and the arena is still pooling; everything else goes
/// straight to the arena under its lock.
pub(crate) fn release_lease(arena: &Arc<PoolArena>, allocator_id: u64, lease: PoolLease) {
    if !arena.is_closed() {
        let parked = with_existing_binding(allocator_id, |binding| {
            if !Arc::ptr_eq(&binding.arena, arena) {
                return Err(lease);
            }
            match binding.cache.as_mut() {
                Some(cache) => cache.park(lease),
                None => Err(lease),
            }
        });
        match parked {
            Some(Ok(())) => return,
            Some(Err(lease)) => {
                arena.free(lease);
                return;
            }
            None => {}
        }
    }
    arena.free(lease);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::pool::config::PoolConfig;
    use crate::memory::HeapMemory;

    fn test_setup() -> (Arc<PoolArena>, ThreadCache) {
        let config = PoolConfig {
            num_arenas: 1,
            page_size: 4096,
            max_order: 4,
            small_cache_size: 4,
            normal_cache_size: 2,
            cache_trim_interval: 8,
            ..PoolConfig::default()
        }
        .validate(false)
        .unwrap();
        let arena = Arc::new(PoolArena::new(
            0,
            Arc::new(HeapMemory::new()),
            config.page_size,
            config.page_shifts,
            config.max_order,
            config.chunk_size,
            0,
        ));
        let cache = ThreadCache::new(&arena, &config);
        (arena, cache)
    }

    #[test]
    fn test_park_and_reallocate() {
        let (arena, mut cache) = test_setup();
        let (_, lease) = arena.allocate(64).unwrap();
        assert!(cache.park(lease).is_ok());
        let recycled = cache.allocate(lease.class).unwrap();
        assert_eq!(recycled.handle, lease.handle);
        arena.free(recycled);
    }

    #[test]
    fn test_full_bin_hands_the_lease_back() {
        let (arena, mut cache) = test_setup();
        let leases: Vec<PoolLease> = (0..5)
            .map(|_| arena.allocate(64).unwrap().1)
            .collect();
        let mut overflow = Vec::new();
        for lease in leases {
            if let Err(rejected) = cache.park(lease) {
                overflow.push(rejected);
            }
        }
        // Bin capacity is 4; the fifth lease bounced.
        assert_eq!(overflow.len(), 1);
        for lease in overflow {
            arena.free(lease);
        }
        cache.free_all(&arena);
        assert_eq!(arena.stats().active_bytes, 0);
    }

    #[test]
    fn test_trim_releases_half_of_cold_bins() {
        let (arena, mut cache) = test_setup();
        for _ in 0..4 {
            let (_, lease) = arena.allocate(64).unwrap();
            cache.park(lease).unwrap();
        }
        let before = arena.stats().deallocations;
        cache.trim(&arena);
        // Cold bin (no hits): half of the four entries went back.
        assert_eq!(arena.stats().deallocations, before + 2);
        cache.free_all(&arena);
    }

    #[test]
    fn test_hot_bin_survives_trim() {
        let (arena, mut cache) = test_setup();
        for _ in 0..2 {
            let (_, lease) = arena.allocate(64).unwrap();
            cache.park(lease).unwrap();
        }
        // Two hits on the bin: as hot as it is deep.
        let a = cache.allocate(LeaseClass::Small { index: 3 }).unwrap();
        let b = cache.allocate(LeaseClass::Small { index: 3 }).unwrap();
        cache.park(a).unwrap();
        cache.park(b).unwrap();
        let before = arena.stats().deallocations;
        cache.trim(&arena);
        assert_eq!(arena.stats().deallocations, before);
        cache.free_all(&arena);
    }

    #[test]
    fn test_bump_allocations_triggers_on_interval() {
        let (_, mut cache) = test_setup();
        for _ in 0..7 {
            assert!(!cache.bump_allocations());
        }
        assert!(cache.bump_allocations());
        // Counter reset after the trigger.
        assert!(!cache.bump_allocations());
    }
}
