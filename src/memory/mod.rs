/*!
 * Memory Management
 *
 * Pluggable acquisition and release of raw byte regions.
 *
 * The manager interface is deliberately narrow and data-oriented: an opaque
 * [`Region`] handle plus a handful of operations. Buffer construction on top
 * of managed regions lives in [`MemoryManagerExt`], so concrete managers only
 * deal in memory. Managers are discovered through a process-wide registry
 * keyed by implementation name; allocators receive their managers through an
 * explicit [`MemoryManagers`] context, with a thread-scoped override retained
 * for call sites that cannot thread a context through.
 */

mod heap;
mod native;
mod region;

pub use heap::HeapMemory;
pub use native::NativeMemory;
pub use region::Region;

use crate::alloc::AllocatorControl;
use crate::buffer::Buffer;
use crate::core::types::{BufferResult, Size};
use crate::lifecycle::{ArcDrop, ReleaseAction};
use ahash::RandomState;
use dashmap::DashMap;
use log::info;
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Low-level provider of raw byte regions.
///
/// Implementations report whether their regions are native (off-heap) and
/// acquire/release regions of a requested size and alignment. Everything
/// else a buffer needs is layered on top, in [`MemoryManagerExt`].
pub trait MemoryManager: Send + Sync + fmt::Debug {
    /// Registry key for this implementation
    fn implementation_name(&self) -> &'static str;

    /// Whether regions from this manager are native-backed
    fn is_native(&self) -> bool;

    /// Acquire a zeroed region of exactly `size` bytes.
    /// `align` of 0 or 1 means no alignment requirement.
    fn allocate_region(&self, size: Size, align: Size) -> BufferResult<Region>;

    /// Release a region previously acquired from this manager.
    /// Called exactly once per region, by the drop protocol.
    fn release_region(&self, region: Region);

    /// Zero a region in place
    fn clear_region(&self, region: Region) {
        region.clear();
    }

    /// Produce a sub-view of a region; the parent stays the release unit
    fn slice_region(&self, region: Region, offset: Size, len: Size) -> Region {
        region.slice(offset, len)
    }
}

/// Buffer-producing operations layered over any [`MemoryManager`].
pub trait MemoryManagerExt {
    /// Allocate a region and wrap it in an owned buffer whose drop returns
    /// the region to this manager.
    fn allocate_shared(
        &self,
        control: Arc<dyn AllocatorControl>,
        size: Size,
        align: Size,
    ) -> BufferResult<Buffer>;

    /// Produce an independently owned read-only child over the shared
    /// region of a read-only parent.
    fn allocate_const_child(&self, parent: &Buffer) -> BufferResult<Buffer>;

    /// Reconstitute a buffer over an existing region and drop, e.g. when a
    /// pool hands out a recycled run.
    fn recover(
        &self,
        control: Arc<dyn AllocatorControl>,
        region: Region,
        drop: ArcDrop,
    ) -> Buffer;

    /// Tear a buffer down into its region and drop for recycling.
    /// Requires an owned, accessible buffer.
    fn unwrap_recoverable(&self, buf: Buffer) -> BufferResult<(Region, ArcDrop)>;
}

impl MemoryManagerExt for Arc<dyn MemoryManager> {
    fn allocate_shared(
        &self,
        control: Arc<dyn AllocatorControl>,
        size: Size,
        align: Size,
    ) -> BufferResult<Buffer> {
        let region = self.allocate_region(size, align)?;
        let drop = ArcDrop::new(ReleaseAction::Manager {
            manager: Arc::clone(self),
            region,
        });
        Ok(Buffer::from_parts(region, control, drop))
    }

    fn allocate_const_child(&self, parent: &Buffer) -> BufferResult<Buffer> {
        parent.const_child()
    }

    fn recover(
        &self,
        control: Arc<dyn AllocatorControl>,
        region: Region,
        drop: ArcDrop,
    ) -> Buffer {
        Buffer::from_parts(region, control, drop)
    }

    fn unwrap_recoverable(&self, buf: Buffer) -> BufferResult<(Region, ArcDrop)> {
        buf.into_recoverable()
    }
}

/// Explicit manager context: one heap manager and one native manager.
///
/// Allocator constructors take this context directly. A process-wide default
/// and a thread-scoped override exist for call sites that cannot thread a
/// context through.
#[derive(Clone, Debug)]
pub struct MemoryManagers {
    heap: Arc<dyn MemoryManager>,
    native: Arc<dyn MemoryManager>,
}

impl MemoryManagers {
    pub fn new(heap: Arc<dyn MemoryManager>, native: Arc<dyn MemoryManager>) -> Self {
        Self { heap, native }
    }

    /// The built-in heap/native manager pair
    pub fn defaults() -> Self {
        Self {
            heap: Arc::new(HeapMemory::new()),
            native: Arc::new(NativeMemory::new()),
        }
    }

    /// Manager for on-heap buffers
    pub fn heap_manager(&self) -> Arc<dyn MemoryManager> {
        Arc::clone(&self.heap)
    }

    /// Manager for off-heap buffers
    pub fn native_manager(&self) -> Arc<dyn MemoryManager> {
        Arc::clone(&self.native)
    }

    /// The managers active on the current thread: the innermost scoped
    /// override if one is installed, otherwise the process default.
    pub fn current() -> MemoryManagers {
        OVERRIDE.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(|| process_default().clone())
        })
    }

    /// Run `f` with `managers` active on the current thread.
    pub fn using<R>(managers: MemoryManagers, f: impl FnOnce() -> R) -> R {
        OVERRIDE.with(|stack| stack.borrow_mut().push(managers));
        struct PopOnExit;
        impl Drop for PopOnExit {
            fn drop(&mut self) {
                OVERRIDE.with(|stack| {
                    stack.borrow_mut().pop();
                });
            }
        }
        let _guard = PopOnExit;
        f()
    }
}

thread_local! {
    static OVERRIDE: RefCell<Vec<MemoryManagers>> = const { RefCell::new(Vec::new()) };
}

fn process_default() -> &'static MemoryManagers {
    static DEFAULT: OnceLock<MemoryManagers> = OnceLock::new();
    DEFAULT.get_or_init(MemoryManagers::defaults)
}

fn registry() -> &'static DashMap<&'static str, Arc<dyn MemoryManager>, RandomState> {
    static REGISTRY: OnceLock<DashMap<&'static str, Arc<dyn MemoryManager>, RandomState>> =
        OnceLock::new();
    REGISTRY.get_or_init(|| {
        let map: DashMap<&'static str, Arc<dyn MemoryManager>, RandomState> =
            DashMap::with_hasher(RandomState::new());
        let defaults = MemoryManagers::defaults();
        map.insert("heap", defaults.heap_manager());
        map.insert("native", defaults.native_manager());
        map
    })
}

/// Register a manager implementation under its name
pub fn register_manager(manager: Arc<dyn MemoryManager>) {
    let name = manager.implementation_name();
    info!("Registered memory manager implementation '{}'", name);
    registry().insert(name, manager);
}

/// Look up a registered manager implementation by name
pub fn lookup_manager(name: &str) -> Option<Arc<dyn MemoryManager>> {
    registry().get(name).map(|entry| Arc::clone(entry.value()))
}

/// Names of all registered manager implementations
pub fn available_managers() -> Vec<&'static str> {
    registry().iter().map(|entry| *entry.key()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_builtins() {
        let names = available_managers();
        assert!(names.contains(&"heap"));
        assert!(names.contains(&"native"));
        assert!(lookup_manager("heap").is_some());
        assert!(lookup_manager("missing").is_none());
    }

    #[test]
    fn test_scoped_override() {
        let custom = MemoryManagers::defaults();
        let custom_heap = custom.heap_manager();
        let seen = MemoryManagers::using(custom, || MemoryManagers::current().heap_manager());
        assert!(Arc::ptr_eq(&seen, &custom_heap));
        // Outside the scope the default is active again.
        let outer = MemoryManagers::current().heap_manager();
        assert!(!Arc::ptr_eq(&outer, &custom_heap));
    }
}
