/*!
 * Allocation
 *
 * Buffer allocator facade and the control back-pointer buffers use to
 * re-allocate during growth.
 *
 * Four allocator variants exist: `heap` and `direct` allocate straight
 * from a memory manager; `pooled_heap` and `pooled_direct` route requests
 * through the arena pool. Every allocator hands out zero-filled buffers in
 * native byte order and exposes a constant-buffer supplier that shares one
 * frozen region across all the buffers it produces.
 */

pub mod pool;
mod unpooled;

pub use pool::config::PoolConfig;
pub use pool::{PoolStats, ArenaStats};

use crate::buffer::Buffer;
use crate::core::types::{BufferResult, ByteOrder, Size};
use crate::lifecycle::ArcDrop;
use crate::memory::{MemoryManager, MemoryManagers, Region};
use log::info;
use pool::PooledAllocator;
use std::fmt;
use std::sync::Arc;
use unpooled::ManagedAllocator;

/// Back-pointer from a buffer to the allocator that created it, used when
/// the buffer needs fresh backing memory (`ensure_writable`, `copy`).
pub trait AllocatorControl: Send + Sync + fmt::Debug {
    /// Allocate backing memory that is not yet attached to a buffer
    fn allocate_untethered(&self, size: Size) -> BufferResult<Untethered>;
}

/// Backing memory plus its release, not yet attached to a buffer
pub struct Untethered {
    pub(crate) region: Region,
    pub(crate) drop: ArcDrop,
}

#[derive(Clone, Debug)]
enum AllocatorKind {
    Managed(Arc<ManagedAllocator>),
    Pooled(Arc<PooledAllocator>),
}

/// Cheaply clonable allocator handle.
#[derive(Clone, Debug)]
pub struct BufferAllocator {
    kind: AllocatorKind,
}

impl BufferAllocator {
    /// On-heap allocator using the current memory-manager context
    pub fn heap() -> Self {
        Self::with_manager(MemoryManagers::current().heap_manager())
    }

    /// Off-heap allocator using the current memory-manager context
    pub fn direct() -> Self {
        Self::with_manager(MemoryManagers::current().native_manager())
    }

    /// Unpooled allocator over an explicit memory manager
    pub fn with_manager(manager: Arc<dyn MemoryManager>) -> Self {
        Self {
            kind: AllocatorKind::Managed(ManagedAllocator::new(manager)),
        }
    }

    /// Pooled on-heap allocator with default configuration
    pub fn pooled_heap() -> BufferResult<Self> {
        Self::pooled_with_config(
            MemoryManagers::current().heap_manager(),
            PoolConfig::default(),
        )
    }

    /// Pooled off-heap allocator with default configuration
    pub fn pooled_direct() -> BufferResult<Self> {
        Self::pooled_with_config(
            MemoryManagers::current().native_manager(),
            PoolConfig::default(),
        )
    }

    /// Pooled allocator over an explicit manager and configuration
    pub fn pooled_with_config(
        manager: Arc<dyn MemoryManager>,
        config: PoolConfig,
    ) -> BufferResult<Self> {
        let pooled = PooledAllocator::new(manager, config)?;
        info!(
            "Pooled allocator initialized: {} arenas, {} byte chunks",
            pooled.num_arenas(),
            pooled.chunk_size()
        );
        Ok(Self {
            kind: AllocatorKind::Pooled(pooled),
        })
    }

    /// Allocate a zero-filled buffer of `size` bytes in native byte order
    pub fn allocate(&self, size: Size) -> BufferResult<Buffer> {
        match &self.kind {
            AllocatorKind::Managed(managed) => managed.allocate(size),
            AllocatorKind::Pooled(pooled) => pooled.allocate(size),
        }
    }

    /// Allocate a zero-filled buffer with an explicit byte order
    pub fn allocate_with_order(&self, size: Size, order: ByteOrder) -> BufferResult<Buffer> {
        let mut buf = self.allocate(size)?;
        buf.set_order(order);
        Ok(buf)
    }

    /// A supplier of independently owned read-only buffers that all share
    /// one frozen region holding `bytes`.
    pub fn constant_supplier(&self, bytes: &[u8]) -> BufferResult<ConstBufferSupplier> {
        let mut parent = self.allocate(bytes.len())?;
        parent.write_bytes(bytes)?;
        parent.make_read_only();
        Ok(ConstBufferSupplier { parent })
    }

    /// Whether buffers from this allocator are native-backed
    pub fn is_native(&self) -> bool {
        match &self.kind {
            AllocatorKind::Managed(managed) => managed.manager().is_native(),
            AllocatorKind::Pooled(pooled) => pooled.is_native(),
        }
    }

    /// Close the allocator. Pooling stops and arenas drain; buffers already
    /// allocated keep working, and their chunks return to the OS once the
    /// last buffer on them closes.
    pub fn close(&self) {
        if let AllocatorKind::Pooled(pooled) = &self.kind {
            pooled.close();
        }
    }

    /// Give the current thread a cache with this pooled allocator even when
    /// `use_cache_for_all_threads` is off. No-op for unpooled allocators.
    pub fn enable_thread_cache_for_current(&self) {
        if let AllocatorKind::Pooled(pooled) = &self.kind {
            pooled.enable_thread_cache_for_current();
        }
    }

    /// Trim the current thread's cache, releasing cold entries back to the
    /// arena. Returns whether a cache existed. Intended to be driven by an
    /// external scheduler when `cache_trim_interval_millis` is configured.
    pub fn trim_current_thread_cache(&self) -> bool {
        match &self.kind {
            AllocatorKind::Managed(_) => false,
            AllocatorKind::Pooled(pooled) => pooled.trim_current_thread_cache(),
        }
    }

    /// Aggregated pool metrics; `None` for unpooled allocators
    pub fn pool_stats(&self) -> Option<PoolStats> {
        match &self.kind {
            AllocatorKind::Managed(_) => None,
            AllocatorKind::Pooled(pooled) => Some(pooled.stats()),
        }
    }

    /// Human-readable allocator status; may be expensive, do not call hot
    pub fn dump_stats(&self) -> String {
        match &self.kind {
            AllocatorKind::Managed(managed) => {
                format!("unpooled allocator over '{}'", managed.manager().implementation_name())
            }
            AllocatorKind::Pooled(pooled) => pooled.dump_stats(),
        }
    }

}

/// Produces independently owned, read-only buffers that share one
/// immutable region. Closing one buffer never affects the others; the
/// region is released when the supplier and every produced buffer are gone.
pub struct ConstBufferSupplier {
    parent: Buffer,
}

// SAFETY: the parent buffer is read-only and owned by the supplier, which
// never mutates it; producing a child only clones the shared release handle
// (atomic) and copies plain fields.
unsafe impl Send for ConstBufferSupplier {}
unsafe impl Sync for ConstBufferSupplier {}

impl ConstBufferSupplier {
    /// A fresh read-only buffer over the shared contents, fully readable
    pub fn get(&self) -> BufferResult<Buffer> {
        self.parent.const_child()
    }
}

impl fmt::Debug for ConstBufferSupplier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConstBufferSupplier[cap:{}]", self.parent.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::BufferError;

    #[test]
    fn test_allocate_is_zero_filled_and_native_order() {
        let allocator = BufferAllocator::heap();
        let buf = allocator.allocate(16).unwrap();
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.order(), ByteOrder::native());
        for i in 0..16 {
            assert_eq!(buf.get_u8(i).unwrap(), 0);
        }
    }

    #[test]
    fn test_zero_size_allocation_fails() {
        let allocator = BufferAllocator::heap();
        let result = allocator.allocate(0);
        assert!(matches!(result, Err(BufferError::AllocationFailure { .. })));
    }

    #[test]
    fn test_unwrap_and_recover_memory() {
        use crate::memory::MemoryManagerExt;

        let manager = MemoryManagers::current().heap_manager();
        let allocator = BufferAllocator::heap();
        let mut buf = allocator.allocate(8).unwrap();
        buf.write_u32(0xAABB_CCDD).unwrap();

        // Tear the buffer down to its region and release, then rebuild it.
        let (region, drop) = manager.unwrap_recoverable(buf).unwrap();
        let control: Arc<dyn AllocatorControl> = ManagedAllocator::new(Arc::clone(&manager));
        let recovered = manager.recover(control, region, drop);
        assert_eq!(recovered.capacity(), 8);
        assert_eq!(recovered.get_u32(0).unwrap(), 0xAABB_CCDD);
    }

    #[test]
    fn test_constant_supplier_shares_region() {
        let allocator = BufferAllocator::heap();
        let supplier = allocator.constant_supplier(&[1, 2, 3, 4]).unwrap();
        let mut a = supplier.get().unwrap();
        let b = supplier.get().unwrap();
        assert!(a.read_only());
        assert!(b.read_only());
        assert_eq!(a.readable_bytes(), 4);
        assert_eq!(a.read_u8().unwrap(), 1);
        // Cursors are independent.
        assert_eq!(b.get_u8(0).unwrap(), 1);
        assert_eq!(b.read_offset(), 0);
        // Writes are rejected.
        assert!(matches!(a.set_u8(0, 9), Err(BufferError::ReadOnly)));
    }
}
