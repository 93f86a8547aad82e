/*!
 * Managed Allocator
 * Unpooled allocation straight from a memory manager
 */

use super::{AllocatorControl, Untethered};
use crate::buffer::Buffer;
use crate::core::limits;
use crate::core::types::{BufferResult, Size};
use crate::lifecycle::{ArcDrop, ReleaseAction};
use crate::memory::{MemoryManager, MemoryManagerExt};
use std::sync::Arc;

/// Allocator that services every request with a fresh region from its
/// memory manager. Closing it is a no-op; each buffer's drop returns its
/// region to the manager directly.
#[derive(Debug)]
pub(crate) struct ManagedAllocator {
    manager: Arc<dyn MemoryManager>,
}

impl ManagedAllocator {
    pub(crate) fn new(manager: Arc<dyn MemoryManager>) -> Arc<Self> {
        Arc::new(Self { manager })
    }

    pub(crate) fn manager(&self) -> &Arc<dyn MemoryManager> {
        &self.manager
    }

    pub(crate) fn allocate(self: &Arc<Self>, size: Size) -> BufferResult<Buffer> {
        limits::check_buffer_size(size as u64)?;
        let control: Arc<dyn AllocatorControl> = Arc::clone(self) as Arc<dyn AllocatorControl>;
        self.manager.allocate_shared(control, size, 0)
    }
}

impl AllocatorControl for ManagedAllocator {
    fn allocate_untethered(&self, size: Size) -> BufferResult<Untethered> {
        limits::check_buffer_size(size as u64)?;
        let region = self.manager.allocate_region(size, 0)?;
        let drop = ArcDrop::new(ReleaseAction::Manager {
            manager: Arc::clone(&self.manager),
            region,
        });
        Ok(Untethered { region, drop })
    }
}
