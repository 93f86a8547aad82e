/*!
 * membuf
 *
 * Ownership-carrying byte buffers for network and I/O code.
 *
 * A [`Buffer`] is a seekable, typed, endian-aware view over a contiguous
 * byte region with separate read and write cursors. Ownership is explicit:
 * buffers move, split into disjoint owned halves, transfer between threads
 * through one-shot [`SendToken`]s, and freeze into read-only views.
 * [`CompositeBuffer`] concatenates buffers without copying, and
 * [`BufferAllocator`] serves them from plain managers or from an
 * arena-based pool with per-thread caches.
 */

pub mod alloc;
pub mod buffer;
pub mod core;
pub mod lifecycle;
pub mod memory;

pub use crate::alloc::{ArenaStats, BufferAllocator, ConstBufferSupplier, PoolConfig, PoolStats};
pub use crate::buffer::{
    Buffer, ByteCursor, CompositeBuffer, ReadableComponent, ReverseByteCursor, SendToken,
    WritableComponent,
};
pub use crate::core::{BufferError, BufferResult, ByteOrder};
pub use crate::memory::{MemoryManager, MemoryManagers, Region};
