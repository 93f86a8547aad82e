/*!
 * Limits
 * Capacity bounds and pool defaults
 */

use super::errors::BufferError;
use super::types::{BufferResult, Size};

/// Maximum capacity of a single buffer or composite (2^31 - 8 bytes).
/// Kept below i32::MAX so a contiguous copy of any buffer stays addressable.
pub const MAX_BUFFER_CAPACITY: Size = (i32::MAX - 8) as Size;

/// Smallest supported pool page size
pub const MIN_PAGE_SIZE: Size = 4096;

/// Largest supported chunk size (1 GiB)
pub const MAX_CHUNK_SIZE: Size = 1 << 30;

/// Largest supported buddy depth
pub const MAX_ORDER_LIMIT: u32 = 14;

/// Default pool page size
pub const DEFAULT_PAGE_SIZE: Size = 8192;

/// Default buddy depth (8192 << 9 = 4 MiB per chunk)
pub const DEFAULT_MAX_ORDER: u32 = 9;

/// Default per-class capacity of the small thread cache
pub const DEFAULT_SMALL_CACHE_SIZE: usize = 256;

/// Default per-class capacity of the normal thread cache
pub const DEFAULT_NORMAL_CACHE_SIZE: usize = 64;

/// Largest buffer capacity worth caching per thread (32 KiB, following
/// the guidance in "Scalable memory allocation using jemalloc")
pub const DEFAULT_MAX_CACHED_BUFFER_CAPACITY: Size = 32 * 1024;

/// Allocations between cache trim passes
pub const DEFAULT_CACHE_TRIM_INTERVAL: u64 = 8192;

/// Memory budget used to derive the default arena count (1 GiB)
pub const DEFAULT_MEMORY_BUDGET: Size = 1024 * 1024 * 1024;

/// Validate a requested buffer size against the library-wide capacity bounds
pub fn check_buffer_size(size: u64) -> BufferResult<()> {
    if size < 1 {
        return Err(BufferError::AllocationFailure {
            requested: size as usize,
            reason: "buffer size must be positive".into(),
        });
    }
    if size > MAX_BUFFER_CAPACITY as u64 {
        return Err(BufferError::AllocationFailure {
            requested: size as usize,
            reason: format!("buffer size cannot exceed {}", MAX_BUFFER_CAPACITY),
        });
    }
    Ok(())
}
