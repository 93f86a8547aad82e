/*!
 * Pool Configuration
 * Tunables for the arena pool, with validation
 */

use crate::core::errors::BufferError;
use crate::core::limits;
use crate::core::types::{BufferResult, Size};
use serde::{Deserialize, Serialize};

/// Configuration for a pooled allocator.
///
/// Defaults follow the jemalloc-derived tuning: 8 KiB pages in 4 MiB
/// chunks, per-thread caches of 256 small and 64 normal entries capped at
/// 32 KiB per buffer, trimmed every 8192 allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of arenas; threads spread over them to reduce lock contention.
    /// Zero disables pooling entirely (every request goes to the manager).
    pub num_arenas: usize,
    /// Page size in bytes; power of two, at least 4096
    pub page_size: Size,
    /// Buddy depth: chunk size is `page_size << max_order`, at most 2^30
    pub max_order: u32,
    /// Cached entries per small size class and thread
    pub small_cache_size: usize,
    /// Cached entries per normal size class and thread
    pub normal_cache_size: usize,
    /// Largest buffer capacity the thread cache will hold on to
    pub max_cached_buffer_capacity: Size,
    /// Allocations between cache trim passes
    pub cache_trim_interval: u64,
    /// Optional wall-clock trim period for an external scheduler driving
    /// `trim_current_thread_cache`
    pub cache_trim_interval_millis: Option<u64>,
    /// When non-zero, every allocation is aligned to this power of two.
    /// Requires a native memory manager.
    pub direct_memory_cache_alignment: Size,
    /// When off, only threads that explicitly opt in get a cache
    pub use_cache_for_all_threads: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_arenas: default_num_arenas(limits::DEFAULT_PAGE_SIZE << limits::DEFAULT_MAX_ORDER),
            page_size: limits::DEFAULT_PAGE_SIZE,
            max_order: limits::DEFAULT_MAX_ORDER,
            small_cache_size: limits::DEFAULT_SMALL_CACHE_SIZE,
            normal_cache_size: limits::DEFAULT_NORMAL_CACHE_SIZE,
            max_cached_buffer_capacity: limits::DEFAULT_MAX_CACHED_BUFFER_CAPACITY,
            cache_trim_interval: limits::DEFAULT_CACHE_TRIM_INTERVAL,
            cache_trim_interval_millis: None,
            direct_memory_cache_alignment: 0,
            use_cache_for_all_threads: false,
        }
    }
}

/// Default arena count: twice the CPU count, capped so that arenas at
/// three chunks apiece stay under half the memory budget.
pub fn default_num_arenas(chunk_size: Size) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let budget_cap = limits::DEFAULT_MEMORY_BUDGET / chunk_size / 2 / 3;
    (2 * cpus).min(budget_cap).max(1)
}

/// A validated configuration with the derived page shift and chunk size
#[derive(Debug, Clone)]
pub(crate) struct ValidatedConfig {
    pub num_arenas: usize,
    pub page_size: Size,
    pub page_shifts: u32,
    pub chunk_size: Size,
    pub max_order: u32,
    pub small_cache_size: usize,
    pub normal_cache_size: usize,
    pub max_cached_buffer_capacity: Size,
    pub cache_trim_interval: u64,
    pub alignment: Size,
    pub use_cache_for_all_threads: bool,
}

impl PoolConfig {
    pub(crate) fn validate(&self, manager_is_native: bool) -> BufferResult<ValidatedConfig> {
        let alignment = self.direct_memory_cache_alignment;
        if alignment > 0 {
            if !alignment.is_power_of_two() {
                return Err(BufferError::Configuration(format!(
                    "direct_memory_cache_alignment: {} (expected: power of two)",
                    alignment
                )));
            }
            if !manager_is_native {
                return Err(BufferError::Unsupported(
                    "buffer alignment requires a native memory manager".into(),
                ));
            }
        }

        // Bump the page size to a whole multiple of the alignment; with both
        // being powers of two this only matters when alignment > page_size.
        let page_size = if alignment > 0 {
            self.page_size.max(alignment)
        } else {
            self.page_size
        };
        if page_size < limits::MIN_PAGE_SIZE || !page_size.is_power_of_two() {
            return Err(BufferError::Configuration(format!(
                "page_size: {} (expected: power of two, at least {})",
                page_size,
                limits::MIN_PAGE_SIZE
            )));
        }

        if self.max_order > limits::MAX_ORDER_LIMIT {
            return Err(BufferError::Configuration(format!(
                "max_order: {} (expected: 0-{})",
                self.max_order,
                limits::MAX_ORDER_LIMIT
            )));
        }
        let chunk_size = page_size
            .checked_shl(self.max_order)
            .filter(|&c| c <= limits::MAX_CHUNK_SIZE)
            .ok_or_else(|| {
                BufferError::Configuration(format!(
                    "page_size ({}) << max_order ({}) must not exceed {}",
                    page_size,
                    self.max_order,
                    limits::MAX_CHUNK_SIZE
                ))
            })?;

        Ok(ValidatedConfig {
            num_arenas: self.num_arenas,
            page_size,
            page_shifts: page_size.trailing_zeros(),
            chunk_size,
            max_order: self.max_order,
            small_cache_size: self.small_cache_size,
            normal_cache_size: self.normal_cache_size,
            max_cached_buffer_capacity: self.max_cached_buffer_capacity,
            cache_trim_interval: self.cache_trim_interval,
            alignment,
            use_cache_for_all_threads: self.use_cache_for_all_threads,
        })
    }
}
