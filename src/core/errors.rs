/*!
 * Error Types
 * Centralized error handling with thiserror and serde support
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Buffer operation errors with serialization support.
///
/// Every failure is surfaced to the caller unchanged; there is no internal
/// retry and no silent recovery. Out-of-bounds messages carry the offending
/// index together with the buffer's read and write limits.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum BufferError {
    #[error("Index {index} is out of bounds: [read 0 to {read_limit}, write 0 to {write_limit}]")]
    IndexOutOfRange {
        index: usize,
        read_limit: usize,
        write_limit: usize,
    },

    #[error("This buffer is closed")]
    BufferClosed,

    #[error("This buffer is read-only")]
    ReadOnly,

    #[error("Buffer is not owned: only owned buffers can {0}")]
    NotOwned(String),

    #[error("Cannot compose buffers: {0}")]
    InvalidComposition(String),

    #[error("Allocation of {requested} bytes failed: {reason}")]
    AllocationFailure { requested: usize, reason: String },

    #[error("This transfer has already been received")]
    SendConsumed,

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BufferError {
    /// Shorthand for the out-of-bounds error used by accessor checks
    pub(crate) fn out_of_bounds(index: usize, read_limit: usize, write_limit: usize) -> Self {
        BufferError::IndexOutOfRange {
            index,
            read_limit,
            write_limit,
        }
    }

    /// Shorthand for ownership violations, named after the denied operation
    pub(crate) fn not_owned(operation: &str) -> Self {
        BufferError::NotOwned(operation.to_string())
    }
}
