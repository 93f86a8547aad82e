/*!
 * Core Types
 * Common types used across the buffer library
 */

use serde::{Deserialize, Serialize};

/// Size type for memory operations
pub type Size = usize;

/// Offset type for cursor and index positions
pub type Offset = usize;

/// Common result type for buffer operations
pub type BufferResult<T> = Result<T, super::errors::BufferError>;

/// Byte order used by multi-byte accessors.
///
/// Buffers default to the platform native order; every multi-byte accessor
/// consults the buffer's configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// The native byte order of the current platform
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Check whether this order matches the platform native order
    #[inline]
    pub fn is_native(self) -> bool {
        self == ByteOrder::native()
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::native()
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ByteOrder::BigEndian => write!(f, "BIG_ENDIAN"),
            ByteOrder::LittleEndian => write!(f, "LITTLE_ENDIAN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_order_matches_target() {
        #[cfg(target_endian = "little")]
        assert_eq!(ByteOrder::native(), ByteOrder::LittleEndian);
        #[cfg(target_endian = "big")]
        assert_eq!(ByteOrder::native(), ByteOrder::BigEndian);
    }

    #[test]
    fn test_is_native() {
        assert!(ByteOrder::native().is_native());
    }
}
