use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Primary error type for handex store operations.
///
/// Structured variants for the failures a caller can act on; lock contention
/// below the configured deadline is retried internally and never surfaces.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandexError {
    /// Every candidate row is full and the bit width cannot grow further.
    ///
    /// Only reachable in the short store once the bit width has hit its
    /// maximum and all four candidate rows for a handex are at capacity, or
    /// in the wide store when a single row saturates at the maximum width.
    #[error("store out of capacity at bit width {bit_width}")]
    OutOfCapacity { bit_width: u8 },

    /// A strict accessor was given a handle that does not address a live slot.
    #[error("invalid handle {handle:#x}: {fault}")]
    InvalidHandle { handle: u64, fault: HandleFault },

    /// Lock acquisition exceeded the caller's deadline. The store is
    /// unchanged; the operation may be retried.
    #[error("lock acquisition timed out after {waited:?}")]
    LockTimeout { waited: Duration },
}

/// Why a handle failed strict validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleFault {
    /// The handle is the null sentinel.
    Null,
    /// The row part exceeds the current row count.
    RowOutOfRange,
    /// The index part exceeds the row's fill.
    IndexOutOfRange,
    /// The slot was vacated by an enlargement move and holds no value.
    Vacant,
}

impl fmt::Display for HandleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null sentinel"),
            Self::RowOutOfRange => f.write_str("row exceeds current row count"),
            Self::IndexOutOfRange => f.write_str("index exceeds row fill"),
            Self::Vacant => f.write_str("slot is vacant"),
        }
    }
}

impl HandexError {
    /// Create an `InvalidHandle` error for a raw handle value.
    #[must_use]
    pub const fn invalid_handle(handle: u64, fault: HandleFault) -> Self {
        Self::InvalidHandle { handle, fault }
    }

    /// Whether this is a transient error that may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Result type alias using [`HandexError`].
pub type Result<T> = std::result::Result<T, HandexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HandexError::OutOfCapacity { bit_width: 24 };
        assert_eq!(err.to_string(), "store out of capacity at bit width 24");
    }

    #[test]
    fn invalid_handle_display() {
        let err = HandexError::invalid_handle(0xFF00, HandleFault::RowOutOfRange);
        assert_eq!(
            err.to_string(),
            "invalid handle 0xff00: row exceeds current row count"
        );
    }

    #[test]
    fn is_transient() {
        assert!(
            HandexError::LockTimeout {
                waited: Duration::from_millis(5)
            }
            .is_transient()
        );
        assert!(!HandexError::OutOfCapacity { bit_width: 31 }.is_transient());
        assert!(!HandexError::invalid_handle(1, HandleFault::Vacant).is_transient());
    }
}
