//! Header codec error types.

use thiserror::Error;

/// Error decoding binary-encoded headers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeadersError {
    /// Input ended before a length prefix or payload was complete
    #[error("Truncated headers: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// Bytes left over after the declared number of entries
    #[error("Trailing bytes after headers: {0}")]
    TrailingBytes(usize),

    /// Header key is not valid UTF-8
    #[error("Header key is not valid UTF-8 at offset {0}")]
    InvalidKey(usize),

    /// A key or value is too long to be length-prefixed
    #[error("Header field too large: {0} bytes")]
    FieldTooLarge(usize),
}

/// Result type alias using HeadersError.
pub type HeadersResult<T> = Result<T, HeadersError>;
