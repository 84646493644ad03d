//! Error types for bytetree-common.

use thiserror::Error;

/// Common error type for byte source and sink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// A delimiter could not be located before the end of the buffer.
    #[error("could not locate delimiter {delimiter:02x?} after offset {start}")]
    DelimiterNotFound { delimiter: Vec<u8>, start: usize },

    /// Seek target lies beyond the end of the buffer.
    #[error("seek to {position} is out of range for a buffer of {len} bytes")]
    SeekOutOfRange { position: usize, len: usize },
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
