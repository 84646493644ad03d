//! Error types for bytetree-defs.

use thiserror::Error;

/// Errors raised while looking up or using a built-in definition.
#[derive(Debug, Error)]
pub enum Error {
    /// Engine error.
    #[error(transparent)]
    Core(#[from] bytetree_core::Error),

    /// No built-in definition has this name.
    #[error("unknown format '{name}' (known: {known})")]
    UnknownFormat { name: String, known: String },
}

/// Result type for bytetree-defs operations.
pub type Result<T> = std::result::Result<T, Error>;
