//! Common utilities for bytetree.
//!
//! This crate provides the byte-level collaborators every bytetree crate
//! builds on:
//!
//! - [`BinaryReader`] - Zero-copy reading from byte slices
//! - [`BinaryWriter`] - Seekable writing into a growable buffer
//! - [`Endian`] - Byte order of a field, including "native"

mod endian;
mod error;
mod reader;
mod writer;

pub use endian::Endian;
pub use error::{Error, Result};
pub use reader::BinaryReader;
pub use writer::BinaryWriter;
