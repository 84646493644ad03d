//! Bytetree - declarative binary structure parsing and serialization.
//!
//! This crate provides a unified interface to the bytetree crates.
//!
//! # Crates
//!
//! - [`bytetree_common`] - Byte source and sink, endianness
//! - [`bytetree_core`] (as `engine`) - Descriptors, field types, parse/serialize engine
//! - [`bytetree_defs`] - Built-in definitions and compression adapters
//!
//! # Example
//!
//! ```no_run
//! use bytetree::prelude::*;
//!
//! let format = bytetree::defs::find("wav")?;
//! let mut tag = Tag::from_file((format.definition)()?, "sound.wav", TagOptions::default())?;
//! let chunks = tag.tree().get_block(tag.root(), "chunks")?;
//! println!("chunks: {}", tag.tree().len(chunks));
//! tag.write_to_file("copy.wav")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use bytetree_common as common;
pub use bytetree_core as engine;
pub use bytetree_defs as defs;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use bytetree_common::{BinaryReader, BinaryWriter, Endian};
    pub use bytetree_core::builder::{
        array_desc, bit_struct_desc, bool_desc, container_desc, enum_desc, field, pad,
        stream_adapter_desc, struct_desc, switch_desc, union_desc, while_array_desc,
    };
    pub use bytetree_core::field_types;
    pub use bytetree_core::{
        AttrIndex, BlockTree, Case, CaseKey, DescRef, Descriptor, Key, Meta, NodeId,
        NullPointerPolicy, SizeOp, StreamCodec, Tag, TagOptions, Value,
    };
    pub use bytetree_defs::{ZlibAdapter, ZstdAdapter};
}

pub use bytetree_core::{Error, Result};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
