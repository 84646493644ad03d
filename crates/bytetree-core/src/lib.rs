//! Descriptor-driven binary structure engine.
//!
//! A format is described by a tree of [`Descriptor`]s, each naming a
//! [`FieldType`] plus the size, pointer, and nesting rules of one field.
//! Parsing walks the descriptor over raw bytes and builds a [`BlockTree`];
//! serializing walks the tree and writes the bytes back.
//!
//! # Quick Start
//!
//! ```
//! use bytetree_core::builder::{array_desc, container_desc, field};
//! use bytetree_core::field_types::{UINT16, UINT8};
//! use bytetree_core::{Tag, TagOptions};
//!
//! let def = container_desc(
//!     "points",
//!     [field(&UINT8, "count"), array_desc("xs", ".count", field(&UINT16, "x"))],
//! )
//! .build()?;
//!
//! let mut tag = Tag::parse(def, &[2, 1, 0, 2, 0], TagOptions::default())?;
//! let root = tag.root();
//! let xs = tag.tree().get_block(root, "xs")?;
//! tag.tree_mut().append(xs, None)?;
//! assert_eq!(tag.tree().get_int(root, "count")?, 3);
//! assert_eq!(tag.serialize()?, [3, 1, 0, 2, 0, 0, 0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! - [`descriptor`] / [`builder`] - field descriptors and how to build them
//! - [`field_type`] / [`field_types`] - field kinds and the built-in registry
//! - [`codec`] - leaf byte/bit codecs
//! - [`block`] - the node arena and its access/mutation API
//! - [`parse`] / [`serialize`] - the traversal engine
//! - [`pointer`] - pointer layout before serialization
//! - [`tag`] - top-level handle with file I/O

pub mod block;
pub mod builder;
pub mod codec;
pub mod descriptor;
pub mod error;
#[cfg(feature = "json-export")]
pub mod export;
pub mod field_type;
pub mod field_types;
pub mod parse;
pub mod pointer;
pub mod serialize;
pub mod tag;
mod value;

pub use block::{AttrIndex, BlockTree, Key, Node, NodeId, NodeKind, SizeOp};
pub use builder::DescriptorBuilder;
pub use descriptor::{Case, DescRef, Descriptor, EnumOption, FieldContext, Meta, StreamCodec};
pub use error::{Error, FieldTrace, Frame, Phase, Result};
#[cfg(feature = "json-export")]
pub use export::to_json;
pub use field_type::{FieldType, Kind};
pub use pointer::{resolve_pointers, NullPointerPolicy};
pub use tag::{Tag, TagOptions};
pub use value::{CaseKey, Value};
