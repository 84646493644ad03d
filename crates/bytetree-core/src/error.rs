//! Error types for bytetree-core.

use std::fmt;

use thiserror::Error;

use crate::block::{AttrIndex, BlockTree, NodeId};
use crate::descriptor::Descriptor;

/// Which traversal produced a [`FieldTrace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Serialize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Parse => write!(f, "parse"),
            Phase::Serialize => write!(f, "serialize"),
        }
    }
}

/// One breadcrumb of a failed traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Name of the field being processed.
    pub name: String,
    /// Name of its field type.
    pub field_type: &'static str,
    /// Name of the enclosing block, if any.
    pub parent: Option<String>,
    /// Slot of the field within its parent.
    pub attr_index: Option<AttrIndex>,
    /// Absolute offset (root offset included) where the field started.
    pub offset: usize,
}

impl Frame {
    /// Breadcrumb for a field about to be parsed or serialized.
    pub(crate) fn at(
        desc: &Descriptor,
        tree: &BlockTree,
        parent: Option<NodeId>,
        attr_index: Option<AttrIndex>,
        offset: usize,
    ) -> Self {
        Self {
            name: desc.name.clone(),
            field_type: desc.field_type.name,
            parent: parent.map(|p| tree.name(p).to_owned()),
            attr_index,
            offset,
        }
    }

    fn same_site(&self, other: &Frame) -> bool {
        self.parent == other.parent
            && self.field_type == other.field_type
            && self.attr_index == other.attr_index
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "    {}, index:", self.name)?;
        match self.attr_index {
            Some(index) => write!(f, "{}", index)?,
            None => write!(f, "None")?,
        }
        write!(f, ", offset:{}, field_type:{}", self.offset, self.field_type)
    }
}

/// The innermost cause of a traversal failure plus its breadcrumbs,
/// innermost first.
#[derive(Debug)]
pub struct FieldTrace {
    pub cause: Error,
    pub frames: Vec<Frame>,
}

impl fmt::Display for FieldTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        for frame in self.frames.iter().rev() {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

/// Error type for descriptor-driven parsing and serialization.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure while parsing, with hierarchy breadcrumbs.
    #[error("error while parsing:\n{0}")]
    Parse(Box<FieldTrace>),

    /// Failure while serializing, with hierarchy breadcrumbs.
    #[error("error while serializing:\n{0}")]
    Serialize(Box<FieldTrace>),

    /// The descriptor is missing something its field type requires.
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// Unknown attribute name or index on a block.
    #[error("'{block}' has no attribute {key}")]
    AttributeNotFound { block: String, key: String },

    /// A dotted neighbor path could not be followed.
    #[error("could not resolve path '{path}': {reason}")]
    Neighbor { path: String, reason: String },

    /// A literal descriptor value can only be changed through a forced edit.
    #[error("descriptor edit refused: {0}")]
    DescEdit(String),

    /// A value could not be encoded or decoded by its field type.
    #[error("codec error: {0}")]
    Codec(String),

    /// A stream adapter failed to transform its data.
    #[error("stream adapter error: {0}")]
    Adapter(String),

    /// Byte source or sink error.
    #[error(transparent)]
    Common(#[from] bytetree_common::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Attach a breadcrumb for the given phase.
    ///
    /// A plain error is wrapped into a trace of that phase; an existing trace
    /// of the same phase gains the frame unless its latest frame already
    /// describes the same site.
    pub fn with_frame(self, phase: Phase, frame: Frame) -> Self {
        match (phase, self) {
            (Phase::Parse, Error::Parse(mut trace)) => {
                push_frame(&mut trace.frames, frame);
                Error::Parse(trace)
            }
            (Phase::Serialize, Error::Serialize(mut trace)) => {
                push_frame(&mut trace.frames, frame);
                Error::Serialize(trace)
            }
            (phase, cause) => {
                let trace = Box::new(FieldTrace {
                    cause,
                    frames: vec![frame],
                });
                match phase {
                    Phase::Parse => Error::Parse(trace),
                    Phase::Serialize => Error::Serialize(trace),
                }
            }
        }
    }

    /// Breadcrumbs of a traced error, innermost first.
    pub fn frames(&self) -> &[Frame] {
        match self {
            Error::Parse(trace) | Error::Serialize(trace) => &trace.frames,
            _ => &[],
        }
    }

    /// The underlying cause, looking through any trace.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Parse(trace) | Error::Serialize(trace) => trace.cause.root_cause(),
            other => other,
        }
    }

    pub(crate) fn descriptor(msg: impl Into<String>) -> Self {
        Error::Descriptor(msg.into())
    }

    pub(crate) fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }
}

fn push_frame(frames: &mut Vec<Frame>, frame: Frame) {
    if frames.last().is_some_and(|last| last.same_site(&frame)) {
        return;
    }
    frames.push(frame);
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
