//! The [`FieldType`] contract.
//!
//! A field type bundles everything the engine needs to know about one
//! binary construct: how to parse and serialize it, how to turn its raw
//! bytes (or bits) into a [`Value`] and back, how to measure a value, and a
//! set of flags the traversal code branches on. Field types are immutable
//! `static`s; see [`crate::field_types`] for the registry.

use std::fmt;

use bytetree_common::Endian;

use crate::descriptor::Descriptor;
use crate::parse::{ParseArgs, ParseState};
use crate::serialize::{SerializeArgs, SerializeState};
use crate::{Result, Value};

/// Parses one field, returning the offset after it.
pub type ParserFn = fn(&ParseArgs<'_>, &mut ParseState<'_>) -> Result<usize>;

/// Serializes one field, returning the offset after it.
pub type SerializerFn = fn(&SerializeArgs<'_>, &mut SerializeState<'_>) -> Result<usize>;

/// Converts raw bytes or bits into a value. Pure.
pub type DecoderFn = fn(&FieldType, Raw<'_>, &CodecContext<'_>) -> Result<Value>;

/// Converts a value into raw bytes or a bit triple. Pure.
pub type EncoderFn = fn(&FieldType, &Value, &CodecContext<'_>) -> Result<Encoded>;

/// Computes the serialized size of a leaf value (bytes, or bits for
/// bit-based types, or element count for arrays of blocks).
pub type SizeCalcFn = fn(&FieldType, &Value) -> Result<usize>;

/// Raw input handed to a decoder.
#[derive(Debug, Clone, Copy)]
pub enum Raw<'a> {
    Bytes(&'a [u8]),
    /// The whole enclosing bit struct, read as one unsigned integer.
    Bits(u128),
}

/// Output of an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Bytes(Vec<u8>),
    /// A bit field to be OR-combined into its enclosing bit struct.
    Bits { value: u128, offset: u32, mask: u128 },
}

/// Resolved context for a codec call.
///
/// The parser or serializer resolves sizes and bit offsets through the
/// block tree before calling a codec, so codecs never touch the tree.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    /// Descriptor of the field being coded.
    pub desc: &'a Descriptor,
    /// Byte size of the field (bit count for bit-based fields).
    pub size: usize,
    /// Bit offset within the enclosing bit struct.
    pub bit_offset: u32,
}

impl<'a> CodecContext<'a> {
    pub fn new(desc: &'a Descriptor, size: usize) -> Self {
        Self {
            desc,
            size,
            bit_offset: 0,
        }
    }
}

/// What a field type is, at the level the traversal code cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Void,
    Pad,
    Container,
    Struct,
    Array,
    WhileArray,
    Switch,
    StreamAdapter,
    Union,
    BitStruct,
    Bit,
    BitInt,
    BigInt,
    Int,
    Float,
    Timestamp,
    TypedArray,
    Bytes,
    Str(StrKind),
}

/// How a string field finds its length and treats delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrKind {
    /// Size from metadata, decoded up to the first delimiter.
    Fixed,
    /// Size from metadata, no delimiter reserved when measuring.
    NotTerminated,
    /// Open-ended; scanned for a delimiter.
    CString,
    /// Size from metadata, delimiters kept.
    Raw,
    /// Size from metadata, rendered as a hex string.
    Hex,
}

/// Numeric signedness or text encoding of a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    None,
    /// Unsigned integer.
    UInt,
    /// Twos'-complement signed integer.
    SInt,
    /// Ones'-complement signed integer.
    S1Int,
    Float,
    Bytes,
    Text(TextEncoding),
}

impl Encoding {
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Encoding::SInt | Encoding::S1Int)
    }
}

/// Text encodings supported by string field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    Ascii,
    Latin1,
    Utf8,
    Utf16,
    Utf32,
}

impl TextEncoding {
    /// Width of one code unit in bytes.
    pub const fn char_size(self) -> usize {
        match self {
            TextEncoding::Ascii | TextEncoding::Latin1 | TextEncoding::Utf8 => 1,
            TextEncoding::Utf16 => 2,
            TextEncoding::Utf32 => 4,
        }
    }
}

/// Which kind of node a field type instantiates in the block tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    /// Plain value stored inline in the parent slot.
    Value,
    /// Indexed children (structs, containers, bit structs).
    List,
    /// Indexed children sharing one element descriptor.
    Array,
    /// A scalar with descriptor metadata (enum and bool fields).
    Data,
    /// Raw buffer with an optional decoded view.
    Union,
    /// A single wrapped sub-structure (stream adapters).
    Wrapper,
    /// No payload.
    Void,
}

/// Boolean properties of a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeFlags {
    pub is_data: bool,
    pub is_block: bool,
    pub is_array: bool,
    pub is_struct: bool,
    pub is_container: bool,
    pub is_var_size: bool,
    pub is_bit_based: bool,
    pub is_oe_size: bool,
    pub is_delimited: bool,
    pub is_str: bool,
    pub is_raw: bool,
    pub is_enum: bool,
    pub is_bool: bool,
}

impl TypeFlags {
    pub const NONE: TypeFlags = TypeFlags {
        is_data: false,
        is_block: false,
        is_array: false,
        is_struct: false,
        is_container: false,
        is_var_size: false,
        is_bit_based: false,
        is_oe_size: false,
        is_delimited: false,
        is_str: false,
        is_raw: false,
        is_enum: false,
        is_bool: false,
    };
}

/// An immutable binary construct description.
///
/// Two field types are the same type only if they are the same `static`;
/// equality is by address.
pub struct FieldType {
    pub name: &'static str,
    pub kind: Kind,
    pub endian: Endian,
    /// Fixed byte size, code unit size for strings, element size for typed
    /// arrays, or 0 when the size always comes from the descriptor.
    pub size: usize,
    pub encoding: Encoding,
    pub flags: TypeFlags,
    pub node_class: NodeClass,
    pub parser: ParserFn,
    pub serializer: SerializerFn,
    pub decoder: DecoderFn,
    pub encoder: EncoderFn,
    pub sizecalc: SizeCalcFn,
    /// The opposite-endian twin, for endian-sensitive types.
    pub other_endian: Option<&'static FieldType>,
}

impl FieldType {
    /// The big-endian version of this type (itself if it has no twin).
    pub fn big(&'static self) -> &'static FieldType {
        match (self.endian, self.other_endian) {
            (Endian::Little, Some(other)) => other,
            _ => self,
        }
    }

    /// The little-endian version of this type (itself if it has no twin).
    pub fn little(&'static self) -> &'static FieldType {
        match (self.endian, self.other_endian) {
            (Endian::Big, Some(other)) => other,
            _ => self,
        }
    }

    /// The version of this type stored in the given byte order.
    pub fn with_endian(&'static self, endian: Endian) -> &'static FieldType {
        match endian.resolve() {
            Endian::Big => self.big(),
            _ => self.little(),
        }
    }

    /// Check whether this is a composite (block) kind with indexed children.
    #[inline]
    pub fn is_list(&self) -> bool {
        matches!(self.node_class, NodeClass::List | NodeClass::Array)
    }

    /// Delimiter for delimited string types: one all-zero code unit.
    pub fn delimiter(&self) -> &'static [u8] {
        const ZEROS: [u8; 4] = [0; 4];
        match self.encoding {
            Encoding::Text(enc) if self.flags.is_delimited => &ZEROS[..enc.char_size()],
            _ => &[],
        }
    }

    /// Smallest value an integer of this type can hold, given a size.
    ///
    /// `size` is in bits for bit-based types and bytes otherwise; it is
    /// ignored for fixed-size types.
    pub fn min(&self, size: usize) -> Option<i128> {
        let bits = self.value_bits(size)?;
        if bits == 0 {
            return Some(0);
        }
        match self.encoding {
            Encoding::SInt if bits >= 128 => Some(i128::MIN),
            Encoding::SInt => Some(-(1i128 << (bits - 1))),
            Encoding::S1Int if bits >= 128 => Some(-i128::MAX),
            Encoding::S1Int => Some(-((1i128 << (bits - 1)) - 1)),
            _ => Some(0),
        }
    }

    /// Largest value an integer of this type can hold, given a size.
    pub fn max(&self, size: usize) -> Option<i128> {
        let bits = self.value_bits(size)?;
        if bits == 0 {
            return Some(0);
        }
        match self.encoding {
            Encoding::UInt if bits >= 127 => Some(i128::MAX),
            Encoding::UInt => Some((1i128 << bits) - 1),
            Encoding::SInt | Encoding::S1Int if bits >= 128 => Some(i128::MAX),
            Encoding::SInt | Encoding::S1Int => Some((1i128 << (bits - 1)) - 1),
            _ => None,
        }
    }

    fn value_bits(&self, size: usize) -> Option<u32> {
        if !matches!(self.encoding, Encoding::UInt | Encoding::SInt | Encoding::S1Int) {
            return None;
        }
        let bits = match self.kind {
            Kind::Bit => 1,
            Kind::BitInt => size,
            Kind::BigInt => size * 8,
            Kind::Int | Kind::Timestamp | Kind::TypedArray => self.size * 8,
            _ => return None,
        };
        u32::try_from(bits).ok()
    }

    /// The default value a fresh field of this type holds.
    pub fn default_value(&self) -> Value {
        match self.kind {
            Kind::Float => Value::Float(0.0),
            Kind::Timestamp => Value::Timestamp(0.0),
            Kind::TypedArray => match self.encoding {
                Encoding::Float => Value::Floats(Vec::new()),
                Encoding::SInt => Value::SInts(Vec::new()),
                _ => Value::UInts(Vec::new()),
            },
            Kind::Bytes => Value::Bytes(Vec::new()),
            Kind::Str(_) => Value::Str(String::new()),
            Kind::Bit | Kind::BitInt | Kind::BigInt | Kind::Int => Value::Int(0),
            _ => Value::None,
        }
    }
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for FieldType {}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endian", &self.endian)
            .field("size", &self.size)
            .finish()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.other_endian.is_some() {
            write!(f, "{}{}", self.name, self.endian)
        } else {
            write!(f, "{}", self.name)
        }
    }
}
