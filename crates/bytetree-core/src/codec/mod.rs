//! Leaf codecs: raw bytes or bits to [`Value`] and back.
//!
//! Every function here is pure. Sizes and bit offsets arrive pre-resolved in
//! the [`CodecContext`], so nothing in this module touches the block tree.
//!
//! - [`numeric`] - fixed-width integers, floats, timestamps, typed arrays
//! - [`integer`] - arbitrary-width big integers and bit-packed integers
//! - [`text`] - strings in several encodings, hex strings, raw bytes

pub mod integer;
pub mod numeric;
pub mod text;

use crate::field_type::{CodecContext, Encoded, FieldType, Raw};
use crate::{Error, Result, Value};

/// Decoder for types with no decoded value (blocks, void, padding).
pub fn no_decode(_: &FieldType, _: Raw<'_>, _: &CodecContext<'_>) -> Result<Value> {
    Ok(Value::None)
}

/// Encoder for types that write nothing themselves.
pub fn no_encode(_: &FieldType, _: &Value, _: &CodecContext<'_>) -> Result<Encoded> {
    Ok(Encoded::Bytes(Vec::new()))
}

/// Borrow the byte payload of a raw input, rejecting bit input.
pub(crate) fn raw_bytes<'a>(ft: &FieldType, raw: Raw<'a>) -> Result<&'a [u8]> {
    match raw {
        Raw::Bytes(bytes) => Ok(bytes),
        Raw::Bits(_) => Err(Error::codec(format!(
            "{} expects bytes, got a bit integer",
            ft.name
        ))),
    }
}

/// Get a value as an integer, with a descriptive error otherwise.
pub(crate) fn expect_int(ft: &FieldType, value: &Value) -> Result<i128> {
    value.as_int().ok_or_else(|| {
        Error::codec(format!(
            "{} cannot encode a {} value",
            ft.name,
            value.kind_name()
        ))
    })
}

pub(crate) fn out_of_range(ft: &FieldType, value: i128, min: i128, max: i128) -> Error {
    Error::codec(format!(
        "{} value {} is outside [{}, {}]",
        ft.name, value, min, max
    ))
}
