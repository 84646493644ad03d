//! Fixed-width numeric codecs.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytetree_common::Endian;

use super::{expect_int, out_of_range, raw_bytes};
use crate::field_type::{CodecContext, Encoded, Encoding, FieldType, Kind, Raw};
use crate::{Error, Result, Value};

fn read_int<E: ByteOrder>(bytes: &[u8], size: usize, signed: bool) -> Result<i128> {
    if bytes.len() < size {
        return Err(bytetree_common::Error::UnexpectedEof {
            needed: size,
            available: bytes.len(),
        }
        .into());
    }
    let value = match (size, signed) {
        (1, false) => i128::from(bytes[0]),
        (1, true) => i128::from(bytes[0] as i8),
        (2, false) => i128::from(E::read_u16(bytes)),
        (2, true) => i128::from(E::read_i16(bytes)),
        (3, false) => i128::from(E::read_u24(bytes)),
        (3, true) => i128::from(E::read_i24(bytes)),
        (4, false) => i128::from(E::read_u32(bytes)),
        (4, true) => i128::from(E::read_i32(bytes)),
        (8, false) => i128::from(E::read_u64(bytes)),
        (8, true) => i128::from(E::read_i64(bytes)),
        _ => return Err(Error::codec(format!("unsupported integer width {}", size))),
    };
    Ok(value)
}

fn write_int<E: ByteOrder>(value: i128, size: usize, signed: bool) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    match (size, signed) {
        (1, _) => buf[0] = value as u8,
        (2, false) => E::write_u16(&mut buf, value as u16),
        (2, true) => E::write_i16(&mut buf, value as i16),
        (3, false) => E::write_u24(&mut buf, value as u32),
        (3, true) => E::write_i24(&mut buf, value as i32),
        (4, false) => E::write_u32(&mut buf, value as u32),
        (4, true) => E::write_i32(&mut buf, value as i32),
        (8, false) => E::write_u64(&mut buf, value as u64),
        (8, true) => E::write_i64(&mut buf, value as i64),
        _ => return Err(Error::codec(format!("unsupported integer width {}", size))),
    }
    Ok(buf)
}

/// Read a fixed-width integer of the given byte order.
pub fn decode_int_bytes(bytes: &[u8], size: usize, signed: bool, endian: Endian) -> Result<i128> {
    match endian.resolve() {
        Endian::Big => read_int::<BigEndian>(bytes, size, signed),
        _ => read_int::<LittleEndian>(bytes, size, signed),
    }
}

/// Write a fixed-width integer of the given byte order.
pub fn encode_int_bytes(value: i128, size: usize, signed: bool, endian: Endian) -> Result<Vec<u8>> {
    match endian.resolve() {
        Endian::Big => write_int::<BigEndian>(value, size, signed),
        _ => write_int::<LittleEndian>(value, size, signed),
    }
}

/// Decoder for fixed-width integers (1, 2, 3, 4, or 8 bytes).
pub fn decode_int(ft: &FieldType, raw: Raw<'_>, _ctx: &CodecContext<'_>) -> Result<Value> {
    let bytes = raw_bytes(ft, raw)?;
    decode_int_bytes(bytes, ft.size, ft.encoding.is_signed(), ft.endian).map(Value::Int)
}

/// Encoder for fixed-width integers, rejecting values that do not fit.
pub fn encode_int(ft: &FieldType, value: &Value, _ctx: &CodecContext<'_>) -> Result<Encoded> {
    let v = expect_int(ft, value)?;
    let min = ft.min(ft.size).unwrap_or(0);
    let max = ft.max(ft.size).unwrap_or(0);
    if v < min || v > max {
        return Err(out_of_range(ft, v, min, max));
    }
    encode_int_bytes(v, ft.size, ft.encoding.is_signed(), ft.endian).map(Encoded::Bytes)
}

fn read_float(bytes: &[u8], size: usize, endian: Endian) -> Result<f64> {
    if bytes.len() < size {
        return Err(bytetree_common::Error::UnexpectedEof {
            needed: size,
            available: bytes.len(),
        }
        .into());
    }
    let big = endian.is_big();
    Ok(match (size, big) {
        (4, false) => f64::from(LittleEndian::read_f32(bytes)),
        (4, true) => f64::from(BigEndian::read_f32(bytes)),
        (8, false) => LittleEndian::read_f64(bytes),
        (8, true) => BigEndian::read_f64(bytes),
        _ => return Err(Error::codec(format!("unsupported float width {}", size))),
    })
}

fn write_float(value: f64, size: usize, endian: Endian) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    match (size, endian.is_big()) {
        (4, false) => LittleEndian::write_f32(&mut buf, value as f32),
        (4, true) => BigEndian::write_f32(&mut buf, value as f32),
        (8, false) => LittleEndian::write_f64(&mut buf, value),
        (8, true) => BigEndian::write_f64(&mut buf, value),
        _ => return Err(Error::codec(format!("unsupported float width {}", size))),
    }
    Ok(buf)
}

/// Decoder for 4- and 8-byte floats.
pub fn decode_float(ft: &FieldType, raw: Raw<'_>, _ctx: &CodecContext<'_>) -> Result<Value> {
    read_float(raw_bytes(ft, raw)?, ft.size, ft.endian).map(Value::Float)
}

/// Encoder for 4- and 8-byte floats. Integers are accepted and widened.
pub fn encode_float(ft: &FieldType, value: &Value, _ctx: &CodecContext<'_>) -> Result<Encoded> {
    let v = match value {
        Value::Int(i) => *i as f64,
        other => other.as_float().ok_or_else(|| {
            Error::codec(format!("{} cannot encode a {} value", ft.name, other.kind_name()))
        })?,
    };
    write_float(v, ft.size, ft.endian).map(Encoded::Bytes)
}

/// Decoder for timestamps stored as float or integer seconds.
pub fn decode_timestamp(ft: &FieldType, raw: Raw<'_>, _ctx: &CodecContext<'_>) -> Result<Value> {
    let bytes = raw_bytes(ft, raw)?;
    let secs = match ft.encoding {
        Encoding::Float => read_float(bytes, ft.size, ft.endian)?,
        _ => decode_int_bytes(bytes, ft.size, ft.encoding.is_signed(), ft.endian)? as f64,
    };
    Ok(Value::Timestamp(secs))
}

/// Encoder for timestamps; integer timestamps truncate fractional seconds.
pub fn encode_timestamp(ft: &FieldType, value: &Value, _ctx: &CodecContext<'_>) -> Result<Encoded> {
    let secs = match value {
        Value::Int(i) => *i as f64,
        other => other.as_float().ok_or_else(|| {
            Error::codec(format!("{} cannot encode a {} value", ft.name, other.kind_name()))
        })?,
    };
    match ft.encoding {
        Encoding::Float => write_float(secs, ft.size, ft.endian).map(Encoded::Bytes),
        _ => {
            let whole = secs.trunc() as i128;
            let max = ft.max(ft.size).unwrap_or(0);
            let min = ft.min(ft.size).unwrap_or(0);
            if whole < min || whole > max {
                return Err(out_of_range(ft, whole, min, max));
            }
            encode_int_bytes(whole, ft.size, ft.encoding.is_signed(), ft.endian).map(Encoded::Bytes)
        }
    }
}

/// Decoder for typed numeric arrays.
///
/// Elements are read in the declared byte order, which amounts to a
/// byteswap whenever that order differs from the host's.
pub fn decode_typed_array(ft: &FieldType, raw: Raw<'_>, _ctx: &CodecContext<'_>) -> Result<Value> {
    let bytes = raw_bytes(ft, raw)?;
    let item = ft.size;
    if item == 0 || bytes.len() % item != 0 {
        return Err(Error::codec(format!(
            "{} byte length {} is not a multiple of its item size {}",
            ft.name,
            bytes.len(),
            item
        )));
    }
    let chunks = bytes.chunks_exact(item);
    Ok(match ft.encoding {
        Encoding::Float => Value::Floats(
            chunks
                .map(|c| read_float(c, item, ft.endian))
                .collect::<Result<_>>()?,
        ),
        Encoding::SInt => Value::SInts(
            chunks
                .map(|c| decode_int_bytes(c, item, true, ft.endian).map(|v| v as i64))
                .collect::<Result<_>>()?,
        ),
        _ => Value::UInts(
            chunks
                .map(|c| decode_int_bytes(c, item, false, ft.endian).map(|v| v as u64))
                .collect::<Result<_>>()?,
        ),
    })
}

/// Encoder for typed numeric arrays.
pub fn encode_typed_array(ft: &FieldType, value: &Value, _ctx: &CodecContext<'_>) -> Result<Encoded> {
    let item = ft.size;
    let mut out = Vec::with_capacity(value.len() * item);
    let min = ft.min(item).unwrap_or(0);
    let max = ft.max(item).unwrap_or(0);
    let mut push_int = |v: i128| -> Result<()> {
        if v < min || v > max {
            return Err(out_of_range(ft, v, min, max));
        }
        out.extend(encode_int_bytes(v, item, ft.encoding.is_signed(), ft.endian)?);
        Ok(())
    };
    match value {
        Value::UInts(items) => items.iter().try_for_each(|&v| push_int(i128::from(v)))?,
        Value::SInts(items) => items.iter().try_for_each(|&v| push_int(i128::from(v)))?,
        Value::Bytes(items) if item == 1 => items.iter().try_for_each(|&v| push_int(i128::from(v)))?,
        Value::Floats(items) if ft.encoding == Encoding::Float => {
            for &v in items {
                out.extend(write_float(v, item, ft.endian)?);
            }
        }
        other => {
            return Err(Error::codec(format!(
                "{} cannot encode a {} value",
                ft.name,
                other.kind_name()
            )))
        }
    }
    Ok(Encoded::Bytes(out))
}

/// Size of a fixed-width numeric value in bytes.
pub fn fixed_sizecalc(ft: &FieldType, _value: &Value) -> Result<usize> {
    Ok(ft.size)
}

/// Size of a typed array in bytes.
pub fn typed_array_sizecalc(ft: &FieldType, value: &Value) -> Result<usize> {
    debug_assert_eq!(ft.kind, Kind::TypedArray);
    Ok(value.len() * ft.size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::field_types::*;

    fn ctx(desc: &Descriptor) -> CodecContext<'_> {
        CodecContext::new(desc, desc.field_type.size)
    }

    #[test]
    fn test_int_endianness() {
        let d = Descriptor::new(&UINT16_BE, "x");
        let v = decode_int(&UINT16_BE, Raw::Bytes(&[0x12, 0x34]), &ctx(&d)).unwrap();
        assert_eq!(v, Value::Int(0x1234));

        let d = Descriptor::new(&UINT16, "x");
        let v = decode_int(&UINT16, Raw::Bytes(&[0x12, 0x34]), &ctx(&d)).unwrap();
        assert_eq!(v, Value::Int(0x3412));
    }

    #[test]
    fn test_int24_sign_extends() {
        let d = Descriptor::new(&SINT24, "x");
        let v = decode_int(&SINT24, Raw::Bytes(&[0xFF, 0xFF, 0xFF]), &ctx(&d)).unwrap();
        assert_eq!(v, Value::Int(-1));

        let enc = encode_int(&SINT24, &Value::Int(-2), &ctx(&d)).unwrap();
        assert_eq!(enc, Encoded::Bytes(vec![0xFE, 0xFF, 0xFF]));
    }

    #[test]
    fn test_encode_int_rejects_out_of_range() {
        let d = Descriptor::new(&UINT8, "x");
        assert!(encode_int(&UINT8, &Value::Int(256), &ctx(&d)).is_err());
        assert!(encode_int(&UINT8, &Value::Int(-1), &ctx(&d)).is_err());

        let d = Descriptor::new(&SINT8, "x");
        assert!(encode_int(&SINT8, &Value::Int(-128), &ctx(&d)).is_ok());
        assert!(encode_int(&SINT8, &Value::Int(128), &ctx(&d)).is_err());
    }

    #[test]
    fn test_timestamp32() {
        let d = Descriptor::new(&TIMESTAMP32, "t");
        let raw = 86_400u32.to_le_bytes();
        let v = decode_timestamp(&TIMESTAMP32, Raw::Bytes(&raw), &ctx(&d)).unwrap();
        assert_eq!(v, Value::Timestamp(86_400.0));
        assert_eq!(v.to_string(), "1970-01-02 00:00:00 UTC");

        let enc = encode_timestamp(&TIMESTAMP32, &v, &ctx(&d)).unwrap();
        assert_eq!(enc, Encoded::Bytes(raw.to_vec()));
    }

    #[test]
    fn test_typed_array_big_endian() {
        let d = Descriptor::new(&UINT16_ARRAY_BE, "a");
        let raw = [0x00, 0x01, 0x01, 0x00];
        let v = decode_typed_array(&UINT16_ARRAY_BE, Raw::Bytes(&raw), &ctx(&d)).unwrap();
        assert_eq!(v, Value::UInts(vec![1, 256]));

        let enc = encode_typed_array(&UINT16_ARRAY_BE, &v, &ctx(&d)).unwrap();
        assert_eq!(enc, Encoded::Bytes(raw.to_vec()));
        assert_eq!(typed_array_sizecalc(&UINT16_ARRAY_BE, &v).unwrap(), 4);
    }

    #[test]
    fn test_typed_array_item_bounds() {
        let d = Descriptor::new(&SINT16_ARRAY, "a");
        let v = Value::SInts(vec![-32768, -1, 0, 32767]);
        let enc = encode_typed_array(&SINT16_ARRAY, &v, &ctx(&d)).unwrap();
        let Encoded::Bytes(bytes) = enc else {
            panic!("typed arrays encode to bytes");
        };
        assert_eq!(bytes, vec![0x00, 0x80, 0xff, 0xff, 0x00, 0x00, 0xff, 0x7f]);
        let back = decode_typed_array(&SINT16_ARRAY, Raw::Bytes(&bytes), &ctx(&d)).unwrap();
        assert_eq!(back, v);

        let over = Value::SInts(vec![32768]);
        assert!(encode_typed_array(&SINT16_ARRAY, &over, &ctx(&d)).is_err());
        let d = Descriptor::new(&UINT8_ARRAY, "a");
        assert!(encode_typed_array(&UINT8_ARRAY, &Value::UInts(vec![256]), &ctx(&d)).is_err());
    }

    #[test]
    fn test_timestamp64_bounds() {
        let d = Descriptor::new(&TIMESTAMP64_BE, "t");
        let v = Value::Timestamp(1_700_000_000.75);
        let enc = encode_timestamp(&TIMESTAMP64_BE, &v, &ctx(&d)).unwrap();
        assert_eq!(enc, Encoded::Bytes(1_700_000_000u64.to_be_bytes().to_vec()));

        let d = Descriptor::new(&TIMESTAMP32, "t");
        assert!(encode_timestamp(&TIMESTAMP32, &Value::Int(1 << 32), &ctx(&d)).is_err());
        assert_eq!(TIMESTAMP32.max(4), Some(u32::MAX as i128));
    }

    #[test]
    fn test_typed_array_rejects_partial_item() {
        let d = Descriptor::new(&UINT32_ARRAY, "a");
        assert!(decode_typed_array(&UINT32_ARRAY, Raw::Bytes(&[0; 6]), &ctx(&d)).is_err());
    }

    #[test]
    fn test_float_round_trip() {
        let d = Descriptor::new(&FLOAT_BE, "f");
        let enc = encode_float(&FLOAT_BE, &Value::Float(1.5), &ctx(&d)).unwrap();
        assert_eq!(enc, Encoded::Bytes(vec![0x3F, 0xC0, 0x00, 0x00]));
        let Encoded::Bytes(bytes) = enc else { unreachable!() };
        let v = decode_float(&FLOAT_BE, Raw::Bytes(&bytes), &ctx(&d)).unwrap();
        assert_eq!(v, Value::Float(1.5));
    }
}
