//! Arbitrary-width integers: byte-level big ints and bit-level ints.
//!
//! Three signedness schemes are supported. Unsigned values are stored as
//! is. Twos'-complement values are the usual signed representation.
//! Ones'-complement negatives are stored one lower than their twos'
//! complement counterpart, so `-1` becomes all ones minus one.

use bytetree_common::Endian;

use super::{expect_int, out_of_range, raw_bytes};
use crate::field_type::{CodecContext, Encoded, Encoding, FieldType, Raw};
use crate::{Error, Result, Value};

/// Largest width of a big integer, in bytes.
pub const MAX_BIG_INT_BYTES: usize = 16;

/// Largest width of a bit integer, in bits.
pub const MAX_BIT_INT_BITS: usize = 127;

fn bit_length(v: i128) -> usize {
    (128 - v.unsigned_abs().leading_zeros()) as usize
}

/// Decoder for big integers whose width comes from the field's size.
///
/// An empty input decodes to 0.
pub fn decode_big_int(ft: &FieldType, raw: Raw<'_>, ctx: &CodecContext<'_>) -> Result<Value> {
    let bytes = raw_bytes(ft, raw)?;
    let size = ctx.size.min(bytes.len());
    if size == 0 {
        return Ok(Value::Int(0));
    }
    if size > MAX_BIG_INT_BYTES {
        return Err(Error::codec(format!(
            "{} is {} bytes wide, at most {} are supported",
            ft.name, size, MAX_BIG_INT_BYTES
        )));
    }
    let bytes = &bytes[..size];

    let mut buf = [0u8; 16];
    match ft.endian.resolve() {
        Endian::Big => buf[16 - size..].copy_from_slice(bytes),
        _ => {
            for (dst, src) in buf[16 - size..].iter_mut().zip(bytes.iter().rev()) {
                *dst = *src;
            }
        }
    }
    let unsigned = u128::from_be_bytes(buf);

    let value = match ft.encoding {
        Encoding::SInt | Encoding::S1Int => {
            let shift = (16 - size) * 8;
            let signed = ((unsigned << shift) as i128) >> shift;
            if ft.encoding == Encoding::S1Int && signed < 0 {
                signed + 1
            } else {
                signed
            }
        }
        _ if size == 16 && unsigned > i128::MAX as u128 => {
            return Err(Error::codec(format!(
                "{} value {} does not fit a signed 128-bit integer",
                ft.name, unsigned
            )))
        }
        _ => unsigned as i128,
    };
    Ok(Value::Int(value))
}

/// Encoder for big integers. A zero width encodes to no bytes.
pub fn encode_big_int(ft: &FieldType, value: &Value, ctx: &CodecContext<'_>) -> Result<Encoded> {
    let v = expect_int(ft, value)?;
    let size = ctx.size;
    if size == 0 {
        return Ok(Encoded::Bytes(Vec::new()));
    }
    if size > MAX_BIG_INT_BYTES {
        return Err(Error::codec(format!(
            "{} is {} bytes wide, at most {} are supported",
            ft.name, size, MAX_BIG_INT_BYTES
        )));
    }
    let min = ft.min(size).unwrap_or(0);
    let max = ft.max(size).unwrap_or(0);
    if v < min || v > max {
        return Err(out_of_range(ft, v, min, max));
    }
    let stored = if ft.encoding == Encoding::S1Int && v < 0 {
        v - 1
    } else {
        v
    };

    let be = stored.to_be_bytes();
    let mut out = be[16 - size..].to_vec();
    if !ft.endian.is_big() {
        out.reverse();
    }
    Ok(Encoded::Bytes(out))
}

/// Decoder for integers packed into a bit struct.
///
/// `ctx.size` is the bit count and `ctx.bit_offset` the shift. A zero bit
/// count decodes to 0.
pub fn decode_bit_int(ft: &FieldType, raw: Raw<'_>, ctx: &CodecContext<'_>) -> Result<Value> {
    let Raw::Bits(data) = raw else {
        return Err(Error::codec(format!("{} expects a bit integer", ft.name)));
    };
    let bitcount = ctx.size;
    if bitcount == 0 {
        return Ok(Value::Int(0));
    }
    if bitcount > MAX_BIT_INT_BITS {
        return Err(Error::codec(format!(
            "{} is {} bits wide, at most {} are supported",
            ft.name, bitcount, MAX_BIT_INT_BITS
        )));
    }

    let mask = (1u128 << bitcount) - 1;
    let bits = (data >> ctx.bit_offset) & mask;
    let sign = 1u128 << (bitcount - 1);

    if bits & sign != 0 {
        let intmask = sign - 1;
        match ft.encoding {
            Encoding::S1Int => return Ok(Value::Int(-(((!bits) & intmask) as i128))),
            Encoding::SInt => {
                let magnitude = ((!bits).wrapping_add(1)) & intmask;
                // Only the sign bit set: the most negative value.
                if magnitude == 0 {
                    return Ok(Value::Int(-(sign as i128)));
                }
                return Ok(Value::Int(-(magnitude as i128)));
            }
            _ => {}
        }
    }
    Ok(Value::Int(bits as i128))
}

/// Encoder for integers packed into a bit struct.
///
/// Returns the unshifted stored value with its offset and mask; the bit
/// struct serializer combines all of them.
pub fn encode_bit_int(ft: &FieldType, value: &Value, ctx: &CodecContext<'_>) -> Result<Encoded> {
    let v = expect_int(ft, value)?;
    let bitcount = ctx.size;
    if bitcount > MAX_BIT_INT_BITS {
        return Err(Error::codec(format!(
            "{} is {} bits wide, at most {} are supported",
            ft.name, bitcount, MAX_BIT_INT_BITS
        )));
    }
    let mask = if bitcount == 0 { 0 } else { (1u128 << bitcount) - 1 };
    let min = ft.min(bitcount).unwrap_or(0);
    let max = ft.max(bitcount).unwrap_or(0);
    if v < min || v > max {
        return Err(out_of_range(ft, v, min, max));
    }

    let stored = if v < 0 {
        let wrap = 1u128 << bitcount;
        match ft.encoding {
            Encoding::S1Int => wrap.wrapping_add((v - 1) as u128),
            _ => wrap.wrapping_add(v as u128),
        }
    } else {
        v as u128
    };
    Ok(Encoded::Bits {
        value: stored,
        offset: ctx.bit_offset,
        mask,
    })
}

/// Bytes needed to store an integer: `ceil(bit_length / 8)`, with a sign
/// bit for signed types. Zero needs no bytes.
pub fn big_int_sizecalc(ft: &FieldType, value: &Value) -> Result<usize> {
    let v = expect_int(ft, value)?;
    let sign = usize::from(ft.encoding.is_signed() && v != 0);
    Ok((bit_length(v) + 7 + sign) / 8)
}

/// Bits needed to store an integer, with a sign bit for signed types.
pub fn bit_int_sizecalc(ft: &FieldType, value: &Value) -> Result<usize> {
    let v = expect_int(ft, value)?;
    let sign = usize::from(ft.encoding.is_signed() && v != 0);
    Ok(bit_length(v) + sign)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::field_types::*;

    fn bit_round_trip(ft: &'static FieldType, bits: usize, value: i128) -> i128 {
        let desc = Descriptor::new(ft, "x");
        let mut ctx = CodecContext::new(&desc, bits);
        ctx.bit_offset = 3;
        let Encoded::Bits {
            value: stored,
            offset,
            mask,
        } = encode_bit_int(ft, &Value::Int(value), &ctx).unwrap()
        else {
            panic!("bit encoder returned bytes");
        };
        let packed = (stored & mask) << offset;
        decode_bit_int(ft, Raw::Bits(packed), &ctx)
            .unwrap()
            .as_int()
            .unwrap()
    }

    #[test]
    fn test_bit_int_boundaries_all_widths() {
        for bits in 1..=64usize {
            for ft in [&SBIT_INT, &S1BIT_INT, &UBIT_INT] {
                let min = ft.min(bits).unwrap();
                let max = ft.max(bits).unwrap();
                let mut samples = vec![0, min, max];
                if min < 0 {
                    samples.push(-1);
                }
                for v in samples {
                    assert_eq!(
                        bit_round_trip(ft, bits, v),
                        v,
                        "{} width {} value {}",
                        ft.name,
                        bits,
                        v
                    );
                }
            }
        }
    }

    #[test]
    fn test_bit_int_signed_ranges() {
        assert_eq!(SBIT_INT.min(4), Some(-8));
        assert_eq!(SBIT_INT.max(4), Some(7));
        assert_eq!(S1BIT_INT.min(4), Some(-7));
        assert_eq!(S1BIT_INT.max(4), Some(7));
        assert_eq!(UBIT_INT.max(4), Some(15));
    }

    #[test]
    fn test_twos_sign_bit_only_is_most_negative() {
        let desc = Descriptor::new(&SBIT_INT, "x");
        let ctx = CodecContext::new(&desc, 4);
        let v = decode_bit_int(&SBIT_INT, Raw::Bits(0b1000), &ctx).unwrap();
        assert_eq!(v, Value::Int(-8));
    }

    #[test]
    fn test_ones_complement_stored_value() {
        let desc = Descriptor::new(&S1BIT_INT, "x");
        let ctx = CodecContext::new(&desc, 4);
        let enc = encode_bit_int(&S1BIT_INT, &Value::Int(-1), &ctx).unwrap();
        assert_eq!(
            enc,
            Encoded::Bits {
                value: 0b1110,
                offset: 0,
                mask: 0b1111
            }
        );
        assert!(encode_bit_int(&S1BIT_INT, &Value::Int(-8), &ctx).is_err());
    }

    #[test]
    fn test_zero_width_decodes_to_zero() {
        let desc = Descriptor::new(&SBIT_INT, "x");
        let ctx = CodecContext::new(&desc, 0);
        assert_eq!(decode_bit_int(&SBIT_INT, Raw::Bits(u128::MAX), &ctx).unwrap(), Value::Int(0));

        let desc = Descriptor::new(&SINT_BIG, "x");
        let ctx = CodecContext::new(&desc, 0);
        assert_eq!(decode_big_int(&SINT_BIG, Raw::Bytes(&[]), &ctx).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_big_int_endian_and_sign() {
        let desc = Descriptor::new(&SINT_BIG_BE, "x");
        let ctx = CodecContext::new(&desc, 5);
        let raw = [0xFF, 0xFF, 0xFF, 0xFF, 0xFE];
        assert_eq!(decode_big_int(&SINT_BIG_BE, Raw::Bytes(&raw), &ctx).unwrap(), Value::Int(-2));
        let enc = encode_big_int(&SINT_BIG_BE, &Value::Int(-2), &ctx).unwrap();
        assert_eq!(enc, Encoded::Bytes(raw.to_vec()));

        let desc = Descriptor::new(&UINT_BIG, "x");
        let ctx = CodecContext::new(&desc, 3);
        let v = decode_big_int(&UINT_BIG, Raw::Bytes(&[0x01, 0x02, 0x03]), &ctx).unwrap();
        assert_eq!(v, Value::Int(0x030201));
    }

    #[test]
    fn test_big_int_ones_complement() {
        let desc = Descriptor::new(&S1INT_BIG, "x");
        let ctx = CodecContext::new(&desc, 2);
        let enc = encode_big_int(&S1INT_BIG, &Value::Int(-1), &ctx).unwrap();
        assert_eq!(enc, Encoded::Bytes(vec![0xFE, 0xFF]));
        let Encoded::Bytes(bytes) = enc else { unreachable!() };
        assert_eq!(decode_big_int(&S1INT_BIG, Raw::Bytes(&bytes), &ctx).unwrap(), Value::Int(-1));
        assert!(encode_big_int(&S1INT_BIG, &Value::Int(-32768), &ctx).is_err());
    }

    #[test]
    fn test_sizecalcs() {
        assert_eq!(big_int_sizecalc(&UINT_BIG, &Value::Int(0)).unwrap(), 0);
        assert_eq!(big_int_sizecalc(&UINT_BIG, &Value::Int(255)).unwrap(), 1);
        assert_eq!(big_int_sizecalc(&SINT_BIG, &Value::Int(255)).unwrap(), 2);
        assert_eq!(bit_int_sizecalc(&UBIT_INT, &Value::Int(5)).unwrap(), 3);
        assert_eq!(bit_int_sizecalc(&SBIT_INT, &Value::Int(-5)).unwrap(), 4);
    }
}
