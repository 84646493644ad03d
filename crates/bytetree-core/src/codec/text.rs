//! String, hex and raw byte codecs.

use bytetree_common::BinaryReader;

use super::raw_bytes;
use crate::field_type::{CodecContext, Encoded, Encoding, FieldType, Kind, Raw, StrKind, TextEncoding};
use crate::{Error, Result, Value};

/// Find the first delimiter at or after `start` that begins on a code unit
/// boundary relative to `start`.
///
/// A match straddling two code units (a stray zero byte followed by the
/// zero high byte of the next unit, say) is skipped and the scan resumes
/// one byte later.
pub fn find_delimiter(reader: &BinaryReader<'_>, delimiter: &[u8], start: usize) -> Result<usize> {
    let width = delimiter.len().max(1);
    let mut from = start;
    loop {
        let found = reader.find_required(delimiter, from)?;
        if (found - start) % width == 0 {
            return Ok(found);
        }
        from = found + 1;
    }
}

/// Bytes up to the first code-unit-aligned delimiter.
fn cut_at_delimiter<'a>(bytes: &'a [u8], delimiter: &[u8]) -> &'a [u8] {
    if delimiter.is_empty() {
        return bytes;
    }
    let end = bytes
        .chunks_exact(delimiter.len())
        .position(|unit| unit == delimiter)
        .map_or(bytes.len(), |i| i * delimiter.len());
    &bytes[..end]
}

fn decode_text(ft: &FieldType, enc: TextEncoding, bytes: &[u8]) -> Result<String> {
    let bad = |what: &str| Error::codec(format!("{} holds invalid {}", ft.name, what));
    match enc {
        TextEncoding::Ascii => {
            if !bytes.is_ascii() {
                return Err(bad("ASCII"));
            }
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| bad("UTF-8")),
        TextEncoding::Utf16 => {
            if bytes.len() % 2 != 0 {
                return Err(bad("UTF-16 (odd length)"));
            }
            let big = ft.endian.is_big();
            let units = bytes.chunks_exact(2).map(|c| {
                let pair = [c[0], c[1]];
                if big {
                    u16::from_be_bytes(pair)
                } else {
                    u16::from_le_bytes(pair)
                }
            });
            char::decode_utf16(units)
                .collect::<std::result::Result<String, _>>()
                .map_err(|_| bad("UTF-16"))
        }
        TextEncoding::Utf32 => {
            if bytes.len() % 4 != 0 {
                return Err(bad("UTF-32 (partial code unit)"));
            }
            let big = ft.endian.is_big();
            bytes
                .chunks_exact(4)
                .map(|c| {
                    let quad = [c[0], c[1], c[2], c[3]];
                    let unit = if big {
                        u32::from_be_bytes(quad)
                    } else {
                        u32::from_le_bytes(quad)
                    };
                    char::from_u32(unit).ok_or_else(|| bad("UTF-32"))
                })
                .collect()
        }
    }
}

fn encode_text(ft: &FieldType, enc: TextEncoding, text: &str) -> Result<Vec<u8>> {
    let unencodable = |c: char| {
        Error::codec(format!(
            "{} cannot encode character {:?}",
            ft.name, c
        ))
    };
    let big = ft.endian.is_big();
    match enc {
        TextEncoding::Ascii => match text.chars().find(|c| !c.is_ascii()) {
            Some(c) => Err(unencodable(c)),
            None => Ok(text.as_bytes().to_vec()),
        },
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).map_err(|_| unencodable(c)))
            .collect(),
        TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
        TextEncoding::Utf16 => Ok(text
            .encode_utf16()
            .flat_map(|u| if big { u.to_be_bytes() } else { u.to_le_bytes() })
            .collect()),
        TextEncoding::Utf32 => Ok(text
            .chars()
            .flat_map(|c| {
                let u = u32::from(c);
                if big {
                    u.to_be_bytes()
                } else {
                    u.to_le_bytes()
                }
            })
            .collect()),
    }
}

fn text_encoding(ft: &FieldType) -> Result<TextEncoding> {
    match ft.encoding {
        Encoding::Text(enc) => Ok(enc),
        _ => Err(Error::codec(format!("{} has no text encoding", ft.name))),
    }
}

fn expect_str<'v>(ft: &FieldType, value: &'v Value) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        Error::codec(format!(
            "{} cannot encode a {} value",
            ft.name,
            value.kind_name()
        ))
    })
}

/// Decoder for every string kind.
pub fn decode_str(ft: &FieldType, raw: Raw<'_>, _ctx: &CodecContext<'_>) -> Result<Value> {
    let bytes = raw_bytes(ft, raw)?;
    let kind = match ft.kind {
        Kind::Str(kind) => kind,
        _ => StrKind::Raw,
    };
    let text = match kind {
        StrKind::Hex => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        StrKind::Raw => decode_text(ft, text_encoding(ft)?, bytes)?,
        StrKind::Fixed | StrKind::NotTerminated | StrKind::CString => {
            let enc = text_encoding(ft)?;
            let zeros = [0u8; 4];
            decode_text(ft, enc, cut_at_delimiter(bytes, &zeros[..enc.char_size()]))?
        }
    };
    Ok(Value::Str(text))
}

/// Encoder for every string kind. C strings get a terminator appended
/// unless they already end with one.
pub fn encode_str(ft: &FieldType, value: &Value, _ctx: &CodecContext<'_>) -> Result<Encoded> {
    let text = expect_str(ft, value)?;
    let bytes = match ft.kind {
        Kind::Str(StrKind::Hex) => decode_hex(ft, text)?,
        Kind::Str(StrKind::CString) => {
            let mut bytes = encode_text(ft, text_encoding(ft)?, text)?;
            if !text.ends_with('\0') {
                bytes.extend_from_slice(ft.delimiter());
            }
            bytes
        }
        _ => encode_text(ft, text_encoding(ft)?, text)?,
    };
    Ok(Encoded::Bytes(bytes))
}

fn decode_hex(ft: &FieldType, text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .chars()
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| Error::codec(format!("{} got non-hex character {:?}", ft.name, c)))
        })
        .collect::<Result<_>>()?;
    // An odd digit count has an implied leading zero.
    let pad = digits.len() % 2;
    let mut out = Vec::with_capacity((digits.len() + 1) / 2);
    let mut iter = std::iter::repeat(0u8).take(pad).chain(digits);
    while let (Some(hi), Some(lo)) = (iter.next(), iter.next()) {
        out.push(hi << 4 | lo);
    }
    Ok(out)
}

/// Decoder for raw byte fields.
pub fn decode_bytes(ft: &FieldType, raw: Raw<'_>, _ctx: &CodecContext<'_>) -> Result<Value> {
    Ok(Value::Bytes(raw_bytes(ft, raw)?.to_vec()))
}

/// Encoder for raw byte fields.
pub fn encode_bytes(ft: &FieldType, value: &Value, _ctx: &CodecContext<'_>) -> Result<Encoded> {
    match value {
        Value::Bytes(b) => Ok(Encoded::Bytes(b.clone())),
        Value::None => Ok(Encoded::Bytes(Vec::new())),
        other => Err(Error::codec(format!(
            "{} cannot encode a {} value",
            ft.name,
            other.kind_name()
        ))),
    }
}

/// Encoded byte length of a string, plus room for a terminator on
/// delimited kinds that lack one.
pub fn str_sizecalc(ft: &FieldType, value: &Value) -> Result<usize> {
    let text = expect_str(ft, value)?;
    match ft.kind {
        Kind::Str(StrKind::Hex) => Ok((text.len() + 1) / 2),
        Kind::Str(StrKind::Fixed | StrKind::CString) => {
            let enc = text_encoding(ft)?;
            let len = encode_text(ft, enc, text)?.len();
            let terminator = if text.ends_with('\0') { 0 } else { enc.char_size() };
            Ok(len + terminator)
        }
        _ => Ok(encode_text(ft, text_encoding(ft)?, text)?.len()),
    }
}

/// Length of a raw byte value.
pub fn bytes_sizecalc(_ft: &FieldType, value: &Value) -> Result<usize> {
    Ok(match value {
        Value::Bytes(b) => b.len(),
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::field_types::*;

    fn ctx(desc: &Descriptor) -> CodecContext<'_> {
        CodecContext::new(desc, 0)
    }

    #[test]
    fn test_utf16_cstring_skips_straddling_zero_pair() {
        // "h\0i\0", a stray zero, then the real terminator.
        let raw = [b'h', 0, b'i', 0, 0, 0, 0];
        let reader = BinaryReader::new(&raw);
        let end = find_delimiter(&reader, CSTR_UTF16.delimiter(), 0).unwrap();
        // The zero pair at 3..5 straddles two code units and is skipped.
        assert_eq!(end, 4);

        let desc = Descriptor::new(&CSTR_UTF16, "s");
        let v = decode_str(&CSTR_UTF16, Raw::Bytes(&raw[..end]), &ctx(&desc)).unwrap();
        assert_eq!(v, Value::from("hi"));
    }

    #[test]
    fn test_find_delimiter_reports_missing_terminator() {
        let raw = [b'a', b'b'];
        let reader = BinaryReader::new(&raw);
        let err = find_delimiter(&reader, &[0], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Common(bytetree_common::Error::DelimiterNotFound { start: 0, .. })
        ));
    }

    #[test]
    fn test_fixed_string_stops_at_delimiter() {
        let desc = Descriptor::new(&STR_ASCII, "s");
        let v = decode_str(&STR_ASCII, Raw::Bytes(b"abc\0\0xyz"), &ctx(&desc)).unwrap();
        assert_eq!(v, Value::from("abc"));

        let v = decode_str(&STR_RAW_ASCII, Raw::Bytes(b"ab\0c"), &ctx(&desc)).unwrap();
        assert_eq!(v, Value::from("ab\0c"));
    }

    #[test]
    fn test_cstring_encoder_appends_terminator_once() {
        let desc = Descriptor::new(&CSTR_UTF16_BE, "s");
        let enc = encode_str(&CSTR_UTF16_BE, &Value::from("A"), &ctx(&desc)).unwrap();
        assert_eq!(enc, Encoded::Bytes(vec![0, b'A', 0, 0]));

        let desc = Descriptor::new(&CSTR_ASCII, "s");
        let enc = encode_str(&CSTR_ASCII, &Value::from("A\0"), &ctx(&desc)).unwrap();
        assert_eq!(enc, Encoded::Bytes(vec![b'A', 0]));
    }

    #[test]
    fn test_hex_round_trip_and_odd_digits() {
        let desc = Descriptor::new(&STR_HEX, "h");
        let v = decode_str(&STR_HEX, Raw::Bytes(&[0xDE, 0x0A]), &ctx(&desc)).unwrap();
        assert_eq!(v, Value::from("de0a"));

        let enc = encode_str(&STR_HEX, &Value::from("abc"), &ctx(&desc)).unwrap();
        assert_eq!(enc, Encoded::Bytes(vec![0x0A, 0xBC]));
        assert_eq!(str_sizecalc(&STR_HEX, &Value::from("abc")).unwrap(), 2);
    }

    #[test]
    fn test_ascii_rejects_non_ascii() {
        let desc = Descriptor::new(&STR_ASCII, "s");
        assert!(encode_str(&STR_ASCII, &Value::from("é"), &ctx(&desc)).is_err());
        assert!(decode_str(&STR_ASCII, Raw::Bytes(&[0xE9]), &ctx(&desc)).is_err());

        let v = decode_str(&STR_LATIN1, Raw::Bytes(&[0xE9]), &ctx(&desc)).unwrap();
        assert_eq!(v, Value::from("é"));
    }

    #[test]
    fn test_str_sizecalc_reserves_terminator() {
        assert_eq!(str_sizecalc(&CSTR_UTF16, &Value::from("hi")).unwrap(), 6);
        assert_eq!(str_sizecalc(&STR_NNT_ASCII, &Value::from("hi")).unwrap(), 2);
        assert_eq!(str_sizecalc(&STR_UTF8, &Value::from("é")).unwrap(), 3);
    }
}
