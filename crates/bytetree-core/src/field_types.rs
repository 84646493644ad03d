//! The built-in [`FieldType`] registry.
//!
//! Every type is a `static`. Types whose byte order matters come in
//! little/big twins (`UINT16` / `UINT16_BE`) that point at each other
//! through `other_endian`; both twins share one name. [`lookup`] finds a
//! type by name, where a `_be` suffix selects the big-endian twin.

use bytetree_common::Endian;

use crate::codec::{self, integer, numeric, text};
use crate::field_type::{
    Encoding, FieldType, Kind, NodeClass, StrKind, TextEncoding, TypeFlags,
};
use crate::parse;
use crate::serialize;
use crate::{Result, Value};

fn no_sizecalc(_: &FieldType, _: &Value) -> Result<usize> {
    Ok(0)
}

const BLOCK: FieldType = FieldType {
    name: "",
    kind: Kind::Void,
    endian: Endian::Little,
    size: 0,
    encoding: Encoding::None,
    flags: TypeFlags {
        is_block: true,
        ..TypeFlags::NONE
    },
    node_class: NodeClass::List,
    parser: parse::void_parser,
    serializer: serialize::void_serializer,
    decoder: codec::no_decode,
    encoder: codec::no_encode,
    sizecalc: no_sizecalc,
    other_endian: None,
};

const FIXED_INT: FieldType = FieldType {
    name: "",
    kind: Kind::Int,
    endian: Endian::Little,
    size: 0,
    encoding: Encoding::UInt,
    flags: TypeFlags {
        is_data: true,
        ..TypeFlags::NONE
    },
    node_class: NodeClass::Value,
    parser: parse::data_parser,
    serializer: serialize::data_serializer,
    decoder: numeric::decode_int,
    encoder: numeric::encode_int,
    sizecalc: numeric::fixed_sizecalc,
    other_endian: None,
};

const ENUM_FLAGS: TypeFlags = TypeFlags {
    is_data: true,
    is_block: true,
    is_enum: true,
    ..TypeFlags::NONE
};

const BOOL_FLAGS: TypeFlags = TypeFlags {
    is_data: true,
    is_block: true,
    is_bool: true,
    ..TypeFlags::NONE
};

const BIT_FLAGS: TypeFlags = TypeFlags {
    is_data: true,
    is_bit_based: true,
    is_var_size: true,
    ..TypeFlags::NONE
};

const BIG_INT: FieldType = FieldType {
    kind: Kind::BigInt,
    flags: TypeFlags {
        is_data: true,
        is_var_size: true,
        ..TypeFlags::NONE
    },
    decoder: integer::decode_big_int,
    encoder: integer::encode_big_int,
    sizecalc: integer::big_int_sizecalc,
    ..FIXED_INT
};

const FLOAT_BASE: FieldType = FieldType {
    kind: Kind::Float,
    encoding: Encoding::Float,
    decoder: numeric::decode_float,
    encoder: numeric::encode_float,
    ..FIXED_INT
};

const TIMESTAMP_BASE: FieldType = FieldType {
    kind: Kind::Timestamp,
    decoder: numeric::decode_timestamp,
    encoder: numeric::encode_timestamp,
    ..FIXED_INT
};

const TYPED_ARRAY: FieldType = FieldType {
    kind: Kind::TypedArray,
    flags: TypeFlags {
        is_data: true,
        is_var_size: true,
        ..TypeFlags::NONE
    },
    decoder: numeric::decode_typed_array,
    encoder: numeric::encode_typed_array,
    sizecalc: numeric::typed_array_sizecalc,
    ..FIXED_INT
};

const BYTES: FieldType = FieldType {
    kind: Kind::Bytes,
    encoding: Encoding::Bytes,
    flags: TypeFlags {
        is_data: true,
        is_var_size: true,
        is_raw: true,
        ..TypeFlags::NONE
    },
    decoder: text::decode_bytes,
    encoder: text::encode_bytes,
    sizecalc: text::bytes_sizecalc,
    ..FIXED_INT
};

const fn string(kind: StrKind, enc: TextEncoding) -> FieldType {
    let delimited = matches!(kind, StrKind::Fixed | StrKind::CString);
    let cstring = matches!(kind, StrKind::CString);
    FieldType {
        kind: Kind::Str(kind),
        size: enc.char_size(),
        encoding: Encoding::Text(enc),
        flags: TypeFlags {
            is_data: true,
            is_str: true,
            is_var_size: !cstring,
            is_oe_size: cstring,
            is_delimited: delimited,
            is_raw: matches!(kind, StrKind::Raw),
            ..TypeFlags::NONE
        },
        parser: if cstring {
            parse::cstring_parser
        } else {
            parse::data_parser
        },
        serializer: if cstring {
            serialize::cstring_serializer
        } else {
            serialize::data_serializer
        },
        decoder: text::decode_str,
        encoder: text::encode_str,
        sizecalc: text::str_sizecalc,
        ..FIXED_INT
    }
}

/// Declare a little/big pair sharing one name.
macro_rules! twins {
    ($($le:ident / $be:ident = $name:literal, $base:expr;)*) => {
        $(
            pub static $le: FieldType = FieldType {
                name: $name,
                endian: Endian::Little,
                other_endian: Some(&$be),
                ..$base
            };
            pub static $be: FieldType = FieldType {
                name: $name,
                endian: Endian::Big,
                other_endian: Some(&$le),
                ..$base
            };
        )*
    };
}

/// Declare a type with no byte-order twin.
macro_rules! single {
    ($($id:ident = $name:literal, $base:expr;)*) => {
        $(
            pub static $id: FieldType = FieldType {
                name: $name,
                ..$base
            };
        )*
    };
}

// Composite kinds.
single! {
    VOID = "Void", FieldType { node_class: NodeClass::Void, ..BLOCK };
    PAD = "Pad", FieldType {
        kind: Kind::Pad,
        node_class: NodeClass::Void,
        parser: parse::pad_parser,
        serializer: serialize::pad_serializer,
        ..BLOCK
    };
    CONTAINER = "Container", FieldType {
        kind: Kind::Container,
        flags: TypeFlags { is_block: true, is_container: true, ..TypeFlags::NONE },
        parser: parse::container_parser,
        serializer: serialize::container_serializer,
        ..BLOCK
    };
    STRUCT = "Struct", FieldType {
        kind: Kind::Struct,
        flags: TypeFlags { is_block: true, is_struct: true, ..TypeFlags::NONE },
        parser: parse::struct_parser,
        serializer: serialize::struct_serializer,
        ..BLOCK
    };
    ARRAY = "Array", FieldType {
        kind: Kind::Array,
        flags: TypeFlags {
            is_block: true,
            is_array: true,
            is_container: true,
            ..TypeFlags::NONE
        },
        node_class: NodeClass::Array,
        parser: parse::array_parser,
        serializer: serialize::array_serializer,
        ..BLOCK
    };
    WHILE_ARRAY = "WhileArray", FieldType {
        kind: Kind::WhileArray,
        flags: TypeFlags {
            is_block: true,
            is_array: true,
            is_container: true,
            is_oe_size: true,
            ..TypeFlags::NONE
        },
        node_class: NodeClass::Array,
        parser: parse::while_array_parser,
        serializer: serialize::array_serializer,
        ..BLOCK
    };
    SWITCH = "Switch", FieldType {
        kind: Kind::Switch,
        node_class: NodeClass::Void,
        parser: parse::switch_parser,
        serializer: serialize::switch_serializer,
        ..BLOCK
    };
    STREAM_ADAPTER = "StreamAdapter", FieldType {
        kind: Kind::StreamAdapter,
        flags: TypeFlags { is_block: true, is_oe_size: true, ..TypeFlags::NONE },
        node_class: NodeClass::Wrapper,
        parser: parse::stream_adapter_parser,
        serializer: serialize::stream_adapter_serializer,
        ..BLOCK
    };
}

twins! {
    UNION / UNION_BE = "Union", FieldType {
        kind: Kind::Union,
        flags: TypeFlags { is_block: true, is_struct: true, ..TypeFlags::NONE },
        node_class: NodeClass::Union,
        parser: parse::union_parser,
        serializer: serialize::union_serializer,
        ..BLOCK
    };
    BIT_STRUCT / BIT_STRUCT_BE = "BitStruct", FieldType {
        kind: Kind::BitStruct,
        flags: TypeFlags { is_block: true, is_struct: true, ..TypeFlags::NONE },
        parser: parse::bit_struct_parser,
        serializer: serialize::bit_struct_serializer,
        ..BLOCK
    };
}

const BIT_INT: FieldType = FieldType {
    kind: Kind::BitInt,
    flags: BIT_FLAGS,
    parser: parse::bit_field_parser,
    serializer: serialize::bit_field_serializer,
    decoder: integer::decode_bit_int,
    encoder: integer::encode_bit_int,
    sizecalc: integer::bit_int_sizecalc,
    ..FIXED_INT
};

const BIT_ENUM: FieldType = FieldType {
    flags: TypeFlags {
        is_bit_based: true,
        is_var_size: true,
        ..ENUM_FLAGS
    },
    node_class: NodeClass::Data,
    ..BIT_INT
};

// Bit-level types. They only appear inside a bit struct, which decodes
// and encodes them directly.
single! {
    BIT = "Bit", FieldType {
        kind: Kind::Bit,
        size: 1,
        flags: TypeFlags { is_var_size: false, ..BIT_FLAGS },
        sizecalc: numeric::fixed_sizecalc,
        ..BIT_INT
    };
    UBIT_INT = "UBitInt", BIT_INT;
    SBIT_INT = "SBitInt", FieldType { encoding: Encoding::SInt, ..BIT_INT };
    S1BIT_INT = "S1BitInt", FieldType { encoding: Encoding::S1Int, ..BIT_INT };
    UBIT_ENUM = "UBitEnum", BIT_ENUM;
    SBIT_ENUM = "SBitEnum", FieldType { encoding: Encoding::SInt, ..BIT_ENUM };
    BIT_BOOL = "BitBool", FieldType {
        flags: TypeFlags { is_bit_based: true, is_var_size: true, ..BOOL_FLAGS },
        node_class: NodeClass::Data,
        ..BIT_INT
    };
}

// Big integers, width from SIZE.
twins! {
    UINT_BIG / UINT_BIG_BE = "UIntBig", BIG_INT;
    SINT_BIG / SINT_BIG_BE = "SIntBig", FieldType { encoding: Encoding::SInt, ..BIG_INT };
    S1INT_BIG / S1INT_BIG_BE = "S1IntBig", FieldType { encoding: Encoding::S1Int, ..BIG_INT };
    UENUM_BIG / UENUM_BIG_BE = "UEnumBig", FieldType {
        flags: TypeFlags { is_var_size: true, ..ENUM_FLAGS },
        node_class: NodeClass::Data,
        ..BIG_INT
    };
    SENUM_BIG / SENUM_BIG_BE = "SEnumBig", FieldType {
        encoding: Encoding::SInt,
        flags: TypeFlags { is_var_size: true, ..ENUM_FLAGS },
        node_class: NodeClass::Data,
        ..BIG_INT
    };
    BOOL_BIG / BOOL_BIG_BE = "BoolBig", FieldType {
        flags: TypeFlags { is_var_size: true, ..BOOL_FLAGS },
        node_class: NodeClass::Data,
        ..BIG_INT
    };
}

// Fixed-width integers.
single! {
    UINT8 = "UInt8", uint(1);
    SINT8 = "SInt8", sint(1);
    UENUM8 = "UEnum8", uenum(1);
    SENUM8 = "SEnum8", senum(1);
    BOOL8 = "Bool8", boolean(1);
}

const fn uint(size: usize) -> FieldType {
    FieldType { size, ..FIXED_INT }
}

const fn sint(size: usize) -> FieldType {
    FieldType {
        size,
        encoding: Encoding::SInt,
        ..FIXED_INT
    }
}

const fn uenum(size: usize) -> FieldType {
    FieldType {
        size,
        flags: ENUM_FLAGS,
        node_class: NodeClass::Data,
        ..FIXED_INT
    }
}

const fn senum(size: usize) -> FieldType {
    FieldType {
        encoding: Encoding::SInt,
        ..uenum(size)
    }
}

const fn boolean(size: usize) -> FieldType {
    FieldType {
        size,
        flags: BOOL_FLAGS,
        node_class: NodeClass::Data,
        ..FIXED_INT
    }
}

twins! {
    UINT16 / UINT16_BE = "UInt16", uint(2);
    UINT24 / UINT24_BE = "UInt24", uint(3);
    UINT32 / UINT32_BE = "UInt32", uint(4);
    UINT64 / UINT64_BE = "UInt64", uint(8);
    SINT16 / SINT16_BE = "SInt16", sint(2);
    SINT24 / SINT24_BE = "SInt24", sint(3);
    SINT32 / SINT32_BE = "SInt32", sint(4);
    SINT64 / SINT64_BE = "SInt64", sint(8);
    POINTER32 / POINTER32_BE = "Pointer32", uint(4);
    POINTER64 / POINTER64_BE = "Pointer64", uint(8);
    UENUM16 / UENUM16_BE = "UEnum16", uenum(2);
    UENUM24 / UENUM24_BE = "UEnum24", uenum(3);
    UENUM32 / UENUM32_BE = "UEnum32", uenum(4);
    UENUM64 / UENUM64_BE = "UEnum64", uenum(8);
    SENUM16 / SENUM16_BE = "SEnum16", senum(2);
    SENUM24 / SENUM24_BE = "SEnum24", senum(3);
    SENUM32 / SENUM32_BE = "SEnum32", senum(4);
    SENUM64 / SENUM64_BE = "SEnum64", senum(8);
    BOOL16 / BOOL16_BE = "Bool16", boolean(2);
    BOOL24 / BOOL24_BE = "Bool24", boolean(3);
    BOOL32 / BOOL32_BE = "Bool32", boolean(4);
    BOOL64 / BOOL64_BE = "Bool64", boolean(8);
}

// Floats and timestamps.
twins! {
    FLOAT / FLOAT_BE = "Float", FieldType { size: 4, ..FLOAT_BASE };
    DOUBLE / DOUBLE_BE = "Double", FieldType { size: 8, ..FLOAT_BASE };
    FLOAT_TIMESTAMP / FLOAT_TIMESTAMP_BE = "FloatTimestamp", FieldType {
        size: 4,
        encoding: Encoding::Float,
        ..TIMESTAMP_BASE
    };
    DOUBLE_TIMESTAMP / DOUBLE_TIMESTAMP_BE = "DoubleTimestamp", FieldType {
        size: 8,
        encoding: Encoding::Float,
        ..TIMESTAMP_BASE
    };
    TIMESTAMP32 / TIMESTAMP32_BE = "Timestamp32", FieldType { size: 4, ..TIMESTAMP_BASE };
    TIMESTAMP64 / TIMESTAMP64_BE = "Timestamp64", FieldType { size: 8, ..TIMESTAMP_BASE };
}

// Typed arrays. `size` is the item size.
single! {
    UINT8_ARRAY = "UInt8Array", FieldType { size: 1, ..TYPED_ARRAY };
    SINT8_ARRAY = "SInt8Array", FieldType { size: 1, encoding: Encoding::SInt, ..TYPED_ARRAY };
}

twins! {
    UINT16_ARRAY / UINT16_ARRAY_BE = "UInt16Array", FieldType { size: 2, ..TYPED_ARRAY };
    UINT32_ARRAY / UINT32_ARRAY_BE = "UInt32Array", FieldType { size: 4, ..TYPED_ARRAY };
    UINT64_ARRAY / UINT64_ARRAY_BE = "UInt64Array", FieldType { size: 8, ..TYPED_ARRAY };
    SINT16_ARRAY / SINT16_ARRAY_BE = "SInt16Array", FieldType {
        size: 2,
        encoding: Encoding::SInt,
        ..TYPED_ARRAY
    };
    SINT32_ARRAY / SINT32_ARRAY_BE = "SInt32Array", FieldType {
        size: 4,
        encoding: Encoding::SInt,
        ..TYPED_ARRAY
    };
    SINT64_ARRAY / SINT64_ARRAY_BE = "SInt64Array", FieldType {
        size: 8,
        encoding: Encoding::SInt,
        ..TYPED_ARRAY
    };
    FLOAT_ARRAY / FLOAT_ARRAY_BE = "FloatArray", FieldType {
        size: 4,
        encoding: Encoding::Float,
        ..TYPED_ARRAY
    };
    DOUBLE_ARRAY / DOUBLE_ARRAY_BE = "DoubleArray", FieldType {
        size: 8,
        encoding: Encoding::Float,
        ..TYPED_ARRAY
    };
}

// Raw bytes and strings.
single! {
    BYTES_RAW = "BytesRaw", BYTES;
    BYTES_RAW_ENUM = "BytesRawEnum", FieldType {
        flags: TypeFlags { is_var_size: true, is_raw: true, ..ENUM_FLAGS },
        node_class: NodeClass::Data,
        ..BYTES
    };

    STR_ASCII = "StrAscii", string(StrKind::Fixed, TextEncoding::Ascii);
    STR_LATIN1 = "StrLatin1", string(StrKind::Fixed, TextEncoding::Latin1);
    STR_UTF8 = "StrUtf8", string(StrKind::Fixed, TextEncoding::Utf8);
    STR_NNT_ASCII = "StrNntAscii", string(StrKind::NotTerminated, TextEncoding::Ascii);
    STR_NNT_LATIN1 = "StrNntLatin1", string(StrKind::NotTerminated, TextEncoding::Latin1);
    STR_NNT_UTF8 = "StrNntUtf8", string(StrKind::NotTerminated, TextEncoding::Utf8);
    CSTR_ASCII = "CStrAscii", string(StrKind::CString, TextEncoding::Ascii);
    CSTR_LATIN1 = "CStrLatin1", string(StrKind::CString, TextEncoding::Latin1);
    CSTR_UTF8 = "CStrUtf8", string(StrKind::CString, TextEncoding::Utf8);
    STR_RAW_ASCII = "StrRawAscii", string(StrKind::Raw, TextEncoding::Ascii);
    STR_RAW_LATIN1 = "StrRawLatin1", string(StrKind::Raw, TextEncoding::Latin1);
    STR_RAW_UTF8 = "StrRawUtf8", string(StrKind::Raw, TextEncoding::Utf8);

    STR_HEX = "StrHex", FieldType {
        size: 1,
        encoding: Encoding::Bytes,
        ..string(StrKind::Hex, TextEncoding::Ascii)
    };
    STR_ASCII_ENUM = "StrAsciiEnum", FieldType {
        flags: TypeFlags {
            is_str: true,
            is_var_size: true,
            is_delimited: true,
            ..ENUM_FLAGS
        },
        node_class: NodeClass::Data,
        ..string(StrKind::Fixed, TextEncoding::Ascii)
    };
    STR_UTF8_ENUM = "StrUtf8Enum", FieldType {
        flags: TypeFlags {
            is_str: true,
            is_var_size: true,
            is_delimited: true,
            ..ENUM_FLAGS
        },
        node_class: NodeClass::Data,
        ..string(StrKind::Fixed, TextEncoding::Utf8)
    };
}

twins! {
    STR_UTF16 / STR_UTF16_BE = "StrUtf16", string(StrKind::Fixed, TextEncoding::Utf16);
    STR_UTF32 / STR_UTF32_BE = "StrUtf32", string(StrKind::Fixed, TextEncoding::Utf32);
    STR_NNT_UTF16 / STR_NNT_UTF16_BE = "StrNntUtf16",
        string(StrKind::NotTerminated, TextEncoding::Utf16);
    STR_NNT_UTF32 / STR_NNT_UTF32_BE = "StrNntUtf32",
        string(StrKind::NotTerminated, TextEncoding::Utf32);
    CSTR_UTF16 / CSTR_UTF16_BE = "CStrUtf16", string(StrKind::CString, TextEncoding::Utf16);
    CSTR_UTF32 / CSTR_UTF32_BE = "CStrUtf32", string(StrKind::CString, TextEncoding::Utf32);
    STR_RAW_UTF16 / STR_RAW_UTF16_BE = "StrRawUtf16", string(StrKind::Raw, TextEncoding::Utf16);
    STR_RAW_UTF32 / STR_RAW_UTF32_BE = "StrRawUtf32", string(StrKind::Raw, TextEncoding::Utf32);
}

/// Every registered little-endian (or endian-neutral) type.
pub static ALL: &[&FieldType] = &[
    &VOID, &PAD, &CONTAINER, &STRUCT, &ARRAY, &WHILE_ARRAY, &SWITCH, &STREAM_ADAPTER, &UNION,
    &BIT_STRUCT, &BIT, &UBIT_INT, &SBIT_INT, &S1BIT_INT, &UBIT_ENUM, &SBIT_ENUM, &BIT_BOOL,
    &UINT_BIG, &SINT_BIG, &S1INT_BIG, &UENUM_BIG, &SENUM_BIG, &BOOL_BIG,
    &UINT8, &SINT8, &UENUM8, &SENUM8, &BOOL8,
    &UINT16, &UINT24, &UINT32, &UINT64, &SINT16, &SINT24, &SINT32, &SINT64,
    &POINTER32, &POINTER64,
    &UENUM16, &UENUM24, &UENUM32, &UENUM64, &SENUM16, &SENUM24, &SENUM32, &SENUM64,
    &BOOL16, &BOOL24, &BOOL32, &BOOL64,
    &FLOAT, &DOUBLE, &FLOAT_TIMESTAMP, &DOUBLE_TIMESTAMP, &TIMESTAMP32, &TIMESTAMP64,
    &UINT8_ARRAY, &SINT8_ARRAY, &UINT16_ARRAY, &UINT32_ARRAY, &UINT64_ARRAY,
    &SINT16_ARRAY, &SINT32_ARRAY, &SINT64_ARRAY, &FLOAT_ARRAY, &DOUBLE_ARRAY,
    &BYTES_RAW, &BYTES_RAW_ENUM,
    &STR_ASCII, &STR_LATIN1, &STR_UTF8, &STR_UTF16, &STR_UTF32,
    &STR_NNT_ASCII, &STR_NNT_LATIN1, &STR_NNT_UTF8, &STR_NNT_UTF16, &STR_NNT_UTF32,
    &CSTR_ASCII, &CSTR_LATIN1, &CSTR_UTF8, &CSTR_UTF16, &CSTR_UTF32,
    &STR_RAW_ASCII, &STR_RAW_LATIN1, &STR_RAW_UTF8, &STR_RAW_UTF16, &STR_RAW_UTF32,
    &STR_HEX, &STR_ASCII_ENUM, &STR_UTF8_ENUM,
];

/// Find a type by name. A `_be` suffix selects the big-endian twin and a
/// `_le` suffix the little-endian one.
pub fn lookup(name: &str) -> Option<&'static FieldType> {
    let (base, endian) = match name.len().checked_sub(3).map(|i| name.split_at(i)) {
        Some((base, suffix)) if suffix.eq_ignore_ascii_case("_be") => (base, Some(Endian::Big)),
        Some((base, suffix)) if suffix.eq_ignore_ascii_case("_le") => (base, Some(Endian::Little)),
        _ => (name, None),
    };
    let found: &'static FieldType = ALL.iter().copied().find(|ft| ft.name == base)?;
    Some(match endian {
        Some(endian) => found.with_endian(endian),
        None => found,
    })
}
