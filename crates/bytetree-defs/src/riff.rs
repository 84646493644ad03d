//! RIFF/WAVE audio files.
//!
//! The header is followed by chunks until the input runs out. A chunk whose
//! declared length would run past the end stops the chunk list; whatever
//! follows is not part of the parse.

use std::sync::Arc;

use bytetree_core::builder::{
    container_desc, enum_desc, field, struct_desc, switch_desc, while_array_desc, DescriptorBuilder,
};
use bytetree_core::field_types::{BYTES_RAW, UENUM16, UINT16, UINT32};
use bytetree_core::{AttrIndex, BlockTree, Case, CaseKey, DescRef, FieldContext, Meta, NodeId, Result};

/// `RIFF` read as a little-endian u32.
pub const RIFF_SIG: u32 = u32::from_le_bytes(*b"RIFF");
/// `WAVE` read as a little-endian u32.
pub const WAVE_SIG: u32 = u32::from_le_bytes(*b"WAVE");

const FORMATS: [(&str, u16); 12] = [
    ("pcm", 0x0001),
    ("ms_adpcm", 0x0002),
    ("pcm_float", 0x0003),
    ("g_711_a_law", 0x0006),
    ("g_711_u_law", 0x0007),
    ("ima_adpcm", 0x0011),
    ("yamaha_adpcm", 0x0014),
    ("gsm_6_10", 0x0031),
    ("g_721_adpcm", 0x0040),
    ("mpeg", 0x0050),
    ("xbox_adpcm", 0x0069),
    ("wmaudio2", 0x0161),
];

/// Whether another whole chunk (8-byte head plus declared data) fits.
fn has_next_chunk(ctx: &FieldContext<'_>) -> Result<bool> {
    let Some(mut reader) = ctx.reader() else {
        return Ok(false);
    };
    if reader.remaining() < 8 {
        return Ok(false);
    }
    reader.advance(4)?;
    let len = reader.read_u32()? as usize;
    Ok(reader.remaining() >= len)
}

/// The four-character id of the chunk at the cursor.
fn chunk_id(ctx: &FieldContext<'_>) -> Result<CaseKey> {
    let id = ctx
        .reader()
        .and_then(|reader| reader.peek_bytes(4).ok())
        .map(|bytes| bytes.iter().map(|&b| b as char).collect::<String>())
        .unwrap_or_default();
    Ok(CaseKey::Str(id))
}

fn chunk_data_size(ctx: &FieldContext<'_>, extra: usize) -> Result<usize> {
    let Some(chunk) = ctx.parent else {
        return Ok(0);
    };
    let declared = ctx.tree.get_int(chunk, "data_size")?;
    Ok(usize::try_from(declared).unwrap_or(0).saturating_sub(extra))
}

/// `SIZE` of a chunk's trailing bytes: the declared chunk length minus
/// `extra` bytes of fixed fields. Setting it rewrites `data_size`.
fn trailing_size(extra: usize) -> Meta {
    Meta::func_with_setter(
        move |ctx| chunk_data_size(ctx, extra),
        move |tree: &mut BlockTree, chunk: NodeId, _: Option<AttrIndex>, size: usize| {
            tree.set(chunk, "data_size", size + extra)
        },
    )
}

fn chunk(name: &str, sig: &[u8; 4], extra: usize, fields: Vec<DescriptorBuilder>) -> DescriptorBuilder {
    let mut entries = vec![
        field(&UINT32, "sig").default(u32::from_le_bytes(*sig)),
        field(&UINT32, "data_size").default(extra as u32),
    ];
    entries.extend(fields);
    entries.push(field(&BYTES_RAW, "data").size(trailing_size(extra)));
    container_desc(name, entries)
}

/// The `fmt ` chunk. Fields past the 16 standard bytes are kept raw.
fn format_chunk() -> DescriptorBuilder {
    chunk(
        "format",
        b"fmt ",
        16,
        vec![
            enum_desc(&UENUM16, "fmt", FORMATS).default(1u16),
            field(&UINT16, "channels").default(2u16),
            field(&UINT32, "sample_rate").default(22050u32),
            field(&UINT32, "byte_rate").default(88200u32),
            field(&UINT16, "block_align").default(4u16),
            field(&UINT16, "bits_per_sample").default(16u16),
        ],
    )
}

fn chunk_switch() -> DescriptorBuilder {
    let select: Arc<dyn Fn(&FieldContext<'_>) -> Result<CaseKey> + Send + Sync> = Arc::new(chunk_id);
    switch_desc(
        "chunk",
        Case::Select(select),
        [
            ("fmt ", format_chunk()),
            ("data", chunk("data_chunk", b"data", 0, Vec::new())),
            ("fact", chunk("fact", b"fact", 4, vec![field(&UINT32, "sample_count")])),
        ],
        Some(chunk("unknown_chunk", &[0; 4], 0, Vec::new())),
    )
}

/// The WAVE definition.
pub fn wav_def() -> Result<DescRef> {
    container_desc(
        "wav",
        [
            struct_desc(
                "header",
                [
                    field(&UINT32, "riff_sig").default(RIFF_SIG),
                    field(&UINT32, "filesize"),
                    field(&UINT32, "wave_sig").default(WAVE_SIG),
                ],
            ),
            while_array_desc("chunks", has_next_chunk, chunk_switch()),
        ],
    )
    .build()
}

/// Set the RIFF `filesize` from the serialized size of everything after it.
pub fn update_filesize(tree: &mut BlockTree, root: NodeId) -> Result<()> {
    let total = tree.binsize(root)?;
    let header = tree.get_block(root, "header")?;
    tree.set(header, "filesize", total.saturating_sub(8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytetree_core::{Tag, TagOptions, Value};

    fn sample() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&42u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&8000u32.to_le_bytes());
        out.extend_from_slice(&16000u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(&[1, 0, 2, 0, 3, 0]);
        out
    }

    #[test]
    fn test_wav_round_trip() {
        let raw = sample();
        let mut tag = Tag::parse(wav_def().unwrap(), &raw, TagOptions::default()).unwrap();
        assert_eq!(tag.parsed_len(), raw.len());

        let tree = tag.tree();
        let chunks = tree.get_block(tag.root(), "chunks").unwrap();
        assert_eq!(tree.len(chunks), 2);
        let format = tree.get_block(chunks, 0usize).unwrap();
        assert_eq!(tree.name(format), "format");
        assert_eq!(tree.get_int(format, "sample_rate").unwrap(), 8000);
        let fmt = tree.get_block(format, "fmt").unwrap();
        assert_eq!(tree.enum_name(fmt), Some("pcm"));
        let data = tree.get_block(chunks, 1usize).unwrap();
        assert_eq!(tree.get(data, "data").unwrap(), &Value::Bytes(vec![1, 0, 2, 0, 3, 0]));

        assert_eq!(tag.serialize().unwrap(), raw);
    }

    #[test]
    fn test_unknown_chunk_uses_fallback() {
        let mut raw = sample();
        raw.extend_from_slice(b"LIST");
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.extend_from_slice(&[0xab, 0xcd]);
        let mut tag = Tag::parse(wav_def().unwrap(), &raw, TagOptions::default()).unwrap();
        let tree = tag.tree();
        let chunks = tree.get_block(tag.root(), "chunks").unwrap();
        let unknown = tree.get_block(chunks, 2usize).unwrap();
        assert_eq!(tree.name(unknown), "unknown_chunk");
        assert_eq!(tree.get(unknown, "data").unwrap(), &Value::Bytes(vec![0xab, 0xcd]));
        assert_eq!(tag.serialize().unwrap(), raw);
    }

    #[test]
    fn test_truncated_chunk_ends_list() {
        let mut raw = sample();
        raw.extend_from_slice(b"data");
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(&[0; 4]);
        let tag = Tag::parse(wav_def().unwrap(), &raw, TagOptions::default()).unwrap();
        let chunks = tag.tree().get_block(tag.root(), "chunks").unwrap();
        assert_eq!(tag.tree().len(chunks), 2);
        assert_eq!(tag.parsed_len(), raw.len() - 12);
    }

    #[test]
    fn test_resizing_data_updates_chunk_length() {
        let raw = sample();
        let mut tag = Tag::parse(wav_def().unwrap(), &raw, TagOptions::default()).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        let chunks = tree.get_block(root, "chunks").unwrap();
        let data = tree.get_block(chunks, 1usize).unwrap();
        tree.set(data, "data", vec![9u8; 10]).unwrap();
        tree.set_size(data, Some(AttrIndex::Index(2)), None, None).unwrap();
        assert_eq!(tree.get_int(data, "data_size").unwrap(), 10);

        update_filesize(tree, root).unwrap();
        let header = tree.get_block(root, "header").unwrap();
        assert_eq!(tree.get_int(header, "filesize").unwrap(), 46);
        let bytes = tag.serialize().unwrap();
        assert_eq!(bytes.len(), raw.len() + 4);
        assert_eq!(&bytes[40..44], &10u32.to_le_bytes());
    }
}
