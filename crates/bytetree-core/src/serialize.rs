//! Serializers: the mirror image of [`crate::parse`].
//!
//! A serializer writes one field's value at `root_offset + offset` of the
//! [`BinaryWriter`] in its [`SerializeState`] and returns the offset after
//! it. Blocks are always dispatched on their own descriptor, so a block
//! that a switch or a descriptor edit placed in a slot is written the way
//! it was parsed.

use bytetree_common::{BinaryWriter, Endian};
use tracing::trace;

use crate::block::{meta, AttrIndex, BlockTree, NodeId};
use crate::descriptor::{DescRef, FieldContext};
use crate::error::{Frame, Phase};
use crate::field_type::{CodecContext, Encoded};
use crate::{Error, Result, Value};

/// Where and what a serializer writes.
#[derive(Debug, Clone, Copy)]
pub struct SerializeArgs<'a> {
    pub desc: &'a DescRef,
    pub value: &'a Value,
    pub parent: Option<NodeId>,
    pub attr_index: Option<AttrIndex>,
    pub root_offset: usize,
    pub offset: usize,
}

/// State threaded through one serialization.
pub struct SerializeState<'a> {
    pub tree: &'a BlockTree,
    pub writer: &'a mut BinaryWriter,
    steptree_parents: Option<Vec<NodeId>>,
}

impl<'a> SerializeState<'a> {
    pub fn new(tree: &'a BlockTree, writer: &'a mut BinaryWriter) -> Self {
        Self {
            tree,
            writer,
            steptree_parents: None,
        }
    }
}

fn align(offset: usize, align: Option<usize>) -> usize {
    match align {
        Some(a) if a > 1 => offset + (a - offset % a) % a,
        _ => offset,
    }
}

fn context<'b>(args: &SerializeArgs<'b>, tree: &'b BlockTree, node: Option<NodeId>, offset: usize) -> FieldContext<'b> {
    FieldContext {
        tree,
        desc: args.desc,
        parent: args.parent,
        node,
        attr_index: args.attr_index,
        raw: None,
        root_offset: args.root_offset,
        offset,
    }
}

fn start_offset(args: &SerializeArgs<'_>, tree: &BlockTree, node: Option<NodeId>) -> Result<usize> {
    if let (Some(_), Some(pointer)) = (args.attr_index, &args.desc.pointer) {
        return meta::eval_meta(pointer, &context(args, tree, node, args.offset));
    }
    Ok(align(args.offset, args.desc.align))
}

fn block_of(args: &SerializeArgs<'_>) -> Result<NodeId> {
    args.value.as_block().ok_or_else(|| {
        Error::descriptor(format!(
            "'{}' ({}) expects a block, found a {}",
            args.desc.name,
            args.desc.field_type,
            args.value.kind_name()
        ))
    })
}

/// Serialize one field through its type's serializer.
pub fn serialize_field(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let own;
    let args = match args.value {
        Value::Block(id) => {
            own = state.tree.desc(*id)?.clone();
            SerializeArgs { desc: &own, ..*args }
        }
        _ => *args,
    };
    let ft = args.desc.field_type;
    trace!(field = %args.desc.name, field_type = %ft, offset = args.offset, "serialize");
    let end = (ft.serializer)(&args, state).map_err(|e| {
        e.with_frame(
            Phase::Serialize,
            Frame::at(
                args.desc,
                state.tree,
                args.parent,
                args.attr_index,
                args.root_offset + args.offset,
            ),
        )
    })?;
    Ok(if args.desc.carry_off { end } else { args.offset })
}

/// Serialize the tree's root block.
pub fn serialize_tree(tree: &BlockTree, root_offset: usize) -> Result<Vec<u8>> {
    let root = tree
        .root()
        .ok_or_else(|| Error::descriptor("the tree has no root block"))?;
    let desc = tree.desc(root)?.clone();
    let value = Value::Block(root);
    let mut writer = BinaryWriter::new();
    let mut state = SerializeState::new(tree, &mut writer);
    let args = SerializeArgs {
        desc: &desc,
        value: &value,
        parent: None,
        attr_index: None,
        root_offset,
        offset: 0,
    };
    serialize_field(&args, &mut state)?;
    Ok(writer.into_inner())
}

/// Serialize one slot's value on its own, starting at offset 0.
pub(crate) fn serialize_child(
    tree: &BlockTree,
    desc: &DescRef,
    value: &Value,
    parent: NodeId,
    attr: AttrIndex,
) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    let mut state = SerializeState::new(tree, &mut writer);
    let args = SerializeArgs {
        desc,
        value,
        parent: Some(parent),
        attr_index: Some(attr),
        root_offset: 0,
        offset: 0,
    };
    serialize_field(&args, &mut state)?;
    Ok(writer.into_inner())
}

/// Serialize a stream adapter's wrapped structure and run it through the
/// adapter's encoder.
fn encode_wrapped(tree: &BlockTree, id: NodeId) -> Result<Vec<u8>> {
    let desc = tree.desc(id)?;
    let adapter = desc.adapter.clone().ok_or_else(|| {
        Error::descriptor(format!("stream adapter '{}' has no ENCODER", desc.name))
    })?;
    let sub = tree.attr_desc(id, AttrIndex::Data)?;
    let inner = serialize_child(tree, &sub, tree.slot(id, AttrIndex::Data)?, id, AttrIndex::Data)?;
    let ctx = FieldContext {
        node: Some(id),
        parent: tree.parent(id),
        attr_index: tree.index_in_parent(id),
        ..FieldContext::detached(tree, desc)
    };
    adapter.encode(&ctx, inner)
}

/// Encoded byte length of a stream adapter block.
pub(crate) fn wrapper_binsize(tree: &BlockTree, id: NodeId) -> Result<usize> {
    encode_wrapped(tree, id).map(|bytes| bytes.len())
}

fn open_scope(state: &mut SerializeState<'_>, desc: &DescRef, id: NodeId) -> Option<Option<Vec<NodeId>>> {
    let opened = if state.steptree_parents.is_none() || desc.steptree_root {
        Some(state.steptree_parents.replace(Vec::new()))
    } else {
        None
    };
    if desc.steptree.is_some() {
        if let Some(parents) = state.steptree_parents.as_mut() {
            parents.push(id);
        }
    }
    opened
}

fn close_scope(
    state: &mut SerializeState<'_>,
    args: &SerializeArgs<'_>,
    saved: Option<Vec<NodeId>>,
    mut offset: usize,
) -> Result<usize> {
    let parents = state.steptree_parents.take().unwrap_or_default();
    for parent in parents {
        offset = serialize_steptree(state, args, parent, offset)?;
    }
    state.steptree_parents = saved;
    Ok(offset)
}

fn serialize_steptree(
    state: &mut SerializeState<'_>,
    args: &SerializeArgs<'_>,
    parent: NodeId,
    offset: usize,
) -> Result<usize> {
    let tree = state.tree;
    let desc = tree.attr_desc(parent, AttrIndex::Steptree)?;
    let child = SerializeArgs {
        desc: &desc,
        value: tree.slot(parent, AttrIndex::Steptree)?,
        parent: Some(parent),
        attr_index: Some(AttrIndex::Steptree),
        root_offset: args.root_offset,
        offset,
    };
    serialize_field(&child, state)
}

/// Serializer for types that hold nothing.
pub fn void_serializer(args: &SerializeArgs<'_>, _state: &mut SerializeState<'_>) -> Result<usize> {
    Ok(args.offset)
}

/// Serializer for padding: `SIZE` zero bytes.
pub fn pad_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let offset = align(args.offset, args.desc.align);
    let size = meta::declared_size(&context(args, state.tree, None, offset))?;
    state.writer.seek(args.root_offset + offset);
    state.writer.write_zeros(size);
    Ok(offset + size)
}

/// Serializer for containers.
pub fn container_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let tree = state.tree;
    let id = block_of(args)?;
    let scope = open_scope(state, args.desc, id);
    let mut offset = start_offset(args, tree, Some(id))?;
    for (i, entry) in args.desc.entries.iter().enumerate() {
        let index = AttrIndex::Index(i);
        let child = SerializeArgs {
            desc: entry,
            value: tree.slot(id, index)?,
            parent: Some(id),
            attr_index: Some(index),
            root_offset: args.root_offset,
            offset,
        };
        offset = serialize_field(&child, state)?;
    }
    match scope {
        Some(saved) => close_scope(state, args, saved, offset),
        None => Ok(offset),
    }
}

/// Serializer for arrays and while-arrays: every element, in order.
pub fn array_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let tree = state.tree;
    let id = block_of(args)?;
    let sub = args.desc.sub_struct.clone().ok_or_else(|| {
        Error::descriptor(format!("array '{}' has no SUB_STRUCT", args.desc.name))
    })?;
    let scope = open_scope(state, args.desc, id);
    let mut offset = start_offset(args, tree, Some(id))?;
    for (index, value) in tree.children(id) {
        if index == AttrIndex::Steptree {
            continue;
        }
        let child = SerializeArgs {
            desc: &sub,
            value,
            parent: Some(id),
            attr_index: Some(index),
            root_offset: args.root_offset,
            offset,
        };
        offset = serialize_field(&child, state)?;
    }
    match scope {
        Some(saved) => close_scope(state, args, saved, offset),
        None => Ok(offset),
    }
}

/// Serializer for structs: zero the whole `SIZE` region, then write every
/// field at its offset inside it.
pub fn struct_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let tree = state.tree;
    let desc = args.desc;
    let id = block_of(args)?;
    let offset = start_offset(args, tree, Some(id))?;
    let size = tree.get_size(id, None)?;

    state.writer.seek(args.root_offset + offset);
    state.writer.write_zeros(size);

    for (i, (entry, field_offset)) in desc.entries.iter().zip(&desc.attr_offs).enumerate() {
        let index = AttrIndex::Index(i);
        let child = SerializeArgs {
            desc: entry,
            value: tree.slot(id, index)?,
            parent: Some(id),
            attr_index: Some(index),
            root_offset: args.root_offset,
            offset: offset + field_offset,
        };
        serialize_field(&child, state)?;
    }

    let end = offset + size;
    if desc.steptree.is_none() {
        return Ok(end);
    }
    match state.steptree_parents.as_mut() {
        Some(parents) => {
            parents.push(id);
            Ok(end)
        }
        None => serialize_steptree(state, args, id, end),
    }
}

/// Serializer for switches holding a leaf value. The case is re-selected
/// from the tree, since a leaf carries no descriptor of its own.
pub fn switch_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let key = meta::select_case(&context(args, state.tree, None, args.offset))?;
    let case = args.desc.case_desc(key.as_ref()).cloned().ok_or_else(|| {
        Error::descriptor(format!(
            "switch '{}' has no case for {:?} and no DEFAULT",
            args.desc.name, key
        ))
    })?;
    serialize_field(&SerializeArgs { desc: &case, ..*args }, state)
}

/// Serializer for unions: the buffer with the active view flushed into it.
pub fn union_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let id = block_of(args)?;
    let offset = start_offset(args, state.tree, Some(id))?;
    let bytes = state.tree.render_union(id)?;
    state.writer.seek(args.root_offset + offset);
    state.writer.write_bytes(&bytes);
    Ok(offset + bytes.len())
}

/// Serializer for stream adapters: the wrapped structure is written to a
/// scratch buffer from offset 0, then encoded into the outer stream.
pub fn stream_adapter_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let id = block_of(args)?;
    let offset = start_offset(args, state.tree, Some(id))?;
    let bytes = encode_wrapped(state.tree, id)?;
    state.writer.seek(args.root_offset + offset);
    state.writer.write_bytes(&bytes);
    Ok(offset + bytes.len())
}

/// The low `size` bytes of a bit struct's integer in its byte order.
pub(crate) fn bits_to_bytes(bits: u128, size: usize, endian: Endian) -> Vec<u8> {
    let be = bits.to_be_bytes();
    let mut out = be[16 - size.min(16)..].to_vec();
    if !endian.is_big() {
        out.reverse();
    }
    out
}

/// Serializer for bit structs: every field's bits are OR-ed into one
/// integer, which is written once.
pub fn bit_struct_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let tree = state.tree;
    let desc = args.desc;
    let id = block_of(args)?;
    let offset = start_offset(args, tree, Some(id))?;
    let size = tree.get_size(id, None)?;
    if size > 16 {
        return Err(Error::descriptor(format!(
            "bit struct '{}' is {} bytes, at most 16 are supported",
            desc.name, size
        )));
    }

    let mut whole = 0u128;
    for (i, entry) in desc.entries.iter().enumerate() {
        let index = AttrIndex::Index(i);
        let slot = tree.slot(id, index)?;
        let field_desc = match slot {
            Value::Block(child) => tree.desc(*child)?.clone(),
            _ => entry.clone(),
        };
        let ctx = FieldContext {
            desc: &field_desc,
            parent: Some(id),
            attr_index: Some(index),
            ..context(args, tree, None, offset)
        };
        let encoded = meta::declared_size(&ctx).and_then(|width| {
            let codec = CodecContext {
                desc: &field_desc,
                size: width,
                bit_offset: desc.attr_offs.get(i).copied().unwrap_or(0) as u32,
            };
            let ft = field_desc.field_type;
            (ft.encoder)(ft, tree.data_value(slot), &codec)
        });
        match encoded {
            Ok(Encoded::Bits { value, offset: shift, mask }) => whole |= (value & mask) << shift,
            Ok(Encoded::Bytes(_)) => {
                return Err(Error::descriptor(format!(
                    "'{}' ({}) is not bit-based but sits in bit struct '{}'",
                    field_desc.name, field_desc.field_type, desc.name
                )))
            }
            Err(e) => {
                return Err(e.with_frame(
                    Phase::Serialize,
                    Frame::at(&field_desc, tree, Some(id), Some(index), args.root_offset + offset),
                ))
            }
        }
    }

    state.writer.seek(args.root_offset + offset);
    state
        .writer
        .write_bytes(&bits_to_bytes(whole, size, desc.field_type.endian));
    Ok(offset + size)
}

/// Bit fields are only ever written by their enclosing bit struct.
pub fn bit_field_serializer(args: &SerializeArgs<'_>, _state: &mut SerializeState<'_>) -> Result<usize> {
    Err(Error::descriptor(format!(
        "bit field '{}' ({}) must sit inside a bit struct",
        args.desc.name, args.desc.field_type
    )))
}

/// Serializer for byte-sized leaf values. Short encodings are padded with
/// zeros up to the field's size.
pub fn data_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let tree = state.tree;
    let desc = args.desc;
    let ft = desc.field_type;
    let node = args.value.as_block();
    let value = tree.data_value(args.value);
    let offset = start_offset(args, tree, node)?;
    let size = match &desc.size {
        Some(size) => meta::eval_meta(size, &context(args, tree, node, offset))?,
        None if ft.flags.is_var_size => (ft.sizecalc)(ft, value)?,
        None => ft.size,
    };
    let bytes = match (ft.encoder)(ft, value, &CodecContext::new(desc, size))? {
        Encoded::Bytes(bytes) => bytes,
        Encoded::Bits { .. } => {
            return Err(Error::descriptor(format!(
                "'{}' ({}) encodes to bits outside a bit struct",
                desc.name, ft
            )))
        }
    };
    if bytes.len() > size {
        return Err(Error::codec(format!(
            "'{}' encodes to {} bytes but its size is {}",
            desc.name,
            bytes.len(),
            size
        )));
    }
    state.writer.seek(args.root_offset + offset);
    state.writer.write_bytes(&bytes);
    state.writer.write_zeros(size - bytes.len());
    Ok(offset + size)
}

/// Serializer for C strings: the encoded text plus its terminator.
pub fn cstring_serializer(args: &SerializeArgs<'_>, state: &mut SerializeState<'_>) -> Result<usize> {
    let tree = state.tree;
    let desc = args.desc;
    let ft = desc.field_type;
    let node = args.value.as_block();
    let value = tree.data_value(args.value);
    let offset = start_offset(args, tree, node)?;
    let bytes = match (ft.encoder)(ft, value, &CodecContext::new(desc, 0))? {
        Encoded::Bytes(bytes) => bytes,
        Encoded::Bits { .. } => return Err(Error::codec(format!("{} encoded to bits", ft))),
    };
    state.writer.seek(args.root_offset + offset);
    state.writer.write_bytes(&bytes);
    Ok(offset + bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{
        array_desc, bit_struct_desc, container_desc, field, pad, struct_desc, switch_desc,
    };
    use crate::field_types::*;
    use crate::{Tag, TagOptions};

    #[test]
    fn test_struct_with_padding_round_trip() {
        let def = struct_desc("s", [field(&UINT16, "a"), pad(2), field(&UINT32, "b")])
            .build()
            .unwrap();
        assert_eq!(def.attr_offs, [0, 4]);

        let mut tag = Tag::new(def.clone()).unwrap();
        let root = tag.root();
        tag.tree_mut().set(root, "a", 5u16).unwrap();
        tag.tree_mut().set(root, "b", 100_000u32).unwrap();
        let bytes = tag.serialize().unwrap();
        assert_eq!(bytes, [5, 0, 0, 0, 0xa0, 0x86, 0x01, 0x00]);

        let back = Tag::parse(def, &bytes, TagOptions::default()).unwrap();
        assert_eq!(back.tree().get_int(back.root(), "a").unwrap(), 5);
        assert_eq!(back.tree().get_int(back.root(), "b").unwrap(), 100_000);
    }

    #[test]
    fn test_pad_bytes_are_rewritten_as_zero() {
        let def = struct_desc("s", [field(&UINT16, "a"), pad(2), field(&UINT32, "b")])
            .build()
            .unwrap();
        let raw = [1, 0, 0xff, 0xff, 2, 0, 0, 0];
        let mut tag = Tag::parse(def, &raw, TagOptions::default()).unwrap();
        assert_eq!(tag.serialize().unwrap(), [1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_container_round_trip_is_byte_identical() {
        let def = container_desc(
            "root",
            [
                field(&UINT8, "count"),
                array_desc("items", ".count", field(&UINT16_BE, "v")),
                field(&CSTR_UTF8, "name"),
                switch_desc(
                    "tail",
                    ".count",
                    [(2, field(&UINT32, "wide")), (1, field(&UINT8, "narrow"))],
                    None,
                ),
            ],
        )
        .build()
        .unwrap();
        let raw = [2, 0, 1, 0, 2, b'a', b'b', 0, 7, 0, 0, 0];
        let mut tag = Tag::parse(def, &raw, TagOptions::default()).unwrap();
        assert_eq!(tag.serialize().unwrap(), raw);
    }

    #[test]
    fn test_array_append_updates_count_on_serialize() {
        let def = container_desc(
            "root",
            [
                field(&UINT8, "count"),
                array_desc("items", ".count", field(&UINT8, "v")),
            ],
        )
        .build()
        .unwrap();
        let mut tag = Tag::parse(def, &[1, 9], TagOptions::default()).unwrap();
        let root = tag.root();
        let items = tag.tree().get_block(root, "items").unwrap();
        tag.tree_mut().append(items, Some(Value::from(4u8))).unwrap();
        assert_eq!(tag.serialize().unwrap(), [2, 9, 4]);
    }

    #[test]
    fn test_bit_struct_round_trip() {
        let def = bit_struct_desc(
            &BIT_STRUCT_BE,
            "bits",
            2,
            [
                field(&UBIT_INT, "lo").size(3usize),
                field(&S1BIT_INT, "mid").size(5usize),
                field(&SBIT_INT, "hi").size(8usize),
            ],
        )
        .build()
        .unwrap();
        let mut tag = Tag::new(def.clone()).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        tree.set(root, "lo", 5).unwrap();
        tree.set(root, "mid", -3).unwrap();
        tree.set(root, "hi", -128).unwrap();
        let bytes = tag.serialize().unwrap();
        // hi = 0x80, mid = ones' -3 = 0b11100, lo = 0b101
        assert_eq!(bytes, [0x80, 0b1110_0101]);

        let back = Tag::parse(def, &bytes, TagOptions::default()).unwrap();
        assert_eq!(back.tree().get_int(back.root(), "mid").unwrap(), -3);
        assert_eq!(back.tree().get_int(back.root(), "hi").unwrap(), -128);
    }

    #[test]
    fn test_oversized_value_reports_breadcrumbs() {
        let def = container_desc("root", [field(&STR_NNT_ASCII, "tag").size(2usize)])
            .build()
            .unwrap();
        let mut tag = Tag::new(def).unwrap();
        let root = tag.root();
        tag.tree_mut().set(root, "tag", "toolong").unwrap();
        let err = tag.serialize().unwrap_err();
        assert!(matches!(err, Error::Serialize(_)));
        assert_eq!(err.frames()[0].name, "tag");
        assert!(matches!(err.root_cause(), Error::Codec(_)));
    }

    #[test]
    fn test_bits_to_bytes_orders() {
        assert_eq!(bits_to_bytes(0x0102, 2, Endian::Big), [1, 2]);
        assert_eq!(bits_to_bytes(0x0102, 2, Endian::Little), [2, 1]);
        assert_eq!(bits_to_bytes(0x0102, 3, Endian::Big), [0, 1, 2]);
    }
}
