//! Parsers: descriptor-driven reads into the block tree.
//!
//! Every [`FieldType`](crate::FieldType) carries a [`ParserFn`](crate::field_type::ParserFn)
//! with the same shape. A parser stores what it read into
//! `parent[attr_index]` (or into the detached root slot of the
//! [`ParseState`]) and returns the offset just past the bytes it consumed.
//! Without raw input it builds the descriptor's default value instead and
//! consumes nothing.
//!
//! Recursion always goes through [`parse_field`], which applies
//! `CARRY_OFF` and adds a breadcrumb to any error on the way out.

use bytetree_common::{BinaryReader, Endian};
use tracing::{debug, trace};

use crate::block::{meta, AttrIndex, BlockTree, Node, NodeId, NodeKind};
use crate::codec::text;
use crate::descriptor::{Case, DescRef, FieldContext};
use crate::error::{Frame, Phase};
use crate::field_type::{CodecContext, NodeClass, Raw};
use crate::{CaseKey, Error, Result, Value};

/// Where and what a parser reads.
#[derive(Debug, Clone, Copy)]
pub struct ParseArgs<'a> {
    pub desc: &'a DescRef,
    pub parent: Option<NodeId>,
    pub attr_index: Option<AttrIndex>,
    /// `None` builds defaults instead of reading.
    pub raw: Option<&'a [u8]>,
    pub root_offset: usize,
    pub offset: usize,
}

/// Mutable state threaded through one parse.
pub struct ParseState<'t> {
    pub tree: &'t mut BlockTree,
    /// Blocks of the current steptree scope whose steptree is still
    /// pending, in encounter order. `None` outside any scope.
    steptree_parents: Option<Vec<NodeId>>,
    /// Case keys forced onto the next switches, outermost first.
    case_override: Vec<CaseKey>,
    /// Value parsed without a parent slot.
    detached: Option<Value>,
}

impl<'t> ParseState<'t> {
    pub fn new(tree: &'t mut BlockTree) -> Self {
        Self {
            tree,
            steptree_parents: None,
            case_override: Vec::new(),
            detached: None,
        }
    }

    /// Force the case of the next switches reached, in order.
    pub fn with_case(mut self, case: Vec<CaseKey>) -> Self {
        self.case_override = case;
        self
    }

    /// The value parsed at the top level, if no parent slot received it.
    pub fn take_detached(&mut self) -> Option<Value> {
        self.detached.take()
    }
}

fn align(offset: usize, align: Option<usize>) -> usize {
    match align {
        Some(a) if a > 1 => offset + (a - offset % a) % a,
        _ => offset,
    }
}

fn context<'b>(args: &ParseArgs<'b>, tree: &'b BlockTree, node: Option<NodeId>, offset: usize) -> FieldContext<'b> {
    FieldContext {
        tree,
        desc: args.desc,
        parent: args.parent,
        node,
        attr_index: args.attr_index,
        raw: args.raw,
        root_offset: args.root_offset,
        offset,
    }
}

/// Offset a field starts at: its pointer when it has one and is read from
/// raw data inside a parent, else the aligned cursor.
fn start_offset(args: &ParseArgs<'_>, tree: &BlockTree, node: Option<NodeId>) -> Result<usize> {
    if let (Some(_), Some(_), Some(pointer)) = (args.raw, args.attr_index, &args.desc.pointer) {
        return meta::eval_meta(pointer, &context(args, tree, node, args.offset));
    }
    Ok(align(args.offset, args.desc.align))
}

fn place(state: &mut ParseState<'_>, parent: Option<NodeId>, attr: Option<AttrIndex>, value: Value) -> Result<()> {
    match (parent, attr) {
        (Some(parent), Some(index)) => state.tree.set_slot(parent, index, value),
        _ => {
            state.detached = Some(value);
            Ok(())
        }
    }
}

/// Store a leaf value, wrapping it in a data block when its type wants one.
fn store(
    state: &mut ParseState<'_>,
    desc: &DescRef,
    parent: Option<NodeId>,
    attr: Option<AttrIndex>,
    value: Value,
) -> Result<()> {
    let value = if desc.field_type.node_class == NodeClass::Data {
        Value::Block(state.tree.alloc(Node {
            desc: desc.clone(),
            parent,
            kind: NodeKind::Data(value),
        }))
    } else {
        value
    };
    place(state, parent, attr, value)
}

/// Allocate the block a composite parser fills and hook it into its parent.
fn new_block(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<NodeId> {
    let id = state.tree.alloc(Node::empty(args.desc.clone(), args.parent));
    place(state, args.parent, args.attr_index, Value::Block(id))?;
    Ok(id)
}

fn required_size(args: &ParseArgs<'_>, tree: &BlockTree, node: Option<NodeId>, offset: usize) -> Result<usize> {
    match &args.desc.size {
        Some(size) => meta::eval_meta(size, &context(args, tree, node, offset)),
        None => Err(Error::descriptor(format!(
            "'{}' ({}) has no SIZE",
            args.desc.name, args.desc.field_type
        ))),
    }
}

/// Parse one field through its type's parser.
pub fn parse_field(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let ft = args.desc.field_type;
    trace!(field = %args.desc.name, field_type = %ft, offset = args.offset, "parse");
    let end = (ft.parser)(args, state).map_err(|e| {
        e.with_frame(
            Phase::Parse,
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

/// Parse a descriptor with no parent, returning the value and end offset.
pub fn parse_root(
    tree: &mut BlockTree,
    desc: &DescRef,
    raw: Option<&[u8]>,
    root_offset: usize,
    case: Vec<CaseKey>,
) -> Result<(Value, usize)> {
    let mut state = ParseState::new(tree).with_case(case);
    let args = ParseArgs {
        desc,
        parent: None,
        attr_index: None,
        raw,
        root_offset,
        offset: 0,
    };
    let end = parse_field(&args, &mut state)?;
    Ok((state.take_detached().unwrap_or_default(), end))
}

/// Parse a descriptor into a slot of an existing block, reading from
/// `raw` at `offset` (or building defaults when `raw` is `None`).
pub(crate) fn parse_child(
    tree: &mut BlockTree,
    desc: &DescRef,
    parent: NodeId,
    attr: AttrIndex,
    raw: Option<&[u8]>,
    offset: usize,
) -> Result<usize> {
    let mut state = ParseState::new(tree);
    let args = ParseArgs {
        desc,
        parent: Some(parent),
        attr_index: Some(attr),
        raw,
        root_offset: 0,
        offset,
    };
    parse_field(&args, &mut state)
}

/// Open a steptree scope if none is open or the descriptor asks for one.
///
/// Returns the enclosing scope to restore, when a new one was opened.
fn open_scope(state: &mut ParseState<'_>, args: &ParseArgs<'_>, id: NodeId) -> Option<Option<Vec<NodeId>>> {
    let opened = if state.steptree_parents.is_none() || args.desc.steptree_root {
        Some(state.steptree_parents.replace(Vec::new()))
    } else {
        None
    };
    if args.desc.steptree.is_some() {
        if let Some(parents) = state.steptree_parents.as_mut() {
            parents.push(id);
        }
    }
    opened
}

/// Parse the steptrees collected in the current scope, then restore the
/// enclosing one.
fn close_scope(
    state: &mut ParseState<'_>,
    args: &ParseArgs<'_>,
    saved: Option<Vec<NodeId>>,
    mut offset: usize,
) -> Result<usize> {
    let parents = state.steptree_parents.take().unwrap_or_default();
    for parent in parents {
        let Some(steptree) = state.tree.desc(parent)?.steptree.clone() else {
            continue;
        };
        let child = ParseArgs {
            desc: &steptree,
            parent: Some(parent),
            attr_index: Some(AttrIndex::Steptree),
            raw: args.raw,
            root_offset: args.root_offset,
            offset,
        };
        offset = parse_field(&child, state)?;
    }
    state.steptree_parents = saved;
    Ok(offset)
}

/// Parser for types that hold nothing.
pub fn void_parser(args: &ParseArgs<'_>, _state: &mut ParseState<'_>) -> Result<usize> {
    Ok(args.offset)
}

/// Parser for padding: skips `SIZE` bytes.
pub fn pad_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let offset = align(args.offset, args.desc.align);
    let size = meta::declared_size(&context(args, state.tree, None, offset))?;
    Ok(offset + size)
}

/// Parser for containers: fields one after another, then any steptrees
/// this container's scope collected.
pub fn container_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let id = new_block(args, state)?;
    let scope = open_scope(state, args, id);
    let mut offset = start_offset(args, state.tree, Some(id))?;
    for (i, entry) in args.desc.entries.iter().enumerate() {
        let child = ParseArgs {
            desc: entry,
            parent: Some(id),
            attr_index: Some(AttrIndex::Index(i)),
            offset,
            ..*args
        };
        offset = parse_field(&child, state)?;
    }
    match scope {
        Some(saved) => close_scope(state, args, saved, offset),
        None => Ok(offset),
    }
}

/// Parser for structs: fields at fixed offsets inside `SIZE` bytes.
///
/// A steptree joins the enclosing scope, or is parsed right after the
/// struct when there is none.
pub fn struct_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let desc = args.desc;
    let id = new_block(args, state)?;
    let offset = start_offset(args, state.tree, Some(id))?;
    let size = required_size(args, state.tree, Some(id), offset)?;

    for (i, entry) in desc.entries.iter().enumerate() {
        let field_offset = desc.attr_offs.get(i).copied().ok_or_else(|| {
            Error::descriptor(format!("struct '{}' has no offset for field {}", desc.name, i))
        })?;
        let child = ParseArgs {
            desc: entry,
            parent: Some(id),
            attr_index: Some(AttrIndex::Index(i)),
            offset: offset + field_offset,
            ..*args
        };
        parse_field(&child, state)?;
    }

    let mut end = offset + size;
    if let Some(steptree) = &desc.steptree {
        match state.steptree_parents.as_mut() {
            Some(parents) => parents.push(id),
            None => {
                let child = ParseArgs {
                    desc: steptree,
                    parent: Some(id),
                    attr_index: Some(AttrIndex::Steptree),
                    offset: end,
                    ..*args
                };
                end = parse_field(&child, state)?;
            }
        }
    }
    // Building defaults consumes nothing.
    if args.raw.is_none() {
        return Ok(args.offset);
    }
    Ok(end)
}

fn element_desc(args: &ParseArgs<'_>) -> Result<DescRef> {
    args.desc.sub_struct.clone().ok_or_else(|| {
        Error::descriptor(format!(
            "'{}' ({}) has no SUB_STRUCT",
            args.desc.name, args.desc.field_type
        ))
    })
}

/// Parser for arrays whose element count comes from `SIZE`.
pub fn array_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let id = new_block(args, state)?;
    let scope = open_scope(state, args, id);
    let mut offset = start_offset(args, state.tree, Some(id))?;
    let sub = element_desc(args)?;
    let count = required_size(args, state.tree, Some(id), offset)?;

    for i in 0..count {
        state.tree.push_slot(id, Value::None)?;
        let child = ParseArgs {
            desc: &sub,
            parent: Some(id),
            attr_index: Some(AttrIndex::Index(i)),
            offset,
            ..*args
        };
        offset = parse_field(&child, state)?;
    }
    match scope {
        Some(saved) => close_scope(state, args, saved, offset),
        None => Ok(offset),
    }
}

/// Parser for open-ended arrays: elements are read while the `CASE`
/// predicate says another one follows.
pub fn while_array_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let id = new_block(args, state)?;
    let scope = open_scope(state, args, id);
    let mut offset = start_offset(args, state.tree, Some(id))?;

    if args.raw.is_some() {
        let sub = element_desc(args)?;
        let more = match &args.desc.case {
            Some(Case::While(predicate)) => predicate.clone(),
            _ => {
                return Err(Error::descriptor(format!(
                    "while-array '{}' has no CASE predicate",
                    args.desc.name
                )))
            }
        };
        let mut count = 0;
        loop {
            let ctx = FieldContext {
                parent: Some(id),
                node: None,
                attr_index: Some(AttrIndex::Index(count)),
                ..context(args, state.tree, None, offset)
            };
            if !more(&ctx)? {
                break;
            }
            state.tree.push_slot(id, Value::None)?;
            let child = ParseArgs {
                desc: &sub,
                parent: Some(id),
                attr_index: Some(AttrIndex::Index(count)),
                offset,
                ..*args
            };
            offset = parse_field(&child, state)?;
            count += 1;
        }
        debug!(array = %args.desc.name, count, end = offset, "while-array ended");
    }
    match scope {
        Some(saved) => close_scope(state, args, saved, offset),
        None => Ok(offset),
    }
}

/// Parser for switches: picks a case descriptor and parses that in the
/// switch's place.
pub fn switch_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let desc = args.desc;
    let key = if state.case_override.is_empty() {
        let offset = match desc.case {
            Some(Case::Select(_)) => align(args.offset, desc.align),
            _ => args.offset,
        };
        meta::select_case(&context(args, state.tree, None, offset))?
    } else {
        Some(state.case_override.remove(0))
    };
    let case = desc.case_desc(key.as_ref()).cloned().ok_or_else(|| {
        Error::descriptor(format!(
            "switch '{}' has no case for {:?} and no DEFAULT",
            desc.name, key
        ))
    })?;
    debug!(switch = %desc.name, case = ?key, chosen = %case.name, "switch case selected");
    parse_field(&ParseArgs { desc: &case, ..*args }, state)
}

/// Parser for unions: captures `SIZE` raw bytes and activates the view
/// `CASE` selects, if any.
pub fn union_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let desc = args.desc;
    let id = new_block(args, state)?;
    let offset = start_offset(args, state.tree, Some(id))?;
    let size = required_size(args, state.tree, Some(id), offset)?;

    let Some(raw) = args.raw else {
        state.tree.reset_union(id, vec![0; size])?;
        return Ok(offset);
    };
    let bytes = BinaryReader::new(raw).slice(args.root_offset + offset, size)?.to_vec();
    state.tree.reset_union(id, bytes)?;

    if desc.case.is_some() {
        let key = meta::select_case(&context(args, state.tree, Some(id), offset))?;
        if let Some(view) = key.as_ref().and_then(|k| desc.case_index(k)) {
            state.tree.set_active(id, Some(view))?;
        }
    }
    Ok(offset + size)
}

/// Parser for stream adapters: decodes the outer stream into an inner
/// buffer and parses the wrapped structure from offset 0 of it.
pub fn stream_adapter_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let desc = args.desc;
    let id = new_block(args, state)?;
    let offset = start_offset(args, state.tree, Some(id))?;
    let sub = element_desc(args)?;

    let Some(raw) = args.raw else {
        let child = ParseArgs {
            desc: &sub,
            parent: Some(id),
            attr_index: Some(AttrIndex::Data),
            ..*args
        };
        parse_field(&child, state)?;
        return Ok(offset);
    };
    let adapter = desc.adapter.clone().ok_or_else(|| {
        Error::descriptor(format!("stream adapter '{}' has no DECODER", desc.name))
    })?;
    let (inner, consumed) = {
        let ctx = context(args, state.tree, Some(id), offset);
        adapter.decode(&ctx, raw, args.root_offset + offset)?
    };
    debug!(adapter = adapter.name(), field = %desc.name, consumed, inner = inner.len(), "decoded stream");

    let saved = state.steptree_parents.take();
    let child = ParseArgs {
        desc: &sub,
        parent: Some(id),
        attr_index: Some(AttrIndex::Data),
        raw: Some(inner.as_slice()),
        root_offset: 0,
        offset: 0,
    };
    let parsed = parse_field(&child, state);
    state.steptree_parents = saved;
    parsed?;
    Ok(offset + consumed)
}

/// Read a bit struct's bytes as one unsigned integer.
pub(crate) fn bits_from_bytes(bytes: &[u8], endian: Endian) -> u128 {
    let mut buf = [0u8; 16];
    let n = bytes.len().min(16);
    match endian.resolve() {
        Endian::Big => buf[16 - n..].copy_from_slice(&bytes[bytes.len() - n..]),
        _ => {
            for (dst, src) in buf[16 - n..].iter_mut().zip(bytes[..n].iter().rev()) {
                *dst = *src;
            }
        }
    }
    u128::from_be_bytes(buf)
}

/// Parser for bit structs: reads `SIZE` bytes as one integer and lets each
/// field's decoder mask out its bits.
pub fn bit_struct_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let desc = args.desc;
    let id = new_block(args, state)?;
    let offset = start_offset(args, state.tree, Some(id))?;
    let size = required_size(args, state.tree, Some(id), offset)?;
    if size > 16 {
        return Err(Error::descriptor(format!(
            "bit struct '{}' is {} bytes, at most 16 are supported",
            desc.name, size
        )));
    }
    let whole = match args.raw {
        Some(raw) => Some(bits_from_bytes(
            BinaryReader::new(raw).slice(args.root_offset + offset, size)?,
            desc.field_type.endian,
        )),
        None => None,
    };

    for (i, entry) in desc.entries.iter().enumerate() {
        let index = AttrIndex::Index(i);
        let decoded = match whole {
            Some(bits) => {
                let ctx = FieldContext {
                    desc: entry,
                    parent: Some(id),
                    node: None,
                    attr_index: Some(index),
                    ..context(args, state.tree, None, offset)
                };
                let width = meta::declared_size(&ctx)?;
                let bit_offset = desc.attr_offs.get(i).copied().unwrap_or(0);
                let codec = CodecContext {
                    desc: entry,
                    size: width,
                    bit_offset: bit_offset as u32,
                };
                (entry.field_type.decoder)(entry.field_type, Raw::Bits(bits), &codec)
            }
            None => Ok(entry
                .default
                .clone()
                .unwrap_or_else(|| entry.field_type.default_value())),
        };
        let value = decoded.map_err(|e| {
            e.with_frame(
                Phase::Parse,
                Frame::at(entry, state.tree, Some(id), Some(index), args.root_offset + offset),
            )
        })?;
        store(state, entry, Some(id), Some(index), value)?;
    }
    Ok(offset + size)
}

/// Bit fields are only ever read by their enclosing bit struct.
pub fn bit_field_parser(args: &ParseArgs<'_>, _state: &mut ParseState<'_>) -> Result<usize> {
    Err(Error::descriptor(format!(
        "bit field '{}' ({}) must sit inside a bit struct",
        args.desc.name, args.desc.field_type
    )))
}

/// Parser for byte-sized leaf values.
pub fn data_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let desc = args.desc;
    let ft = desc.field_type;
    let Some(raw) = args.raw else {
        let value = desc.default.clone().unwrap_or_else(|| ft.default_value());
        store(state, desc, args.parent, args.attr_index, value)?;
        return Ok(args.offset);
    };
    let offset = start_offset(args, state.tree, None)?;
    let size = meta::declared_size(&context(args, state.tree, None, offset))?;
    let bytes = BinaryReader::new(raw).slice(args.root_offset + offset, size)?;
    let value = (ft.decoder)(ft, Raw::Bytes(bytes), &CodecContext::new(desc, size))?;
    store(state, desc, args.parent, args.attr_index, value)?;
    Ok(offset + size)
}

/// Parser for C strings: scans for the terminator, then decodes up to it.
pub fn cstring_parser(args: &ParseArgs<'_>, state: &mut ParseState<'_>) -> Result<usize> {
    let desc = args.desc;
    let ft = desc.field_type;
    let Some(raw) = args.raw else {
        let value = desc.default.clone().unwrap_or_else(|| ft.default_value());
        store(state, desc, args.parent, args.attr_index, value)?;
        return Ok(args.offset);
    };
    let offset = start_offset(args, state.tree, None)?;
    let start = args.root_offset + offset;
    let delimiter = ft.delimiter();
    let found = text::find_delimiter(&BinaryReader::new(raw), delimiter, start)?;
    let end = found + delimiter.len();
    let bytes = &raw[start..end];
    let value = (ft.decoder)(ft, Raw::Bytes(bytes), &CodecContext::new(desc, bytes.len()))?;
    store(state, desc, args.parent, args.attr_index, value)?;
    Ok(end - args.root_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::block::Key;
    use crate::builder::{
        array_desc, bit_struct_desc, container_desc, field, pad, struct_desc, switch_desc,
        while_array_desc,
    };
    use crate::field_types::*;
    use crate::{Tag, TagOptions};

    #[test]
    fn test_struct_fields_at_fixed_offsets() {
        let def = struct_desc("s", [field(&UINT16, "a"), pad(2), field(&UINT32, "b")])
            .build()
            .unwrap();
        let raw = [5, 0, 0xff, 0xff, 0xa0, 0x86, 0x01, 0x00];
        let tag = Tag::parse(def, &raw, TagOptions::default()).unwrap();
        let tree = tag.tree();
        assert_eq!(tree.get_int(tag.root(), "a").unwrap(), 5);
        assert_eq!(tree.get_int(tag.root(), "b").unwrap(), 100_000);
        assert_eq!(tag.parsed_len(), 8);
    }

    #[test]
    fn test_switch_dispatch_three_ways() {
        let def = container_desc(
            "root",
            [
                field(&STR_ASCII, "id").size(1usize),
                switch_desc(
                    "body",
                    ".id",
                    [
                        ("A", field(&UINT8, "a")),
                        ("B", field(&UINT16_BE, "b")),
                    ],
                    Some(field(&UINT32, "other")),
                ),
            ],
        )
        .build()
        .unwrap();

        let cases: [(&[u8], &str, i128); 3] = [
            (b"A\x07", "a", 7),
            (b"B\x01\x02", "b", 0x0102),
            (b"C\x01\x00\x00\x00", "other", 1),
        ];
        for (raw, name, expected) in cases {
            let tag = Tag::parse(def.clone(), raw, TagOptions::default()).unwrap();
            let tree = tag.tree();
            let body = tree.attr_desc(tag.root(), AttrIndex::Index(1)).unwrap();
            assert_eq!(tree.get_int(tag.root(), 1usize).unwrap(), expected, "case {name}");
            assert_eq!(tag.parsed_len(), raw.len());
            // The slot's declared descriptor is still the switch.
            assert_eq!(body.name, "body");
        }
    }

    #[test]
    fn test_switch_case_override() {
        let def = switch_desc(
            "body",
            ".missing",
            [("A", struct_desc("a", [field(&UINT8, "x")]))],
            None,
        )
        .build()
        .unwrap();
        let options = TagOptions {
            case: vec![CaseKey::from("A")],
            ..TagOptions::default()
        };
        let tag = Tag::parse(def, &[9], options).unwrap();
        assert_eq!(tag.tree().get_int(tag.root(), "x").unwrap(), 9);
    }

    #[test]
    fn test_while_array_stops_when_predicate_does() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let def = container_desc(
            "root",
            [
                field(&UINT8, "head"),
                while_array_desc(
                    "items",
                    move |_| Ok(seen.fetch_add(1, Ordering::SeqCst) < 2),
                    field(&UINT16, "v"),
                ),
            ],
        )
        .build()
        .unwrap();
        let raw = [1, 0x10, 0x00, 0x20, 0x00, 0xee, 0xee];
        let tag = Tag::parse(def, &raw, TagOptions::default()).unwrap();
        let tree = tag.tree();
        let items = tree.get_block(tag.root(), "items").unwrap();

        assert_eq!(tree.len(items), 2);
        assert_eq!(tree.get_int(items, 1usize).unwrap(), 0x20);
        assert_eq!(tag.parsed_len(), 1 + 2 * 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cstring_utf16_skips_straddling_zero() {
        let def = container_desc("root", [field(&CSTR_UTF16, "s"), field(&UINT8, "after")])
            .build()
            .unwrap();
        // "h" "i" then an odd-aligned zero pair before the real terminator.
        let raw = [b'h', 0, b'i', 0, 0x01, 0, 0, 0, 0x2a];
        let tag = Tag::parse(def, &raw, TagOptions::default()).unwrap();
        let tree = tag.tree();
        assert_eq!(tree.get_str(tag.root(), "s").unwrap(), "hi\u{1}");
        assert_eq!(tree.get_int(tag.root(), "after").unwrap(), 0x2a);

        let def = container_desc("root", [field(&CSTR_UTF16, "s")]).build().unwrap();
        let raw = [b'h', 0, b'i', 0, 0, 0];
        let tag = Tag::parse(def, &raw, TagOptions::default()).unwrap();
        assert_eq!(tag.tree().get_str(tag.root(), "s").unwrap(), "hi");
    }

    #[test]
    fn test_bit_struct_fields() {
        let def = container_desc(
            "root",
            [bit_struct_desc(
                &BIT_STRUCT,
                "bits",
                2,
                [
                    field(&UBIT_INT, "lo").size(4usize),
                    field(&SBIT_INT, "mid").size(4usize),
                    field(&BIT, "flag"),
                ],
            )],
        )
        .build()
        .unwrap();
        // 0b1_1110_0101: lo = 5, mid = -2, flag = 1
        let tag = Tag::parse(def, &[0xe5, 0x01], TagOptions::default()).unwrap();
        let tree = tag.tree();
        let bits = tree.get_block(tag.root(), "bits").unwrap();
        assert_eq!(tree.get_int(bits, "lo").unwrap(), 5);
        assert_eq!(tree.get_int(bits, "mid").unwrap(), -2);
        assert_eq!(tree.get_int(bits, "flag").unwrap(), 1);
    }

    #[test]
    fn test_steptree_follows_siblings() {
        let body = field(&BYTES_RAW, "payload").size(".len");
        let def = container_desc(
            "root",
            [
                struct_desc("hdr", [field(&UINT8, "len")]).steptree(body),
                field(&UINT8, "tail"),
            ],
        )
        .build()
        .unwrap();
        // hdr.len = 2, tail = 9, then the 2 steptree bytes.
        let tag = Tag::parse(def, &[2, 9, 0xaa, 0xbb], TagOptions::default()).unwrap();
        let tree = tag.tree();
        let hdr = tree.get_block(tag.root(), "hdr").unwrap();
        assert_eq!(tree.get_int(tag.root(), "tail").unwrap(), 9);
        assert_eq!(
            tree.get(hdr, Key::Steptree).unwrap(),
            &Value::Bytes(vec![0xaa, 0xbb])
        );
        assert_eq!(tag.parsed_len(), 4);
    }

    #[test]
    fn test_errors_carry_breadcrumbs() {
        let def = container_desc(
            "root",
            [field(&UINT8, "n"), array_desc("items", ".n", field(&UINT32, "v"))],
        )
        .build()
        .unwrap();
        let err = Tag::parse(def, &[2, 1, 0, 0, 0, 2], TagOptions::default()).unwrap_err();
        let names: Vec<_> = err.frames().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["v", "items", "root"]);
        assert_eq!(err.frames()[0].offset, 5);
        assert!(matches!(err.root_cause(), Error::Common(_)));
    }

    #[test]
    fn test_default_tree_without_raw() {
        let def = container_desc(
            "root",
            [field(&UINT8, "n"), array_desc("items", 2usize, field(&UINT16, "v")), field(&STR_UTF8, "s").size(4usize)],
        )
        .build()
        .unwrap();
        let tag = Tag::new(def).unwrap();
        let tree = tag.tree();
        let items = tree.get_block(tag.root(), "items").unwrap();
        assert_eq!(tree.len(items), 2);
        assert_eq!(tree.get(tag.root(), "s").unwrap(), &Value::Str(String::new()));
    }

    #[test]
    fn test_default_struct_consumes_nothing() {
        let def = struct_desc("s", [field(&UINT32, "a"), field(&UINT32, "b")])
            .build()
            .unwrap();
        assert_eq!(Tag::new(def).unwrap().parsed_len(), 0);

        let nested = container_desc(
            "root",
            [
                struct_desc("head", [field(&UINT16, "x"), field(&UINT16, "y")]),
                field(&UINT8, "tail"),
            ],
        )
        .build()
        .unwrap();
        let tag = Tag::new(nested).unwrap();
        assert_eq!(tag.parsed_len(), 0);
        let head = tag.tree().get_block(tag.root(), "head").unwrap();
        assert_eq!(tag.tree().get_int(head, "y").unwrap(), 0);
    }
}
