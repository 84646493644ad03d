//! Size, pointer, and neighbor resolution.
//!
//! Every numeric metadata entry (`SIZE`, `POINTER`, or a custom key) is a
//! [`Meta`] that is either a literal, a dotted path to another field, or a
//! pair of callables. The same three-way rule answers every lookup here.

use std::sync::Arc;

use super::{AttrIndex, BlockTree, Key, NodeId, NodeKind};
use crate::descriptor::{Case, DescRef, Descriptor, FieldContext, Meta};
use crate::field_type::Kind;
use crate::{CaseKey, Error, Result, Value};

/// Delta applied by [`BlockTree::set_size`] relative to the current size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl SizeOp {
    /// Combine the current size with an operand.
    pub fn apply(self, current: usize, operand: usize) -> Result<usize> {
        let out = match self {
            SizeOp::Add => current.checked_add(operand),
            SizeOp::Sub => current.checked_sub(operand),
            SizeOp::Mul => current.checked_mul(operand),
            SizeOp::Div => current.checked_div(operand),
        };
        out.ok_or_else(|| {
            Error::codec(format!(
                "size {} {:?} {} is out of range",
                current, self, operand
            ))
        })
    }
}

/// The field a metadata lookup is about.
///
/// `owner` and `attr` are what the caller passed; `block` is the field's
/// own node when it has one.
struct Site {
    desc: DescRef,
    owner: NodeId,
    attr: Option<AttrIndex>,
    block: Option<NodeId>,
}

/// Evaluate a metadata entry against a field.
pub(crate) fn eval_meta(meta: &Meta, ctx: &FieldContext<'_>) -> Result<usize> {
    match meta {
        Meta::Literal(v) => Ok(*v),
        Meta::Path(path) => {
            let value = ctx.neighbor(path)?;
            ctx.tree
                .data_value(&value)
                .as_usize()
                .ok_or_else(|| Error::Neighbor {
                    path: path.clone(),
                    reason: format!("found a {} instead of a size", value.kind_name()),
                })
        }
        Meta::Func { get, .. } => get(ctx),
    }
}

/// Size of a field whose value may not exist yet (parse time).
///
/// Uses `SIZE` when present, else the type's fixed size.
pub(crate) fn declared_size(ctx: &FieldContext<'_>) -> Result<usize> {
    let desc = ctx.desc;
    match &desc.size {
        Some(meta) => eval_meta(meta, ctx),
        None if desc.field_type.flags.is_var_size && !desc.field_type.flags.is_bit_based => {
            Err(Error::descriptor(format!(
                "'{}' ({}) is variable-sized but has no SIZE",
                desc.name, desc.field_type
            )))
        }
        None => Ok(desc.field_type.size),
    }
}

/// Work out the case key a switch or union selects.
///
/// A path that lands on an enum block yields the option name when the case
/// map knows it, else the numeric value.
pub(crate) fn select_case(ctx: &FieldContext<'_>) -> Result<Option<CaseKey>> {
    match &ctx.desc.case {
        Some(Case::Path(path)) => {
            let found = ctx.neighbor(path)?;
            if let Value::Block(id) = found {
                if let Some(name) = ctx.tree.enum_name(id) {
                    let key = CaseKey::Str(name.to_owned());
                    if ctx.desc.case_map.contains_key(&key) {
                        return Ok(Some(key));
                    }
                }
            }
            Ok(CaseKey::from_value(ctx.tree.data_value(&found)))
        }
        Some(Case::Select(select)) => select(ctx).map(Some),
        Some(Case::While(_)) => Err(Error::descriptor(format!(
            "'{}' has a while predicate where a case selector belongs",
            ctx.desc.name
        ))),
        None => Err(Error::descriptor(format!(
            "'{}' ({}) has no CASE",
            ctx.desc.name, ctx.desc.field_type
        ))),
    }
}

fn segment_key(segment: &str) -> Key<'_> {
    match segment.parse::<usize>() {
        Ok(i) => Key::Index(i),
        Err(_) => Key::Name(segment),
    }
}

impl BlockTree {
    fn neighbor_start<'p>(
        &self,
        path: &'p str,
        node: NodeId,
        attr: Option<AttrIndex>,
    ) -> (NodeId, Vec<&'p str>) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let target = match attr {
            None => Some(node),
            Some(index) => self.slot(node, index).ok().and_then(Value::as_block),
        };
        match target {
            Some(block) => (block, segments),
            None if segments.first() == Some(&"") => {
                segments.remove(0);
                (node, segments)
            }
            None => (self.top(node), segments),
        }
    }

    fn step(&self, path: &str, at: &Value, segment: &str) -> Result<Value> {
        let block = at.as_block().ok_or_else(|| Error::Neighbor {
            path: path.to_owned(),
            reason: format!("cannot look up '{}' in a {}", segment, at.kind_name()),
        })?;
        if segment.is_empty() {
            return self
                .parent(block)
                .map(Value::Block)
                .ok_or_else(|| Error::Neighbor {
                    path: path.to_owned(),
                    reason: format!("'{}' has no parent", self.name(block)),
                });
        }
        self.get(block, segment_key(segment))
            .cloned()
            .map_err(|_| Error::Neighbor {
                path: path.to_owned(),
                reason: format!("couldn't find '{}' in '{}'", segment, self.name(block)),
            })
    }

    /// Follow a dotted path from a node or one of its slots.
    ///
    /// An empty segment goes to the parent. When the starting slot holds a
    /// block the walk starts there; otherwise a leading `.` starts at `node`
    /// and any other path starts at the topmost ancestor.
    pub fn get_neighbor(&self, path: &str, node: NodeId, attr: Option<AttrIndex>) -> Result<Value> {
        let (start, segments) = self.neighbor_start(path, node, attr);
        let mut at = Value::Block(start);
        for segment in segments {
            at = self.step(path, &at, segment)?;
        }
        Ok(at)
    }

    /// Store a value at the end of a dotted path.
    ///
    /// A data block found there gets its payload replaced instead.
    pub fn set_neighbor(
        &mut self,
        path: &str,
        value: Value,
        node: NodeId,
        attr: Option<AttrIndex>,
    ) -> Result<()> {
        let (start, mut segments) = self.neighbor_start(path, node, attr);
        let last = match segments.pop() {
            Some(last) if !last.is_empty() => last,
            _ => {
                return Err(Error::Neighbor {
                    path: path.to_owned(),
                    reason: "path does not end in a field name".to_owned(),
                })
            }
        };
        let mut at = Value::Block(start);
        for segment in segments {
            at = self.step(path, &at, segment)?;
        }
        let block = at.as_block().ok_or_else(|| Error::Neighbor {
            path: path.to_owned(),
            reason: format!("cannot set '{}' in a {}", last, at.kind_name()),
        })?;
        let index = self
            .resolve_key(block, segment_key(last))
            .map_err(|_| Error::Neighbor {
                path: path.to_owned(),
                reason: format!("couldn't find '{}' in '{}'", last, self.name(block)),
            })?;
        if let Value::Block(data) = *self.slot(block, index)? {
            if matches!(self.node(data)?.kind, NodeKind::Data(_)) {
                return self.set_slot(data, AttrIndex::Data, value);
            }
        }
        self.set_slot(block, index, value)
    }

    fn site(&self, id: NodeId, attr: Option<AttrIndex>) -> Result<Site> {
        match attr {
            None => Ok(Site {
                desc: self.desc(id)?.clone(),
                owner: id,
                attr: None,
                block: Some(id),
            }),
            Some(index) => {
                let block = self.slot(id, index)?.as_block();
                let desc = match block {
                    Some(b) => self.desc(b)?.clone(),
                    None => self.leaf_desc(id, index)?,
                };
                Ok(Site {
                    desc,
                    owner: id,
                    attr: Some(index),
                    block,
                })
            }
        }
    }

    fn site_context<'a>(&'a self, site: &'a Site) -> FieldContext<'a> {
        let (parent, attr_index) = match site.attr {
            Some(index) => (Some(site.owner), Some(index)),
            None => (self.parent(site.owner), self.index_in_parent(site.owner)),
        };
        FieldContext {
            node: site.block,
            parent,
            attr_index,
            ..FieldContext::detached(self, &site.desc)
        }
    }

    /// Descriptor of a leaf slot, resolving a switch to the case it picks.
    pub(crate) fn leaf_desc(&self, id: NodeId, index: AttrIndex) -> Result<DescRef> {
        let declared = self.attr_desc(id, index)?;
        if declared.field_type.kind != Kind::Switch {
            return Ok(declared);
        }
        let ctx = FieldContext {
            parent: Some(id),
            attr_index: Some(index),
            ..FieldContext::detached(self, &declared)
        };
        let key = select_case(&ctx)?;
        declared
            .case_desc(key.as_ref())
            .cloned()
            .ok_or_else(|| Error::descriptor(format!("'{}' has no case to fall back on", declared.name)))
    }

    /// Size of the content a field holds now, ignoring its `SIZE` entry.
    fn content_size(&self, site: &Site) -> Result<usize> {
        let ft = site.desc.field_type;
        match site.block {
            Some(block) => match &self.node(block)?.kind {
                NodeKind::List { .. } if ft.flags.is_struct => self.binsize(block),
                NodeKind::List { attrs, .. } => Ok(attrs.len()),
                NodeKind::Data(v) => (ft.sizecalc)(ft, v),
                NodeKind::Union(u) => Ok(u.raw.len()),
                NodeKind::Wrapper(_) | NodeKind::Void => Ok(0),
            },
            None => {
                let index = site.attr.unwrap_or(AttrIndex::Data);
                (ft.sizecalc)(ft, self.slot(site.owner, index)?)
            }
        }
    }

    /// Size of a node (`attr` = `None`) or of one of its slots.
    ///
    /// Without a `SIZE` entry, list blocks report their length and leaves
    /// measure their value.
    pub fn get_size(&self, id: NodeId, attr: Option<AttrIndex>) -> Result<usize> {
        let site = self.site(id, attr)?;
        match &site.desc.size {
            Some(meta) => eval_meta(meta, &self.site_context(&site)),
            None => self.content_size(&site),
        }
    }

    /// Update the size of a node or slot.
    ///
    /// `new_size` = `None` measures the current content. With an `op`, the
    /// stored size becomes `op(current, new_size)`. A literal size is never
    /// shrunk; growing one needs [`force_size`](Self::force_size).
    pub fn set_size(
        &mut self,
        id: NodeId,
        attr: Option<AttrIndex>,
        new_size: Option<usize>,
        op: Option<SizeOp>,
    ) -> Result<()> {
        let site = self.site(id, attr)?;
        let Some(meta) = site.desc.size.clone() else {
            return Err(Error::descriptor(format!(
                "'{}' ({}) has no SIZE entry to set",
                site.desc.name, site.desc.field_type
            )));
        };
        let mut size = match new_size {
            Some(size) => size,
            None => self.content_size(&site)?,
        };
        if let Some(op) = op {
            let current = eval_meta(&meta, &self.site_context(&site))?;
            size = op.apply(current, size)?;
        }
        match meta {
            Meta::Literal(current) if size <= current => Ok(()),
            Meta::Literal(current) => Err(Error::DescEdit(format!(
                "cannot grow the literal size of '{}' from {} to {}; use force_size",
                site.desc.name, current, size
            ))),
            other => self.store_meta(&site, "SIZE", other, size),
        }
    }

    /// Replace the size of a node or slot with a literal, copying its
    /// descriptor first.
    pub fn force_size(&mut self, id: NodeId, attr: Option<AttrIndex>, new_size: usize) -> Result<()> {
        self.edit_desc(id, attr, |desc| desc.size = Some(Meta::Literal(new_size)))
    }

    /// Evaluate a metadata entry of a node or slot.
    pub fn get_meta(&self, id: NodeId, key: &str, attr: Option<AttrIndex>) -> Result<usize> {
        let site = self.site(id, attr)?;
        let meta = site.desc.meta(key).ok_or_else(|| missing_meta(&site.desc, key))?;
        eval_meta(meta, &self.site_context(&site))
    }

    /// Store a metadata entry of a node or slot.
    ///
    /// Literals are replaced through a copy-on-write descriptor edit, paths
    /// write the field they name, and callables use their setter.
    pub fn set_meta(&mut self, id: NodeId, key: &str, value: usize, attr: Option<AttrIndex>) -> Result<()> {
        let site = self.site(id, attr)?;
        let meta = site
            .desc
            .meta(key)
            .cloned()
            .ok_or_else(|| missing_meta(&site.desc, key))?;
        self.store_meta(&site, key, meta, value)
    }

    fn store_meta(&mut self, site: &Site, key: &str, meta: Meta, value: usize) -> Result<()> {
        match meta {
            Meta::Literal(_) => self.edit_desc(site.owner, site.attr, |desc| {
                desc.set_meta_entry(key, Meta::Literal(value))
            }),
            Meta::Path(path) => self.set_neighbor(&path, Value::from(value), site.owner, site.attr),
            Meta::Func { set: Some(set), .. } => {
                let (owner, attr) = match site.attr {
                    Some(index) => (site.owner, Some(index)),
                    None => match self.parent(site.owner) {
                        Some(parent) => (parent, self.index_in_parent(site.owner)),
                        None => (site.owner, None),
                    },
                };
                set(self, owner, attr, value)
            }
            Meta::Func { set: None, .. } => Err(Error::descriptor(format!(
                "{} of '{}' is computed and has no setter",
                key, site.desc.name
            ))),
        }
    }

    /// Apply an edit to a copy of the descriptor governing a node or slot.
    ///
    /// A slot holding a block gets its own descriptor replaced. A leaf slot
    /// is edited through its parent, which is copied as well.
    pub(crate) fn edit_desc(
        &mut self,
        id: NodeId,
        attr: Option<AttrIndex>,
        edit: impl FnOnce(&mut Descriptor),
    ) -> Result<()> {
        let (block, leaf) = match attr {
            None => (id, None),
            Some(index) => match self.slot(id, index)?.as_block() {
                Some(child) => (child, None),
                None => (id, Some(index)),
            },
        };
        let current = self.desc(block)?.clone();
        let mut copy = Descriptor::make_unique(&current);
        match leaf {
            None => edit(&mut copy),
            Some(index) => {
                let child = copy.child_desc(index).cloned().ok_or_else(|| Error::AttributeNotFound {
                    block: copy.name.clone(),
                    key: index.to_string(),
                })?;
                let mut child_copy = Descriptor::make_unique(&child);
                edit(&mut child_copy);
                let child_copy = Arc::new(child_copy);
                match index {
                    AttrIndex::Index(i) if !copy.field_type.flags.is_array => {
                        if let Some(entry) = copy.entries.get_mut(i) {
                            *entry = child_copy;
                        }
                    }
                    AttrIndex::Steptree => copy.steptree = Some(child_copy),
                    AttrIndex::Index(_) | AttrIndex::Data => copy.sub_struct = Some(child_copy),
                }
            }
        }
        self.node_mut(block)?.desc = Arc::new(copy);
        Ok(())
    }

    /// Number of bytes a node would serialize to, pointed fields below it
    /// included.
    ///
    /// Pointed fields count once each wherever they end up, so this is the
    /// written size of a tree whose pointers do not overlap.
    pub fn binsize(&self, id: NodeId) -> Result<usize> {
        self.binsize_in(id, false)
    }

    /// `substruct` is set once an enclosing struct has already counted its
    /// fixed size.
    pub(crate) fn binsize_in(&self, id: NodeId, substruct: bool) -> Result<usize> {
        let node = self.node(id)?;
        let ft = node.desc.field_type;
        match &node.kind {
            NodeKind::Void => Ok(0),
            NodeKind::List { .. } if ft.kind == Kind::BitStruct => {
                if substruct {
                    Ok(0)
                } else {
                    self.get_size(id, None)
                }
            }
            NodeKind::List { attrs, steptree } => {
                let mut size = 0;
                let mut substruct = substruct;
                if ft.flags.is_struct && !substruct {
                    size = self.get_size(id, None)?;
                    substruct = true;
                }
                for (i, value) in attrs.iter().enumerate() {
                    match value {
                        Value::Block(child) => size += self.binsize_in(*child, substruct)?,
                        _ if !substruct => size += self.get_size(id, Some(AttrIndex::Index(i)))?,
                        _ => {}
                    }
                }
                if node.desc.steptree.is_some() {
                    size += match steptree {
                        Value::Block(child) => self.binsize_in(*child, false)?,
                        _ => self.get_size(id, Some(AttrIndex::Steptree))?,
                    };
                }
                Ok(size)
            }
            NodeKind::Data(_) | NodeKind::Union(_) => {
                if substruct {
                    Ok(0)
                } else {
                    self.get_size(id, None)
                }
            }
            NodeKind::Wrapper(_) => {
                if substruct {
                    Ok(0)
                } else {
                    crate::serialize::wrapper_binsize(self, id)
                }
            }
        }
    }
}

fn missing_meta(desc: &Descriptor, key: &str) -> Error {
    Error::descriptor(format!(
        "'{}' ({}) has no {} entry",
        desc.name, desc.field_type, key
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{array_desc, container_desc, field, pad, struct_desc};
    use crate::field_types::{CSTR_ASCII, STR_NNT_ASCII, UINT16, UINT32, UINT8};
    use crate::Tag;

    fn counted() -> Tag {
        let elem = struct_desc("elem", [field(&UINT16, "v")]);
        let def = container_desc(
            "root",
            [
                field(&UINT8, "count"),
                field(&UINT8, "name_len"),
                field(&STR_NNT_ASCII, "name").size(".name_len"),
                array_desc("items", ".count", elem),
            ],
        )
        .build()
        .unwrap();
        Tag::new(def).unwrap()
    }

    #[test]
    fn test_neighbor_paths() {
        let mut tag = counted();
        let root = tag.root();
        let tree = tag.tree_mut();
        tree.set(root, "count", 3u8).unwrap();
        let items = tree.get_block(root, "items").unwrap();

        // From a block: the leading empty segment is its parent.
        assert_eq!(tree.get_neighbor(".count", items, None).unwrap(), Value::Int(3));
        // From a leaf slot: the leading dot means the owner.
        let name = Some(AttrIndex::Index(2));
        assert_eq!(tree.get_neighbor(".count", root, name).unwrap(), Value::Int(3));
        // Without a leading dot, start at the top.
        assert_eq!(tree.get_neighbor("count", root, name).unwrap(), Value::Int(3));
        assert_eq!(tree.get_neighbor("items", root, name).unwrap(), Value::Block(items));

        let err = tree.get_neighbor(".nothing", items, None).unwrap_err();
        assert!(matches!(err, Error::Neighbor { .. }));
    }

    #[test]
    fn test_set_neighbor_writes_sibling() {
        let mut tag = counted();
        let root = tag.root();
        let tree = tag.tree_mut();
        let items = tree.get_block(root, "items").unwrap();
        tree.set_neighbor(".count", Value::Int(7), items, None).unwrap();
        assert_eq!(tree.get_int(root, "count").unwrap(), 7);
    }

    #[test]
    fn test_path_size_get_and_set() {
        let mut tag = counted();
        let root = tag.root();
        let tree = tag.tree_mut();
        tree.set(root, "name", "abcd").unwrap();
        tree.set_size(root, Some(AttrIndex::Index(2)), None, None).unwrap();
        assert_eq!(tree.get_int(root, "name_len").unwrap(), 4);
        assert_eq!(tree.get_size(root, Some(AttrIndex::Index(2))).unwrap(), 4);

        tree.set_size(root, Some(AttrIndex::Index(2)), Some(2), Some(SizeOp::Add)).unwrap();
        assert_eq!(tree.get_int(root, "name_len").unwrap(), 6);
        tree.set_size(root, Some(AttrIndex::Index(2)), Some(3), Some(SizeOp::Mul)).unwrap();
        assert_eq!(tree.get_int(root, "name_len").unwrap(), 18);
    }

    #[test]
    fn test_literal_struct_size_does_not_shrink() {
        let def = struct_desc(
            "s",
            [field(&UINT16, "a"), pad(2), field(&UINT32, "b")],
        )
        .build()
        .unwrap();
        let mut tag = Tag::new(def).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();

        assert_eq!(tree.get_size(root, None).unwrap(), 8);
        tree.set_size(root, None, Some(4), None).unwrap();
        assert_eq!(tree.get_size(root, None).unwrap(), 8);

        let err = tree.set_size(root, None, Some(12), None).unwrap_err();
        assert!(matches!(err, Error::DescEdit(_)));

        tree.force_size(root, None, 4).unwrap();
        assert_eq!(tree.get_size(root, None).unwrap(), 4);
        assert!(tree.desc(root).unwrap().orig_desc.is_some());
    }

    #[test]
    fn test_leaf_size_without_entry_uses_sizecalc() {
        let def = container_desc("root", [field(&CSTR_ASCII, "s")])
            .build()
            .unwrap();
        let mut tag = Tag::new(def).unwrap();
        let root = tag.root();
        tag.tree_mut().set(root, "s", "abc").unwrap();
        assert_eq!(tag.tree().get_size(root, Some(AttrIndex::Index(0))).unwrap(), 4);
    }

    #[test]
    fn test_set_meta_literal_copies_parent() {
        let def = container_desc("root", [field(&UINT16, "a").pointer(16usize)])
            .build()
            .unwrap();
        let original = def.clone();
        let mut tag = Tag::new(def).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();

        let slot = Some(AttrIndex::Index(0));
        assert_eq!(tree.get_meta(root, "POINTER", slot).unwrap(), 16);
        tree.set_meta(root, "POINTER", 40, slot).unwrap();
        assert_eq!(tree.get_meta(root, "POINTER", slot).unwrap(), 40);
        assert_eq!(original.entries[0].pointer.as_ref().and_then(Meta::as_literal), Some(16));

        let err = tree.get_meta(root, "OFFSET", slot).unwrap_err();
        assert!(matches!(err, Error::Descriptor(_)));
    }

    #[test]
    fn test_binsize_counts_struct_once() {
        let def = container_desc(
            "root",
            [
                struct_desc("hdr", [field(&UINT16, "a"), pad(2), field(&UINT32, "b")]),
                field(&CSTR_ASCII, "s"),
            ],
        )
        .build()
        .unwrap();
        let mut tag = Tag::new(def).unwrap();
        let root = tag.root();
        tag.tree_mut().set(root, "s", "hey").unwrap();
        assert_eq!(tag.tree().binsize(root).unwrap(), 8 + 4);
    }

    #[test]
    fn test_binsize_includes_pointed_child() {
        let def = container_desc(
            "root",
            [
                field(&UINT32, "at"),
                field(&UINT8, "n"),
                container_desc("far", [field(&CSTR_ASCII, "s")])
                    .pointer(".at")
                    .carry_off(false),
            ],
        )
        .build()
        .unwrap();
        let mut tag = Tag::new(def).unwrap();
        let root = tag.root();
        let far = tag.tree().get_block(root, "far").unwrap();
        tag.tree_mut().set(far, "s", "hi").unwrap();

        assert_eq!(tag.tree().binsize(far).unwrap(), 3);
        assert_eq!(tag.tree().binsize(root).unwrap(), 4 + 1 + 3);
        assert_eq!(tag.serialize().unwrap().len(), 8);
    }

    #[test]
    fn test_size_op_bounds() {
        assert_eq!(SizeOp::Sub.apply(5, 2).unwrap(), 3);
        assert!(SizeOp::Sub.apply(1, 2).is_err());
        assert!(SizeOp::Div.apply(1, 0).is_err());
    }
}
