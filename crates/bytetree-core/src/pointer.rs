//! Pointer layout.
//!
//! Before a tree with pointer-based fields is serialized, every such field
//! gets a `POINTER` value so that no two pointed regions overlap each other
//! or the contiguous trunk. The trunk is measured first. Pointed fields met
//! along the way are deferred, then placed one layer at a time: all fields
//! found in the trunk go right after it, all fields found inside those go
//! after them, and so on.

use std::hash::BuildHasherDefault;

use hashbrown::HashSet;
use rustc_hash::FxHasher;
use tracing::debug;

use crate::block::{AttrIndex, BlockTree, NodeId, NodeKind};
use crate::descriptor::Meta;
use crate::{Error, Result, Value};

type FxHashSet<T> = HashSet<T, BuildHasherDefault<FxHasher>>;

/// What pointer an empty pointed field receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NullPointerPolicy {
    /// Fields that serialize to no bytes get pointer 0.
    #[default]
    ZeroForEmpty,
    /// Every pointed field gets a real offset, even when empty.
    Always,
}

/// A pointed field waiting for its offset.
#[derive(Debug, Clone, Copy)]
struct Pending {
    owner: NodeId,
    attr: Option<AttrIndex>,
}

struct Walk<'t> {
    tree: &'t BlockTree,
    seen: FxHashSet<NodeId>,
}

fn align(offset: usize, align: Option<usize>) -> usize {
    match align {
        Some(a) if a > 1 => offset + (a - offset % a) % a,
        _ => offset,
    }
}

impl<'t> Walk<'t> {
    /// Measure a field the way serialization would lay it out, deferring
    /// pointed fields into `pending`.
    ///
    /// `placing` is set for the field a layer is currently placing, whose
    /// own pointer has just been assigned.
    fn collect(
        &mut self,
        owner: NodeId,
        attr: Option<AttrIndex>,
        mut offset: usize,
        substruct: bool,
        placing: bool,
        pending: &mut Vec<Pending>,
    ) -> Result<usize> {
        let tree = self.tree;
        let block = match attr {
            None => Some(owner),
            Some(index) => tree.slot(owner, index)?.as_block(),
        };
        let Some(id) = block else {
            let index = attr.unwrap_or(AttrIndex::Data);
            return self.collect_leaf(owner, index, offset, placing, pending);
        };
        if self.seen.contains(&id) {
            return Ok(offset);
        }
        let desc = tree.desc(id)?.clone();

        match &desc.pointer {
            Some(Meta::Literal(at)) => offset = *at,
            Some(_) if !placing => {
                pending.push(Pending { owner: id, attr: None });
                return Ok(offset);
            }
            _ => offset = align(offset, desc.align),
        }
        self.seen.insert(id);

        let ft = desc.field_type;
        let mut substruct = substruct;
        if !(substruct || ft.flags.is_container) {
            offset += match &tree.node(id)?.kind {
                NodeKind::List { .. } | NodeKind::Union(_) | NodeKind::Data(_) => tree.get_size(id, None)?,
                NodeKind::Wrapper(_) => tree.binsize(id)?,
                NodeKind::Void => 0,
            };
            substruct = true;
        }

        // Wrapped structures live in their own buffer and unions hold no
        // pointers, so only list blocks are walked.
        if !matches!(tree.node(id)?.kind, NodeKind::List { .. }) {
            return Ok(offset);
        }
        for (index, value) in tree.children(id) {
            let is_field = matches!(index, AttrIndex::Index(_));
            offset = match value {
                Value::Block(child) => {
                    self.collect(*child, None, offset, is_field && substruct, false, pending)?
                }
                _ if !is_field || !substruct => self.collect_leaf(id, index, offset, false, pending)?,
                _ => offset,
            };
        }
        Ok(offset)
    }

    fn collect_leaf(
        &mut self,
        owner: NodeId,
        index: AttrIndex,
        offset: usize,
        placing: bool,
        pending: &mut Vec<Pending>,
    ) -> Result<usize> {
        let tree = self.tree;
        let desc = tree.leaf_desc(owner, index)?;
        let offset = match &desc.pointer {
            Some(Meta::Literal(at)) => *at,
            Some(_) if !placing => {
                pending.push(Pending {
                    owner,
                    attr: Some(index),
                });
                return Ok(offset);
            }
            _ => align(offset, desc.align),
        };
        Ok(offset + tree.get_size(owner, Some(index))?)
    }
}

/// Bytes a pointed field will occupy.
fn pointed_size(tree: &BlockTree, pending: &Pending) -> Result<usize> {
    match pending.attr {
        None => tree.binsize(pending.owner),
        Some(index) => tree.get_size(pending.owner, Some(index)),
    }
}

/// Assign the `POINTER` of every pointer-based field in the tree.
///
/// The trunk is laid out from `start`. Returns the offset just past the
/// last placed field.
pub fn resolve_pointers(tree: &mut BlockTree, start: usize, policy: NullPointerPolicy) -> Result<usize> {
    let root = tree
        .root()
        .ok_or_else(|| Error::descriptor("the tree has no root block"))?;
    let mut seen = FxHashSet::default();
    let mut pending = Vec::new();
    let mut offset = {
        let mut walk = Walk { tree: &*tree, seen };
        let end = walk.collect(root, None, start, false, false, &mut pending)?;
        seen = walk.seen;
        end
    };

    let mut layer = 0;
    while !pending.is_empty() {
        layer += 1;
        let placed = pending.len();
        let mut next = Vec::new();
        for item in std::mem::take(&mut pending) {
            if policy == NullPointerPolicy::ZeroForEmpty && pointed_size(tree, &item)? == 0 {
                tree.set_meta(item.owner, "POINTER", 0, item.attr)?;
                continue;
            }
            tree.set_meta(item.owner, "POINTER", offset, item.attr)?;
            let mut walk = Walk { tree: &*tree, seen };
            offset = walk.collect(item.owner, item.attr, offset, false, true, &mut next)?;
            seen = walk.seen;
        }
        debug!(layer, placed, end = offset, "assigned pointer layer");
        pending = next;
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{container_desc, field};
    use crate::block::Key;
    use crate::field_types::{BYTES_RAW, UINT32, UINT8};
    use crate::{Tag, TagOptions};

    fn layered() -> Tag {
        let inner = container_desc(
            "b",
            [
                field(&UINT32, "c_ptr"),
                field(&BYTES_RAW, "c").size(2usize).pointer(".c_ptr").carry_off(false),
            ],
        )
        .pointer(".b_ptr")
        .carry_off(false);
        let def = container_desc(
            "root",
            [
                field(&UINT32, "a_ptr"),
                field(&UINT32, "b_ptr"),
                field(&UINT8, "a_len"),
                field(&BYTES_RAW, "a").size(".a_len").pointer(".a_ptr").carry_off(false),
                inner,
            ],
        )
        .build()
        .unwrap();
        Tag::new(def).unwrap()
    }

    #[test]
    fn test_layers_do_not_overlap() {
        let mut tag = layered();
        let root = tag.root();
        let tree = tag.tree_mut();
        tree.set(root, "a_len", 3u8).unwrap();
        tree.set(root, "a", vec![1u8, 2, 3]).unwrap();
        let b = tree.get_block(root, "b").unwrap();
        tree.set(b, "c", vec![9u8, 9]).unwrap();

        let end = resolve_pointers(tree, 0, NullPointerPolicy::default()).unwrap();
        let a = tree.get_int(root, "a_ptr").unwrap() as usize;
        let b_at = tree.get_int(root, "b_ptr").unwrap() as usize;
        let c = tree.get_int(b, "c_ptr").unwrap() as usize;

        // Trunk: two pointers and a length byte.
        let mut ranges = vec![(0, 9), (a, a + 3), (b_at, b_at + 4), (c, c + 2)];
        assert_eq!((a, b_at, c, end), (9, 12, 16, 18));
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }

        let bytes = tag.serialize().unwrap();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[9..12], &[1, 2, 3]);
        assert_eq!(&bytes[16..18], &[9, 9]);

        let back = Tag::parse(tag.definition().clone(), &bytes, TagOptions::default()).unwrap();
        let tree = back.tree();
        assert_eq!(tree.get(back.root(), "a").unwrap(), &Value::Bytes(vec![1, 2, 3]));
        let b = tree.get_block(back.root(), "b").unwrap();
        assert_eq!(tree.get(b, "c").unwrap(), &Value::Bytes(vec![9, 9]));
    }

    #[test]
    fn test_three_layers_chain() {
        let c = field(&BYTES_RAW, "c").size(2usize).pointer(".c_ptr").carry_off(false);
        let b = container_desc("b", [field(&UINT32, "c_ptr"), c])
            .pointer(".b_ptr")
            .carry_off(false);
        let a = container_desc("a", [field(&UINT32, "b_ptr"), b])
            .pointer(".a_ptr")
            .carry_off(false);
        let def = container_desc("root", [field(&UINT32, "a_ptr"), a]).build().unwrap();

        let mut tag = Tag::new(def.clone()).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        let a = tree.get_block(root, "a").unwrap();
        let b = tree.get_block(a, "b").unwrap();
        tree.set(b, "c", vec![7u8, 8]).unwrap();

        let bytes = tag.serialize().unwrap();
        let tree = tag.tree();
        assert_eq!(tree.get_int(root, "a_ptr").unwrap(), 4);
        assert_eq!(tree.get_int(a, "b_ptr").unwrap(), 8);
        assert_eq!(tree.get_int(b, "c_ptr").unwrap(), 12);
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[12..], &[7, 8]);

        let back = Tag::parse(def, &bytes, TagOptions::default()).unwrap();
        let tree = back.tree();
        let a = tree.get_block(back.root(), "a").unwrap();
        let b = tree.get_block(a, "b").unwrap();
        assert_eq!(tree.get(b, "c").unwrap(), &Value::Bytes(vec![7, 8]));
    }

    #[test]
    fn test_pointed_steptree_moves_past_trunk() {
        let def = container_desc("root", [field(&UINT32, "ptr"), field(&UINT8, "n")])
            .steptree(field(&BYTES_RAW, "tail").size(2usize).pointer(".ptr").carry_off(false))
            .build()
            .unwrap();
        let mut tag = Tag::new(def).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        tree.set(root, "n", 3u8).unwrap();
        tree.set(root, Key::Steptree, vec![0xcdu8, 0xef]).unwrap();
        // A stale pointer into the trunk.
        tree.set(root, "ptr", 1u32).unwrap();

        let bytes = tag.serialize().unwrap();
        assert_eq!(tag.tree().get_int(root, "ptr").unwrap(), 5);
        assert_eq!(bytes, [5, 0, 0, 0, 3, 0xcd, 0xef]);
    }

    #[test]
    fn test_empty_field_gets_null_pointer() {
        let mut tag = layered();
        let root = tag.root();
        let tree = tag.tree_mut();
        tree.set(root, "a_ptr", 77u32).unwrap();

        resolve_pointers(tree, 0, NullPointerPolicy::ZeroForEmpty).unwrap();
        assert_eq!(tree.get_int(root, "a_ptr").unwrap(), 0);

        tree.set(root, "a_ptr", 77u32).unwrap();
        resolve_pointers(tree, 0, NullPointerPolicy::Always).unwrap();
        assert_eq!(tree.get_int(root, "a_ptr").unwrap(), 9);
    }
}
