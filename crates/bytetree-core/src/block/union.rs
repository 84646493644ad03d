//! Union views over a shared raw buffer.

use bytetree_common::Endian;
use tracing::{debug, warn};

use super::{AttrIndex, BlockTree, NodeId, NodeKind, UnionState};
use crate::field_type::NodeClass;
use crate::{parse, serialize, Error, Result, Value};

/// Byte offset of a view inside a union buffer.
///
/// Big-endian views narrower than the union sit at the end of the buffer.
fn view_offset(union_size: usize, view_size: usize, endian: Endian) -> usize {
    if endian.is_big() && view_size < union_size {
        union_size - view_size
    } else {
        0
    }
}

impl BlockTree {
    fn union_state(&self, id: NodeId) -> Result<&UnionState> {
        match &self.node(id)?.kind {
            NodeKind::Union(state) => Ok(state),
            _ => Err(not_a_union(self, id)),
        }
    }

    fn union_state_mut(&mut self, id: NodeId) -> Result<&mut UnionState> {
        if self.node(id)?.desc.field_type.node_class != NodeClass::Union {
            return Err(not_a_union(self, id));
        }
        match &mut self.node_mut(id)?.kind {
            NodeKind::Union(state) => Ok(state),
            _ => Err(Error::descriptor("union node without union storage")),
        }
    }

    /// Replace a union's buffer, dropping any active view.
    pub(crate) fn reset_union(&mut self, id: NodeId, raw: Vec<u8>) -> Result<()> {
        self.set_slot(id, AttrIndex::Data, Value::None)?;
        let state = self.union_state_mut(id)?;
        state.raw = raw;
        state.active = None;
        Ok(())
    }

    /// Index of the active view, if any.
    pub fn active_view(&self, id: NodeId) -> Result<Option<usize>> {
        self.union_state(id).map(|u| u.active)
    }

    /// The union buffer with the active view written over it.
    pub(crate) fn render_union(&self, id: NodeId) -> Result<Vec<u8>> {
        let node = self.node(id)?;
        let state = self.union_state(id)?;
        let mut raw = state.raw.clone();
        let Some(active) = state.active else {
            return Ok(raw);
        };
        let view_desc = node.desc.entry(active).ok_or_else(|| Error::AttributeNotFound {
            block: node.desc.name.clone(),
            key: format!("view {}", active),
        })?;
        let bytes = serialize::serialize_child(self, view_desc, &state.view, id, AttrIndex::Data)?;
        if bytes.len() > raw.len() {
            return Err(Error::codec(format!(
                "view '{}' is {} bytes, larger than union '{}' ({} bytes)",
                view_desc.name,
                bytes.len(),
                node.desc.name,
                raw.len()
            )));
        }
        let start = view_offset(raw.len(), bytes.len(), node.desc.field_type.endian);
        if start != 0 {
            warn!(union = %node.desc.name, view = %view_desc.name, start, "flushing narrow big-endian view");
        }
        raw[start..start + bytes.len()].copy_from_slice(&bytes);
        Ok(raw)
    }

    /// Write the active view back into the union buffer.
    pub fn flush_union(&mut self, id: NodeId) -> Result<()> {
        let raw = self.render_union(id)?;
        self.union_state_mut(id)?.raw = raw;
        Ok(())
    }

    /// Switch a union to another view (or to none).
    ///
    /// The current view is flushed first, then the new one is parsed from
    /// the buffer.
    pub fn set_active(&mut self, id: NodeId, view: Option<usize>) -> Result<()> {
        self.flush_union(id)?;
        self.set_slot(id, AttrIndex::Data, Value::None)?;
        self.union_state_mut(id)?.active = None;

        let Some(index) = view else {
            return Ok(());
        };
        let desc = self.desc(id)?.clone();
        let view_desc = desc.entry(index).cloned().ok_or_else(|| Error::AttributeNotFound {
            block: desc.name.clone(),
            key: format!("view {}", index),
        })?;
        let raw = self.union_state(id)?.raw.clone();
        let start = view_offset(
            raw.len(),
            view_desc.fixed_size().unwrap_or(raw.len()),
            desc.field_type.endian,
        );
        if start != 0 {
            warn!(union = %desc.name, view = %view_desc.name, start, "reading narrow big-endian view");
        }
        parse::parse_child(self, &view_desc, id, AttrIndex::Data, Some(&raw), start)?;
        self.union_state_mut(id)?.active = Some(index);
        debug!(union = %desc.name, view = %view_desc.name, "activated union view");
        Ok(())
    }

    /// The union buffer, after flushing and deactivating the view.
    pub fn union_raw(&mut self, id: NodeId) -> Result<&[u8]> {
        self.set_active(id, None)?;
        Ok(&self.union_state(id)?.raw)
    }
}

fn not_a_union(tree: &BlockTree, id: NodeId) -> Error {
    Error::descriptor(format!("'{}' is not a union", tree.name(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{container_desc, field, struct_desc, union_desc};
    use crate::field_types::{UINT16, UINT32, UINT32_BE, UINT8, UNION_BE};
    use crate::{Tag, TagOptions};

    #[test]
    fn test_switching_views_keeps_bytes() {
        let view_a = field(&UINT32, "whole");
        let view_b = struct_desc("halves", [field(&UINT16, "lo"), field(&UINT16, "hi")]);
        let def = container_desc("root", [union_desc("u", 4, None, [view_a, view_b])])
            .build()
            .unwrap();
        let mut tag = Tag::parse(def, &[0x34, 0x12, 0x78, 0x56], TagOptions::default()).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        let u = tree.get_block(root, "u").unwrap();

        assert_eq!(tree.active_view(u).unwrap(), None);
        tree.set_active(u, Some(1)).unwrap();
        let halves = tree.get_block(u, "data").unwrap();
        assert_eq!(tree.get_int(halves, "lo").unwrap(), 0x1234);
        tree.set(halves, "hi", 0xabcdu16).unwrap();

        tree.set_active(u, Some(0)).unwrap();
        assert_eq!(tree.get_int(u, "data").unwrap(), 0xabcd_1234);
        assert_eq!(tree.union_raw(u).unwrap(), &[0x34, 0x12, 0xcd, 0xab]);
        assert_eq!(tree.active_view(u).unwrap(), None);
    }

    #[test]
    fn test_big_endian_narrow_view_is_right_aligned() {
        let def = container_desc(
            "root",
            [union_desc("u", 4, None, [field(&UINT8, "low"), field(&UINT32_BE, "all")])
                .field_type(&UNION_BE)],
        )
        .build()
        .unwrap();
        let mut tag = Tag::parse(def, &[0, 0, 0, 7], TagOptions::default()).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        let u = tree.get_block(root, "u").unwrap();

        tree.set_active(u, Some(0)).unwrap();
        assert_eq!(tree.get_int(u, "data").unwrap(), 7);
        tree.set(u, "data", 9u8).unwrap();
        assert_eq!(tree.union_raw(u).unwrap(), &[0, 0, 0, 9]);
    }
}
