//! Structural edits: array elements and struct/container fields.
//!
//! Array edits keep a path or callable `SIZE` in step with the element
//! count. Field edits rewrite the node's descriptor (copy-on-write) but
//! leave every size and offset value to the caller.

use std::sync::Arc;

use super::{AttrIndex, BlockTree, Key, NodeId, NodeKind, SizeOp};
use crate::descriptor::{DescRef, Descriptor};
use crate::{parse, Error, Result, Value};

impl BlockTree {
    fn attrs_mut(&mut self, id: NodeId) -> Result<&mut Vec<Value>> {
        let name = self.name(id).to_owned();
        match &mut self.node_mut(id)?.kind {
            NodeKind::List { attrs, .. } => Ok(attrs),
            _ => Err(Error::descriptor(format!("'{}' has no indexed slots", name))),
        }
    }

    fn array_element_desc(&self, id: NodeId) -> Result<DescRef> {
        let desc = self.desc(id)?;
        if !desc.field_type.flags.is_array {
            return Err(Error::descriptor(format!(
                "'{}' ({}) is not an array",
                desc.name, desc.field_type
            )));
        }
        desc.sub_struct.clone().ok_or_else(|| {
            Error::descriptor(format!("array '{}' has no SUB_STRUCT", desc.name))
        })
    }

    /// Put a value (or a freshly built default) into an empty slot.
    fn fill_slot(&mut self, id: NodeId, index: usize, desc: &DescRef, value: Option<Value>) -> Result<()> {
        match value {
            Some(value) => self.set_slot(id, AttrIndex::Index(index), value),
            None => parse::parse_child(self, desc, id, AttrIndex::Index(index), None, 0).map(|_| ()),
        }
    }

    fn insert_slots(&mut self, id: NodeId, index: usize, count: usize) -> Result<()> {
        let name = self.name(id).to_owned();
        let attrs = self.attrs_mut(id)?;
        if index > attrs.len() {
            return Err(Error::AttributeNotFound {
                block: name,
                key: format!("[{}]", index),
            });
        }
        attrs.splice(index..index, std::iter::repeat(Value::None).take(count));
        Ok(())
    }

    fn take_slot(&mut self, id: NodeId, index: usize) -> Result<Value> {
        let name = self.name(id).to_owned();
        let attrs = self.attrs_mut(id)?;
        if index >= attrs.len() {
            return Err(Error::AttributeNotFound {
                block: name,
                key: format!("[{}]", index),
            });
        }
        let value = attrs.remove(index);
        if let Value::Block(child) = value {
            self.node_mut(child)?.parent = None;
        }
        Ok(value)
    }

    /// Bring a path or callable `SIZE` in line after `delta` elements
    /// were added or removed.
    fn resize_array(&mut self, id: NodeId, op: SizeOp, delta: usize) -> Result<()> {
        if self.desc(id)?.size.is_none() || delta == 0 {
            return Ok(());
        }
        self.set_size(id, None, Some(delta), Some(op))
    }

    /// Append an element to an array. `None` builds a default element.
    ///
    /// Returns the new element's index.
    pub fn append(&mut self, id: NodeId, value: Option<Value>) -> Result<usize> {
        let index = self.len(id);
        self.insert(id, index, value)?;
        Ok(index)
    }

    /// Insert an element into an array. `None` builds a default element.
    pub fn insert(&mut self, id: NodeId, index: usize, value: Option<Value>) -> Result<()> {
        let sub = self.array_element_desc(id)?;
        self.insert_slots(id, index, 1)?;
        let filled = self
            .fill_slot(id, index, &sub, value)
            .and_then(|_| self.resize_array(id, SizeOp::Add, 1));
        if let Err(err) = filled {
            if let Ok(Value::Block(child)) = self.take_slot(id, index) {
                self.remove(child);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Append several elements; each `None` builds a default element.
    pub fn extend(&mut self, id: NodeId, values: impl IntoIterator<Item = Option<Value>>) -> Result<()> {
        let sub = self.array_element_desc(id)?;
        let start = self.len(id);
        let values: Vec<_> = values.into_iter().collect();
        let count = values.len();
        self.insert_slots(id, start, count)?;
        let mut filled = Ok(());
        for (i, value) in values.into_iter().enumerate() {
            filled = self.fill_slot(id, start + i, &sub, value);
            if filled.is_err() {
                break;
            }
        }
        let filled = filled.and_then(|_| self.resize_array(id, SizeOp::Add, count));
        if let Err(err) = filled {
            for _ in 0..count {
                if let Ok(Value::Block(child)) = self.take_slot(id, start) {
                    self.remove(child);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Remove an array element (the last one for `None`) and return it.
    ///
    /// A popped block stays in the arena, detached, until it is stored
    /// elsewhere or [`remove`](Self::remove)d.
    pub fn pop(&mut self, id: NodeId, index: Option<usize>) -> Result<Value> {
        self.array_element_desc(id)?;
        let len = self.len(id);
        let index = match index {
            Some(i) => i,
            None => len.checked_sub(1).ok_or_else(|| Error::AttributeNotFound {
                block: self.name(id).to_owned(),
                key: "[-1]".to_owned(),
            })?,
        };
        let value = self.take_slot(id, index)?;
        if let Err(err) = self.resize_array(id, SizeOp::Sub, 1) {
            self.insert_slots(id, index, 1)?;
            self.set_slot(id, AttrIndex::Index(index), value)?;
            return Err(err);
        }
        Ok(value)
    }

    fn edit_fields(&mut self, id: NodeId, edit: impl FnOnce(&mut Descriptor) -> Result<()>) -> Result<()> {
        let desc = self.desc(id)?;
        if desc.field_type.flags.is_array || !desc.field_type.is_list() {
            return Err(Error::descriptor(format!(
                "'{}' ({}) has no named fields",
                desc.name, desc.field_type
            )));
        }
        let mut copy = Descriptor::make_unique(desc);
        edit(&mut copy)?;
        self.node_mut(id)?.desc = Arc::new(copy);
        Ok(())
    }

    /// Add a named field at the end of a struct or container.
    pub fn append_field(&mut self, id: NodeId, desc: DescRef, value: Option<Value>) -> Result<usize> {
        let index = self.len(id);
        self.insert_field(id, index, desc, value)?;
        Ok(index)
    }

    /// Insert a named field into a struct or container.
    ///
    /// In a struct the new field is placed right after the previous one
    /// (offset 0 when first). The struct size is left alone.
    pub fn insert_field(&mut self, id: NodeId, index: usize, desc: DescRef, value: Option<Value>) -> Result<()> {
        if index > self.len(id) {
            return Err(Error::AttributeNotFound {
                block: self.name(id).to_owned(),
                key: format!("[{}]", index),
            });
        }
        let offset = match index.checked_sub(1) {
            Some(prev) => {
                let prev_off = self.desc(id)?.attr_offs.get(prev).copied();
                match prev_off {
                    Some(off) => off + self.get_size(id, Some(AttrIndex::Index(prev)))?,
                    None => 0,
                }
            }
            None => 0,
        };
        self.edit_fields(id, |parent| {
            if parent.name_map.contains_key(&desc.name) {
                return Err(Error::DescEdit(format!(
                    "'{}' already has a field named '{}'",
                    parent.name, desc.name
                )));
            }
            parent.entries.insert(index, Arc::clone(&desc));
            if !parent.attr_offs.is_empty() || parent.field_type.flags.is_struct {
                parent.attr_offs.insert(index.min(parent.attr_offs.len()), offset);
            }
            parent.rebuild_name_map();
            Ok(())
        })?;
        self.insert_slots(id, index, 1)?;
        self.fill_slot(id, index, &desc, value)
    }

    /// Remove a named field from a struct or container and return its value.
    pub fn remove_field<'k>(&mut self, id: NodeId, key: impl Into<Key<'k>>) -> Result<Value> {
        let index = match self.resolve_key(id, key.into())? {
            AttrIndex::Index(i) => i,
            other => {
                return Err(Error::DescEdit(format!(
                    "cannot remove {} from '{}'",
                    other,
                    self.name(id)
                )))
            }
        };
        self.edit_fields(id, |parent| {
            if index < parent.entries.len() {
                parent.entries.remove(index);
            }
            if index < parent.attr_offs.len() {
                parent.attr_offs.remove(index);
            }
            parent.rebuild_name_map();
            Ok(())
        })?;
        self.take_slot(id, index)
    }

    /// Swap a node's edited descriptor back for the shared one it was
    /// copied from.
    pub fn restore_desc(&mut self, id: NodeId) -> Result<()> {
        let desc = self.desc(id)?;
        let Some(orig) = desc.orig_desc.clone() else {
            return Ok(());
        };
        let node = self.node(id)?;
        if let NodeKind::List { attrs, .. } = &node.kind {
            if !orig.field_type.flags.is_array && orig.entry_count() != attrs.len() {
                return Err(Error::DescEdit(format!(
                    "'{}' has {} fields but its original descriptor has {}",
                    orig.name,
                    attrs.len(),
                    orig.entry_count()
                )));
            }
        }
        self.node_mut(id)?.desc = orig;
        Ok(())
    }
}
