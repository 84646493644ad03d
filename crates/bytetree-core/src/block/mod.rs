//! The runtime block tree.
//!
//! Every node lives in one [`BlockTree`] arena and is addressed by a
//! [`NodeId`]. A parent owns its children through the [`Value::Block`]
//! handles in its slots; the `parent` link on each node is only a lookup
//! index back into the arena.
//!
//! The API is split across submodules:
//!
//! - this module: slots, keys, and structural queries
//! - [`meta`]: size, pointer, and neighbor resolution
//! - [`mutate`]: array and field insertion/removal
//! - [`data`]: enum and bool blocks
//! - [`union`]: union views

mod data;
pub(crate) mod meta;
mod mutate;
mod union;

use std::fmt;

pub use meta::SizeOp;

use crate::descriptor::DescRef;
use crate::field_type::NodeClass;
use crate::{Error, Result, Value};

/// Handle to a node in a [`BlockTree`].
///
/// Handles are only meaningful for the tree that issued them. A handle to
/// a removed node may be reissued for a later node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NodeId(u32);

impl NodeId {
    /// Position of the node in its arena.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A slot of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AttrIndex {
    /// A numbered field or array element.
    Index(usize),
    /// The steptree attached to a list block.
    Steptree,
    /// The payload of a data, union, or wrapper block.
    Data,
}

impl From<usize> for AttrIndex {
    fn from(i: usize) -> Self {
        AttrIndex::Index(i)
    }
}

impl fmt::Display for AttrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrIndex::Index(i) => write!(f, "{}", i),
            AttrIndex::Steptree => write!(f, "STEPTREE"),
            AttrIndex::Data => write!(f, "data"),
        }
    }
}

/// How a caller names a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Index(usize),
    Name(&'a str),
    Steptree,
}

impl From<usize> for Key<'_> {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(name: &'a str) -> Self {
        Key::Name(name)
    }
}

impl fmt::Display for Key<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "[{}]", i),
            Key::Name(n) => write!(f, "'{}'", n),
            Key::Steptree => write!(f, "STEPTREE"),
        }
    }
}

/// Raw storage of a union plus its decoded view, if one is active.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnionState {
    pub raw: Vec<u8>,
    /// Index of the active view among the union's entries.
    pub active: Option<usize>,
    /// The active view's value.
    pub view: Value,
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Struct, container, bit struct, or array.
    List { attrs: Vec<Value>, steptree: Value },
    /// Enum or bool field.
    Data(Value),
    Union(UnionState),
    /// Stream adapter; holds the wrapped sub-structure.
    Wrapper(Value),
    Void,
}

/// One node of the tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub desc: DescRef,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    /// An empty node of the kind its descriptor's type instantiates.
    ///
    /// List nodes get one empty slot per descriptor entry (arrays get
    /// none).
    pub fn empty(desc: DescRef, parent: Option<NodeId>) -> Self {
        let kind = match desc.field_type.node_class {
            NodeClass::List => NodeKind::List {
                attrs: vec![Value::None; desc.entry_count()],
                steptree: Value::None,
            },
            NodeClass::Array => NodeKind::List {
                attrs: Vec::new(),
                steptree: Value::None,
            },
            NodeClass::Data => NodeKind::Data(Value::None),
            NodeClass::Union => NodeKind::Union(UnionState::default()),
            NodeClass::Wrapper => NodeKind::Wrapper(Value::None),
            NodeClass::Value | NodeClass::Void => NodeKind::Void,
        };
        Self { desc, parent, kind }
    }
}

/// Arena owning every node of one parsed or constructed structure.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    root: Option<NodeId>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Add a node to the arena.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId((self.nodes.len() - 1) as u32)
            }
        }
    }

    /// Remove a node and everything it owns.
    pub fn remove(&mut self, id: NodeId) {
        for (_, node) in self.walk(id) {
            if let Some(slot) = self.nodes.get_mut(node.index()) {
                if slot.take().is_some() {
                    self.free.push(node.0);
                }
            }
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| dangling(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| dangling(id))
    }

    /// Descriptor of a node.
    #[inline]
    pub fn desc(&self, id: NodeId) -> Result<&DescRef> {
        self.node(id).map(|n| &n.desc)
    }

    /// Parent of a node, if it has one.
    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.parent)
    }

    /// Name of a node's descriptor.
    pub fn name(&self, id: NodeId) -> &str {
        self.node(id).map_or("<removed>", |n| n.desc.name.as_str())
    }

    /// Topmost ancestor of a node.
    pub fn top(&self, mut id: NodeId) -> NodeId {
        while let Some(parent) = self.parent(id) {
            id = parent;
        }
        id
    }

    /// Turn a caller-facing key into a slot of the given node.
    pub fn resolve_key(&self, id: NodeId, key: Key<'_>) -> Result<AttrIndex> {
        let node = self.node(id)?;
        let not_found = || Error::AttributeNotFound {
            block: node.desc.name.clone(),
            key: key.to_string(),
        };
        match (&node.kind, key) {
            (NodeKind::List { attrs, .. }, Key::Index(i)) if i < attrs.len() => {
                Ok(AttrIndex::Index(i))
            }
            (NodeKind::List { .. }, Key::Steptree) if node.desc.steptree.is_some() => {
                Ok(AttrIndex::Steptree)
            }
            (NodeKind::List { attrs, .. }, Key::Name(name)) => {
                if let Some(i) = node.desc.index_of(name).filter(|&i| i < attrs.len()) {
                    return Ok(AttrIndex::Index(i));
                }
                match &node.desc.steptree {
                    Some(step) if step.name == name || name == "STEPTREE" => {
                        Ok(AttrIndex::Steptree)
                    }
                    _ => Err(not_found()),
                }
            }
            (NodeKind::Data(_) | NodeKind::Union(_) | NodeKind::Wrapper(_), Key::Name(name))
                if name == "data"
                    || node.desc.sub_struct.as_ref().is_some_and(|d| d.name == name) =>
            {
                Ok(AttrIndex::Data)
            }
            (NodeKind::Data(_) | NodeKind::Union(_) | NodeKind::Wrapper(_), Key::Index(0)) => {
                Ok(AttrIndex::Data)
            }
            _ => Err(not_found()),
        }
    }

    /// Read a slot.
    pub fn slot(&self, id: NodeId, index: AttrIndex) -> Result<&Value> {
        let node = self.node(id)?;
        let value = match (&node.kind, index) {
            (NodeKind::List { attrs, .. }, AttrIndex::Index(i)) => attrs.get(i),
            (NodeKind::List { steptree, .. }, AttrIndex::Steptree) => Some(steptree),
            (NodeKind::Data(v) | NodeKind::Wrapper(v), AttrIndex::Data) => Some(v),
            (NodeKind::Union(u), AttrIndex::Data) => Some(&u.view),
            _ => None,
        };
        value.ok_or_else(|| Error::AttributeNotFound {
            block: node.desc.name.clone(),
            key: index.to_string(),
        })
    }

    fn slot_mut(&mut self, id: NodeId, index: AttrIndex) -> Result<&mut Value> {
        let desc = DescRef::clone(&self.node(id)?.desc);
        let node = self.node_mut(id)?;
        let value = match (&mut node.kind, index) {
            (NodeKind::List { attrs, .. }, AttrIndex::Index(i)) => attrs.get_mut(i),
            (NodeKind::List { steptree, .. }, AttrIndex::Steptree) => Some(steptree),
            (NodeKind::Data(v) | NodeKind::Wrapper(v), AttrIndex::Data) => Some(v),
            (NodeKind::Union(u), AttrIndex::Data) => Some(&mut u.view),
            _ => None,
        };
        match value {
            Some(v) => Ok(v),
            None => Err(Error::AttributeNotFound {
                block: desc.name.clone(),
                key: index.to_string(),
            }),
        }
    }

    /// Store a value into a slot.
    ///
    /// A block value is re-parented to `id`. A block previously held by the
    /// slot is removed from the arena unless it is the one being stored.
    pub fn set_slot(&mut self, id: NodeId, index: AttrIndex, value: Value) -> Result<()> {
        if let Value::Block(child) = value {
            if child == id {
                return Err(Error::descriptor(format!(
                    "cannot store '{}' inside itself",
                    self.name(id)
                )));
            }
            self.node_mut(child)?.parent = Some(id);
        }
        let old = std::mem::replace(self.slot_mut(id, index)?, value.clone());
        if let Value::Block(old) = old {
            if value != Value::Block(old) {
                self.remove(old);
            }
        }
        Ok(())
    }

    /// Append a slot to a list node.
    pub(crate) fn push_slot(&mut self, id: NodeId, value: Value) -> Result<usize> {
        if let Value::Block(child) = value {
            self.node_mut(child)?.parent = Some(id);
        }
        match &mut self.node_mut(id)?.kind {
            NodeKind::List { attrs, .. } => {
                attrs.push(value);
                Ok(attrs.len() - 1)
            }
            _ => Err(Error::descriptor(format!(
                "'{}' has no indexed slots",
                self.name(id)
            ))),
        }
    }

    /// Get the value under a key.
    pub fn get<'k>(&self, id: NodeId, key: impl Into<Key<'k>>) -> Result<&Value> {
        let index = self.resolve_key(id, key.into())?;
        self.slot(id, index)
    }

    /// Set the value under a key.
    pub fn set<'k>(&mut self, id: NodeId, key: impl Into<Key<'k>>, value: impl Into<Value>) -> Result<()> {
        let index = self.resolve_key(id, key.into())?;
        self.set_slot(id, index, value.into())
    }

    /// Get a child block under a key.
    pub fn get_block<'k>(&self, id: NodeId, key: impl Into<Key<'k>>) -> Result<NodeId> {
        let key = key.into();
        self.get(id, key)?.as_block().ok_or_else(|| Error::AttributeNotFound {
            block: self.name(id).to_owned(),
            key: format!("{} (as a block)", key),
        })
    }

    /// Get an integer under a key, looking through enum and bool blocks.
    pub fn get_int<'k>(&self, id: NodeId, key: impl Into<Key<'k>>) -> Result<i128> {
        let key = key.into();
        self.data_value(self.get(id, key)?)
            .as_int()
            .ok_or_else(|| Error::AttributeNotFound {
                block: self.name(id).to_owned(),
                key: format!("{} (as an integer)", key),
            })
    }

    /// Get a string under a key, looking through enum blocks.
    pub fn get_str<'k>(&self, id: NodeId, key: impl Into<Key<'k>>) -> Result<&str> {
        let key = key.into();
        self.data_value(self.get(id, key)?)
            .as_str()
            .ok_or_else(|| Error::AttributeNotFound {
                block: self.name(id).to_owned(),
                key: format!("{} (as a string)", key),
            })
    }

    /// The scalar a value stands for: a data block's payload, or the value
    /// itself.
    pub fn data_value<'v>(&'v self, value: &'v Value) -> &'v Value {
        match value {
            Value::Block(id) => match self.node(*id).map(|n| &n.kind) {
                Ok(NodeKind::Data(inner)) => inner,
                _ => value,
            },
            other => other,
        }
    }

    /// Number of indexed slots (array length, field count).
    pub fn len(&self, id: NodeId) -> usize {
        match self.node(id).map(|n| &n.kind) {
            Ok(NodeKind::List { attrs, .. }) => attrs.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self, id: NodeId) -> bool {
        self.len(id) == 0
    }

    /// Slots of a node in order: indexed slots, then the steptree or payload.
    pub fn children(&self, id: NodeId) -> Vec<(AttrIndex, &Value)> {
        let Ok(node) = self.node(id) else {
            return Vec::new();
        };
        match &node.kind {
            NodeKind::List { attrs, steptree } => {
                let mut out: Vec<_> = attrs
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (AttrIndex::Index(i), v))
                    .collect();
                if node.desc.steptree.is_some() {
                    out.push((AttrIndex::Steptree, steptree));
                }
                out
            }
            NodeKind::Data(v) | NodeKind::Wrapper(v) => vec![(AttrIndex::Data, v)],
            NodeKind::Union(u) => vec![(AttrIndex::Data, &u.view)],
            NodeKind::Void => Vec::new(),
        }
    }

    /// Depth-first pre-order walk of a node and every block below it.
    pub fn walk(&self, id: NodeId) -> Vec<(usize, NodeId)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, id)];
        while let Some((depth, node)) = stack.pop() {
            if !self.contains(node) {
                continue;
            }
            out.push((depth, node));
            let kids: Vec<NodeId> = self
                .children(node)
                .into_iter()
                .filter_map(|(_, v)| v.as_block())
                .collect();
            stack.extend(kids.into_iter().rev().map(|k| (depth + 1, k)));
        }
        out
    }

    /// Slot of a node within its parent.
    pub fn index_in_parent(&self, id: NodeId) -> Option<AttrIndex> {
        let parent = self.parent(id)?;
        self.children(parent)
            .into_iter()
            .find(|(_, v)| v.as_block() == Some(id))
            .map(|(i, _)| i)
    }

    /// Descriptor governing a slot: the child block's own descriptor when
    /// the slot holds a block, else the one the parent declares.
    pub fn attr_desc(&self, id: NodeId, index: AttrIndex) -> Result<DescRef> {
        if let Ok(Value::Block(child)) = self.slot(id, index) {
            return self.desc(*child).cloned();
        }
        let desc = self.desc(id)?;
        desc.child_desc(index).cloned().ok_or_else(|| Error::AttributeNotFound {
            block: desc.name.clone(),
            key: index.to_string(),
        })
    }
}

fn dangling(id: NodeId) -> Error {
    Error::AttributeNotFound {
        block: "<tree>".to_owned(),
        key: format!("node {}", id.index()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{array_desc, field, struct_desc};
    use crate::field_types::{UINT16, UINT32};
    use crate::Tag;

    fn sample() -> Tag {
        let def = struct_desc(
            "root",
            [field(&UINT16, "a"), field(&UINT32, "b")],
        )
        .build()
        .unwrap();
        Tag::new(def).unwrap()
    }

    #[test]
    fn test_get_set_by_name_and_index() {
        let mut tag = sample();
        let root = tag.root();
        let tree = tag.tree_mut();

        tree.set(root, "a", 5u16).unwrap();
        tree.set(root, 1usize, 100_000u32).unwrap();

        assert_eq!(tree.get_int(root, "a").unwrap(), 5);
        assert_eq!(tree.get(root, "b").unwrap(), &Value::Int(100_000));
        assert_eq!(tree.len(root), 2);
    }

    #[test]
    fn test_unknown_key_names_block() {
        let tag = sample();
        let err = tag.tree().get(tag.root(), "nope").unwrap_err();
        match err {
            Error::AttributeNotFound { block, key } => {
                assert_eq!(block, "root");
                assert_eq!(key, "'nope'");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_slot_names_block() {
        let mut tag = sample();
        let root = tag.root();
        let err = tag
            .tree_mut()
            .set_slot(root, AttrIndex::Index(9), Value::Int(1))
            .unwrap_err();
        match err {
            Error::AttributeNotFound { block, key } => {
                assert_eq!(block, "root");
                assert_eq!(key, AttrIndex::Index(9).to_string());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_replacing_block_frees_old_subtree() {
        let elem = struct_desc("elem", [field(&UINT16, "v")]);
        let def = struct_desc(
            "root",
            [field(&UINT16, "count")],
        )
        .build()
        .unwrap();
        let arr = array_desc("items", ".count", elem).build().unwrap();

        let mut tree = BlockTree::new();
        let root = tree.alloc(Node::empty(def, None));
        let a = tree.alloc(Node::empty(arr.clone(), None));
        let b = tree.alloc(Node::empty(arr, None));
        tree.set_slot(root, AttrIndex::Index(0), Value::Block(a)).unwrap();
        assert_eq!(tree.parent(a), Some(root));

        tree.set_slot(root, AttrIndex::Index(0), Value::Block(b)).unwrap();
        assert!(!tree.contains(a));
        assert!(tree.contains(b));
        assert_eq!(tree.node_count(), 2);
    }

    #[test]
    fn test_walk_is_depth_first() {
        let x = field(&UINT16, "x");
        let def = struct_desc(
            "root",
            [struct_desc("left", [x.clone()]), struct_desc("right", [x])],
        )
        .build()
        .unwrap();
        let tag = Tag::new(def).unwrap();
        let walked: Vec<_> = tag
            .tree()
            .walk(tag.root())
            .into_iter()
            .map(|(d, id)| (d, tag.tree().name(id).to_owned()))
            .collect();
        assert_eq!(
            walked,
            [(0, "root".to_owned()), (1, "left".to_owned()), (1, "right".to_owned())]
        );
    }
}
