//! Normalized field descriptors.
//!
//! A [`Descriptor`] describes one field: its [`FieldType`], name, size and
//! offset rules, and (for composite fields) its children. Descriptors are
//! shared as [`DescRef`] (`Arc<Descriptor>`) and never mutated in place;
//! edits go through [`Descriptor::make_unique`], which clones the
//! descriptor and remembers the original.

use std::fmt;
use std::sync::Arc;

use bytetree_common::BinaryReader;
use hashbrown::HashMap as FastHashMap;
use rustc_hash::FxHasher;

use crate::block::{AttrIndex, BlockTree, NodeId};
use crate::field_type::{FieldType, Kind};
use crate::{CaseKey, Result, Value};

pub(crate) type FxHashMap<K, V> = FastHashMap<K, V, std::hash::BuildHasherDefault<FxHasher>>;

/// Shared, immutable descriptor handle.
pub type DescRef = Arc<Descriptor>;

/// Everything a callable descriptor value gets to look at.
///
/// `parent` is the block owning the slot being resolved, `node` is the
/// slot's own block if it holds one, and `attr_index` is the slot.
#[derive(Clone, Copy)]
pub struct FieldContext<'a> {
    pub tree: &'a BlockTree,
    pub desc: &'a Descriptor,
    pub parent: Option<NodeId>,
    pub node: Option<NodeId>,
    pub attr_index: Option<AttrIndex>,
    pub raw: Option<&'a [u8]>,
    pub root_offset: usize,
    pub offset: usize,
}

impl<'a> FieldContext<'a> {
    /// A context with no raw input, positioned at offset 0.
    pub fn detached(tree: &'a BlockTree, desc: &'a Descriptor) -> Self {
        Self {
            tree,
            desc,
            parent: None,
            node: None,
            attr_index: None,
            raw: None,
            root_offset: 0,
            offset: 0,
        }
    }

    /// A reader over the raw input positioned at `root_offset + offset`.
    pub fn reader(&self) -> Option<BinaryReader<'a>> {
        self.raw
            .map(|raw| BinaryReader::new_at(raw, self.root_offset + self.offset))
    }

    /// Absolute position of the cursor in the raw input.
    #[inline]
    pub fn position(&self) -> usize {
        self.root_offset + self.offset
    }

    /// Resolve a dotted path relative to the slot this context describes.
    pub fn neighbor(&self, path: &str) -> Result<Value> {
        match (self.node, self.parent) {
            (Some(node), _) => self.tree.get_neighbor(path, node, None),
            (None, Some(parent)) => self.tree.get_neighbor(path, parent, self.attr_index),
            (None, None) => Err(crate::Error::Neighbor {
                path: path.to_owned(),
                reason: "no block to start from".to_owned(),
            }),
        }
    }
}

/// Query-mode callable for size/pointer metadata.
pub type MetaGetter = Arc<dyn Fn(&FieldContext<'_>) -> Result<usize> + Send + Sync>;

/// Set-mode callable for size/pointer metadata.
///
/// Receives the owning block, the slot (if any), and the new value.
pub type MetaSetter =
    Arc<dyn Fn(&mut BlockTree, NodeId, Option<AttrIndex>, usize) -> Result<()> + Send + Sync>;

/// A numeric metadata entry: `SIZE`, `POINTER`, or a custom key.
#[derive(Clone)]
pub enum Meta {
    /// A value stored in the descriptor itself.
    Literal(usize),
    /// A dotted path to the field holding the value.
    Path(String),
    /// Callables computing (and optionally storing) the value.
    Func {
        get: MetaGetter,
        set: Option<MetaSetter>,
    },
}

impl Meta {
    /// A read-only callable.
    pub fn func<F>(get: F) -> Self
    where
        F: Fn(&FieldContext<'_>) -> Result<usize> + Send + Sync + 'static,
    {
        Meta::Func {
            get: Arc::new(get),
            set: None,
        }
    }

    /// A callable with a setter used when the value must change.
    pub fn func_with_setter<F, S>(get: F, set: S) -> Self
    where
        F: Fn(&FieldContext<'_>) -> Result<usize> + Send + Sync + 'static,
        S: Fn(&mut BlockTree, NodeId, Option<AttrIndex>, usize) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Meta::Func {
            get: Arc::new(get),
            set: Some(Arc::new(set)),
        }
    }

    #[inline]
    pub fn as_literal(&self) -> Option<usize> {
        match self {
            Meta::Literal(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<usize> for Meta {
    fn from(v: usize) -> Self {
        Meta::Literal(v)
    }
}

impl From<&str> for Meta {
    fn from(v: &str) -> Self {
        Meta::Path(v.to_owned())
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Meta::Literal(v) => write!(f, "{}", v),
            Meta::Path(p) => write!(f, "{:?}", p),
            Meta::Func { set, .. } => {
                write!(f, "<fn{}>", if set.is_some() { " +setter" } else { "" })
            }
        }
    }
}

/// Picks a case key for a switch or union.
pub type CaseSelector = Arc<dyn Fn(&FieldContext<'_>) -> Result<CaseKey> + Send + Sync>;

/// Decides whether a while-array has another element.
pub type WhilePredicate = Arc<dyn Fn(&FieldContext<'_>) -> Result<bool> + Send + Sync>;

/// The `CASE` entry of a descriptor.
#[derive(Clone)]
pub enum Case {
    /// Dotted path to the field whose value is the case key.
    Path(String),
    /// Callable returning the case key.
    Select(CaseSelector),
    /// Callable deciding if a while-array continues.
    While(WhilePredicate),
}

impl From<&str> for Case {
    fn from(path: &str) -> Self {
        Case::Path(path.to_string())
    }
}

impl fmt::Debug for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Case::Path(p) => write!(f, "Path({:?})", p),
            Case::Select(_) => write!(f, "Select(<fn>)"),
            Case::While(_) => write!(f, "While(<fn>)"),
        }
    }
}

/// Transforms an outer byte stream into the inner buffer a sub-structure is
/// parsed from, and back.
pub trait StreamCodec: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str {
        "stream"
    }

    /// Decode starting at absolute position `start` of `raw`.
    ///
    /// Returns the inner buffer and how many outer bytes were consumed.
    fn decode(&self, ctx: &FieldContext<'_>, raw: &[u8], start: usize) -> Result<(Vec<u8>, usize)>;

    /// Encode a serialized inner buffer for the outer stream.
    fn encode(&self, _ctx: &FieldContext<'_>, inner: Vec<u8>) -> Result<Vec<u8>> {
        Ok(inner)
    }
}

/// A named option of an enum field, or a named flag of a bool field.
///
/// For bool fields `value` is the flag's bit mask.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumOption {
    pub name: String,
    pub value: Value,
}

impl EnumOption {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A normalized field descriptor.
#[derive(Clone)]
pub struct Descriptor {
    pub field_type: &'static FieldType,
    pub name: String,
    pub size: Option<Meta>,
    pub pointer: Option<Meta>,
    pub align: Option<usize>,
    /// When false, parsing/serializing this field does not move the cursor
    /// of the enclosing structure.
    pub carry_off: bool,
    /// Start a new steptree scope even inside an enclosing one.
    pub steptree_root: bool,
    /// Numbered child descriptors (fields, switch cases, union views).
    pub entries: Vec<DescRef>,
    pub name_map: FxHashMap<String, usize>,
    /// Byte offsets of struct fields, or bit offsets in a bit struct.
    pub attr_offs: Vec<usize>,
    /// Element descriptor of arrays, wrapped descriptor of stream adapters.
    pub sub_struct: Option<DescRef>,
    pub steptree: Option<DescRef>,
    pub case: Option<Case>,
    pub case_map: FxHashMap<CaseKey, usize>,
    /// Fallback descriptor of a switch.
    pub default_case: Option<DescRef>,
    /// Default value of a data field.
    pub default: Option<Value>,
    pub options: Vec<EnumOption>,
    pub adapter: Option<Arc<dyn StreamCodec>>,
    /// Custom numeric metadata.
    pub meta: FxHashMap<String, Meta>,
    /// The shared descriptor this one was made unique from.
    pub orig_desc: Option<DescRef>,
}

impl Descriptor {
    /// A bare descriptor of the given type.
    pub fn new(field_type: &'static FieldType, name: impl Into<String>) -> Self {
        Self {
            field_type,
            name: name.into(),
            size: None,
            pointer: None,
            align: None,
            carry_off: true,
            steptree_root: false,
            entries: Vec::new(),
            name_map: FxHashMap::default(),
            attr_offs: Vec::new(),
            sub_struct: None,
            steptree: None,
            case: None,
            case_map: FxHashMap::default(),
            default_case: None,
            default: None,
            options: Vec::new(),
            adapter: None,
            meta: FxHashMap::default(),
            orig_desc: None,
        }
    }

    /// Number of numbered entries.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get a numbered entry.
    #[inline]
    pub fn entry(&self, index: usize) -> Option<&DescRef> {
        self.entries.get(index)
    }

    /// Index of a named entry.
    #[inline]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_map.get(name).copied()
    }

    /// Descriptor governing a child slot, as declared (ignores what a
    /// switch may have placed there).
    pub fn child_desc(&self, index: AttrIndex) -> Option<&DescRef> {
        match index {
            AttrIndex::Index(_) if self.field_type.flags.is_array => self.sub_struct.as_ref(),
            AttrIndex::Index(i) => self.entries.get(i),
            AttrIndex::Steptree => self.steptree.as_ref(),
            AttrIndex::Data => self.sub_struct.as_ref(),
        }
    }

    /// Look up a metadata entry by key.
    pub fn meta(&self, key: &str) -> Option<&Meta> {
        match key {
            "SIZE" => self.size.as_ref(),
            "POINTER" => self.pointer.as_ref(),
            other => self.meta.get(other),
        }
    }

    /// Replace a metadata entry by key.
    pub fn set_meta_entry(&mut self, key: &str, value: Meta) {
        match key {
            "SIZE" => self.size = Some(value),
            "POINTER" => self.pointer = Some(value),
            other => {
                self.meta.insert(other.to_owned(), value);
            }
        }
    }

    /// Resolve a case key to the descriptor it selects.
    ///
    /// Unknown keys select `default_case`.
    pub fn case_desc(&self, key: Option<&CaseKey>) -> Option<&DescRef> {
        key.and_then(|k| self.case_map.get(k))
            .and_then(|&i| self.entries.get(i))
            .or(self.default_case.as_ref())
    }

    /// Index of the view a case key activates, for unions.
    pub fn case_index(&self, key: &CaseKey) -> Option<usize> {
        self.case_map.get(key).copied()
    }

    /// Clone this descriptor for editing, remembering the shared original.
    ///
    /// Child entries stay shared; everything else is copied.
    pub fn make_unique(this: &DescRef) -> Descriptor {
        let mut copy = Descriptor::clone(this);
        copy.orig_desc = Some(this.orig_desc.clone().unwrap_or_else(|| Arc::clone(this)));
        copy
    }

    /// Rebuild `name_map` from the entries' names.
    pub fn rebuild_name_map(&mut self) {
        self.name_map = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.name.is_empty())
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
    }

    /// Check whether any descriptor in this hierarchy uses pointers or
    /// steptrees.
    pub fn has_pointers_or_steptrees(&self) -> bool {
        self.pointer.is_some()
            || self.steptree.is_some()
            || self.entries.iter().any(|d| d.has_pointers_or_steptrees())
            || self
                .sub_struct
                .iter()
                .chain(&self.default_case)
                .any(|d| d.has_pointers_or_steptrees())
    }

    /// Fixed byte size of this field if it can be known without data.
    pub fn fixed_size(&self) -> Option<usize> {
        let ft = self.field_type;
        match ft.kind {
            Kind::Void => Some(0),
            Kind::Struct | Kind::Union | Kind::BitStruct | Kind::Pad => {
                self.size.as_ref().and_then(Meta::as_literal)
            }
            _ if ft.flags.is_block && !ft.flags.is_data => None,
            _ if ft.flags.is_oe_size => None,
            _ if ft.flags.is_var_size => self.size.as_ref().and_then(Meta::as_literal),
            _ if ft.flags.is_bit_based => None,
            _ => Some(ft.size),
        }
    }

    /// Width in bits of a bit-based field.
    pub fn bit_size(&self) -> Option<usize> {
        if !self.field_type.flags.is_bit_based {
            return None;
        }
        self.size.as_ref().and_then(Meta::as_literal).or(Some(self.field_type.size))
    }

    /// Look up an enum option by name.
    pub fn option(&self, name: &str) -> Option<&EnumOption> {
        self.options.iter().find(|o| o.name == name)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Descriptor");
        s.field("name", &self.name)
            .field("type", &format_args!("{}", self.field_type));
        if let Some(size) = &self.size {
            s.field("size", size);
        }
        if let Some(pointer) = &self.pointer {
            s.field("pointer", pointer);
        }
        if !self.entries.is_empty() {
            s.field("entries", &self.entries);
        }
        if !self.attr_offs.is_empty() {
            s.field("attr_offs", &self.attr_offs);
        }
        if let Some(sub) = &self.sub_struct {
            s.field("sub_struct", sub);
        }
        if let Some(step) = &self.steptree {
            s.field("steptree", step);
        }
        if let Some(case) = &self.case {
            s.field("case", case);
        }
        s.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_types::{STRUCT, UINT16, UINT32};

    #[test]
    fn test_make_unique_keeps_entries_shared() {
        let a = Arc::new(Descriptor::new(&UINT16, "a"));
        let mut parent = Descriptor::new(&STRUCT, "parent");
        parent.entries.push(Arc::clone(&a));
        parent.rebuild_name_map();
        let parent = Arc::new(parent);

        let mut copy = Descriptor::make_unique(&parent);
        copy.size = Some(Meta::Literal(4));

        assert!(Arc::ptr_eq(&copy.entries[0], &a));
        assert!(Arc::ptr_eq(copy.orig_desc.as_ref().unwrap(), &parent));
        assert!(parent.size.is_none());

        // A second edit still points at the first shared original.
        let copy = Arc::new(copy);
        let again = Descriptor::make_unique(&copy);
        assert!(Arc::ptr_eq(again.orig_desc.as_ref().unwrap(), &parent));
    }

    #[test]
    fn test_case_desc_falls_back_to_default() {
        let mut switch = Descriptor::new(&crate::field_types::SWITCH, "s");
        switch.entries.push(Arc::new(Descriptor::new(&UINT16, "a")));
        switch.case_map.insert(CaseKey::from("A"), 0);
        switch.default_case = Some(Arc::new(Descriptor::new(&UINT32, "fallback")));

        assert_eq!(switch.case_desc(Some(&CaseKey::from("A"))).unwrap().name, "a");
        assert_eq!(switch.case_desc(Some(&CaseKey::from("Z"))).unwrap().name, "fallback");
        assert_eq!(switch.case_desc(None).unwrap().name, "fallback");
    }

    #[test]
    fn test_meta_lookup_by_key() {
        let mut d = Descriptor::new(&UINT32, "x");
        d.set_meta_entry("SIZE", Meta::Literal(4));
        d.set_meta_entry("COUNT", Meta::from(".n"));

        assert_eq!(d.meta("SIZE").and_then(Meta::as_literal), Some(4));
        assert!(matches!(d.meta("COUNT"), Some(Meta::Path(p)) if p == ".n"));
        assert!(d.meta("POINTER").is_none());
    }
}
