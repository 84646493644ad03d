//! Top-level handle coupling a block tree with its definition.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, trace_span};

use crate::block::{BlockTree, NodeId};
use crate::descriptor::DescRef;
use crate::parse::parse_root;
use crate::pointer::{resolve_pointers, NullPointerPolicy};
use crate::serialize::serialize_tree;
use crate::{CaseKey, Error, Result, Value};

/// How a [`Tag`] is parsed and serialized.
#[derive(Debug, Clone)]
pub struct TagOptions {
    /// Where the root structure starts in the input.
    pub root_offset: usize,
    /// Lay out pointer-based fields before serializing.
    pub calc_pointers: bool,
    /// Pointer given to empty pointed fields.
    pub null_pointers: NullPointerPolicy,
    /// Case keys forced onto the outermost switches, in nesting order.
    pub case: Vec<CaseKey>,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            root_offset: 0,
            calc_pointers: true,
            null_pointers: NullPointerPolicy::default(),
            case: Vec::new(),
        }
    }
}

/// A parsed (or freshly built) structure.
pub struct Tag {
    tree: BlockTree,
    root: NodeId,
    definition: DescRef,
    path: Option<PathBuf>,
    options: TagOptions,
    parsed_len: usize,
}

impl Tag {
    /// Build a tree of default values for `definition`.
    pub fn new(definition: DescRef) -> Result<Self> {
        Self::build(definition, None, TagOptions::default())
    }

    /// Parse `data` with `definition`.
    pub fn parse(definition: DescRef, data: &[u8], options: TagOptions) -> Result<Self> {
        let _span = trace_span!("parse", definition = %definition.name, len = data.len()).entered();
        Self::build(definition, Some(data), options)
    }

    /// Memory-map and parse a file.
    pub fn from_file<P: AsRef<Path>>(definition: DescRef, path: P, options: TagOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let mut tag = Self::parse(definition, &mmap, options)?;
        tag.path = Some(path.to_path_buf());
        Ok(tag)
    }

    fn build(definition: DescRef, data: Option<&[u8]>, options: TagOptions) -> Result<Self> {
        let mut tree = BlockTree::new();
        let (value, parsed_len) = parse_root(
            &mut tree,
            &definition,
            data,
            options.root_offset,
            options.case.clone(),
        )?;
        let Value::Block(root) = value else {
            return Err(Error::descriptor(format!(
                "definition '{}' ({}) does not produce a block",
                definition.name, definition.field_type
            )));
        };
        tree.set_root(Some(root));
        Ok(Self {
            tree,
            root,
            definition,
            path: None,
            options,
            parsed_len,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BlockTree {
        &mut self.tree
    }

    pub fn definition(&self) -> &DescRef {
        &self.definition
    }

    /// File this tag was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &TagOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TagOptions {
        &mut self.options
    }

    /// Bytes consumed by the parse, relative to `root_offset`.
    pub fn parsed_len(&self) -> usize {
        self.parsed_len
    }

    /// Serialize the tree, laying out pointers first when enabled.
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        let _span = trace_span!("serialize", definition = %self.definition.name).entered();
        if self.options.calc_pointers && self.definition.has_pointers_or_steptrees() {
            let end = resolve_pointers(&mut self.tree, 0, self.options.null_pointers)?;
            debug!(end, "pointers resolved");
        }
        serialize_tree(&self.tree, 0)
    }

    /// Serialize to `path`, writing a temporary file first and renaming it
    /// over the destination.
    pub fn write_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.serialize()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tag")
            .field("definition", &self.definition.name)
            .field("path", &self.path)
            .field("nodes", &self.tree.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{container_desc, field, switch_desc};
    use crate::field_types::{BYTES_RAW, CSTR_ASCII, UINT16, UINT32, UINT8};

    fn def() -> DescRef {
        container_desc(
            "root",
            [
                field(&UINT8, "kind"),
                switch_desc(
                    "body",
                    ".kind",
                    [(1, field(&UINT16, "short")), (2, field(&CSTR_ASCII, "name"))],
                    None,
                ),
            ],
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_parse_and_serialize_round_trip() {
        let data = [2, b'h', b'i', 0];
        let mut tag = Tag::parse(def(), &data, TagOptions::default()).unwrap();
        assert_eq!(tag.parsed_len(), 4);
        assert_eq!(tag.tree().get_str(tag.root(), "body").unwrap(), "hi");
        assert_eq!(tag.serialize().unwrap(), data);
    }

    #[test]
    fn test_root_offset_skips_prefix() {
        let data = [0xff, 0xff, 1, 0x34, 0x12];
        let options = TagOptions {
            root_offset: 2,
            ..TagOptions::default()
        };
        let tag = Tag::parse(def(), &data, options).unwrap();
        assert_eq!(tag.tree().get_int(tag.root(), "body").unwrap(), 0x1234);
        assert_eq!(tag.parsed_len(), 3);
    }

    #[test]
    fn test_pointer_under_switch_default_is_laid_out() {
        let def = container_desc(
            "root",
            [
                field(&UINT8, "kind"),
                field(&UINT32, "ptr"),
                switch_desc(
                    "body",
                    ".kind",
                    [(1, field(&UINT8, "x"))],
                    Some(
                        field(&BYTES_RAW, "data")
                            .size(2usize)
                            .pointer(".ptr")
                            .carry_off(false),
                    ),
                ),
            ],
        )
        .build()
        .unwrap();
        let mut tag = Tag::new(def.clone()).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        tree.set(root, "kind", 9u8).unwrap();
        tree.set(root, "body", vec![0xaau8, 0xbb]).unwrap();

        let bytes = tag.serialize().unwrap();
        assert_eq!(tag.tree().get_int(root, "ptr").unwrap(), 5);
        assert_eq!(bytes, [9, 5, 0, 0, 0, 0xaa, 0xbb]);

        let back = Tag::parse(def, &bytes, TagOptions::default()).unwrap();
        assert_eq!(
            back.tree().get(back.root(), "body").unwrap(),
            &Value::Bytes(vec![0xaa, 0xbb])
        );
    }

    #[test]
    fn test_leaf_definition_is_rejected() {
        let leaf = field(&UINT8, "x").build().unwrap();
        let err = Tag::new(leaf).unwrap_err();
        assert!(matches!(err, Error::Descriptor(_)));
    }

    #[test]
    fn test_write_to_file_replaces_target() {
        let dir = std::env::temp_dir().join(format!("bytetree-tag-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.bin");
        fs::write(&path, b"old contents").unwrap();

        let mut tag = Tag::parse(def(), &[1, 7, 0], TagOptions::default()).unwrap();
        tag.write_to_file(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), [1, 7, 0]);
        assert_eq!(tag.path(), Some(path.as_path()));

        let back = Tag::from_file(def(), &path, TagOptions::default()).unwrap();
        assert_eq!(back.tree().get_int(back.root(), "body").unwrap(), 7);
        fs::remove_dir_all(&dir).unwrap();
    }
}
