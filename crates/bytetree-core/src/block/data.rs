//! Enum and bool blocks.

use super::{AttrIndex, BlockTree, NodeId, NodeKind};
use crate::{Error, Result, Value};

impl BlockTree {
    fn data_payload(&self, id: NodeId) -> Result<&Value> {
        match &self.node(id)?.kind {
            NodeKind::Data(value) => Ok(value),
            _ => Err(Error::AttributeNotFound {
                block: self.name(id).to_owned(),
                key: "data".to_owned(),
            }),
        }
    }

    /// Name of the option an enum block currently holds, if any matches.
    pub fn enum_name(&self, id: NodeId) -> Option<&str> {
        let node = self.node(id).ok()?;
        if !node.desc.field_type.flags.is_enum {
            return None;
        }
        let NodeKind::Data(value) = &node.kind else {
            return None;
        };
        node.desc
            .options
            .iter()
            .find(|o| &o.value == value)
            .map(|o| o.name.as_str())
    }

    /// Set an enum block to the value of a named option.
    pub fn set_enum(&mut self, id: NodeId, name: &str) -> Result<()> {
        let desc = self.desc(id)?;
        let value = desc
            .option(name)
            .map(|o| o.value.clone())
            .ok_or_else(|| Error::AttributeNotFound {
                block: desc.name.clone(),
                key: format!("option '{}'", name),
            })?;
        self.set_slot(id, AttrIndex::Data, value)
    }

    fn flag_mask(&self, id: NodeId, name: &str) -> Result<i128> {
        let desc = self.desc(id)?;
        desc.option(name)
            .and_then(|o| o.value.as_int())
            .ok_or_else(|| Error::AttributeNotFound {
                block: desc.name.clone(),
                key: format!("flag '{}'", name),
            })
    }

    /// Check whether every bit of a named flag is set on a bool block.
    pub fn flag(&self, id: NodeId, name: &str) -> Result<bool> {
        let mask = self.flag_mask(id, name)?;
        let bits = self.data_payload(id)?.as_int().unwrap_or(0);
        Ok(mask != 0 && bits & mask == mask)
    }

    /// Set or clear a named flag on a bool block.
    pub fn set_flag(&mut self, id: NodeId, name: &str, on: bool) -> Result<()> {
        let mask = self.flag_mask(id, name)?;
        let bits = self.data_payload(id)?.as_int().unwrap_or(0);
        let bits = if on { bits | mask } else { bits & !mask };
        self.set_slot(id, AttrIndex::Data, Value::Int(bits))
    }

    /// Names of the flags currently set on a bool block.
    pub fn flag_names(&self, id: NodeId) -> Vec<&str> {
        let Ok(node) = self.node(id) else {
            return Vec::new();
        };
        let bits = match &node.kind {
            NodeKind::Data(value) => value.as_int().unwrap_or(0),
            _ => return Vec::new(),
        };
        node.desc
            .options
            .iter()
            .filter(|o| o.value.as_int().is_some_and(|m| m != 0 && bits & m == m))
            .map(|o| o.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{bool_desc, container_desc, enum_desc};
    use crate::field_types::{BOOL8, UENUM16};
    use crate::Tag;

    fn tag() -> Tag {
        let def = container_desc(
            "root",
            [
                enum_desc(&UENUM16, "kind", [("none", 0), ("pcm", 1), ("float", 3)]),
                bool_desc(&BOOL8, "flags", [("loop", 1), ("stereo", 2), ("both", 3)]),
            ],
        )
        .build()
        .unwrap();
        Tag::new(def).unwrap()
    }

    #[test]
    fn test_enum_names() {
        let mut tag = tag();
        let root = tag.root();
        let tree = tag.tree_mut();
        let kind = tree.get_block(root, "kind").unwrap();

        assert_eq!(tree.enum_name(kind), Some("none"));
        tree.set_enum(kind, "float").unwrap();
        assert_eq!(tree.get_int(root, "kind").unwrap(), 3);
        assert_eq!(tree.enum_name(kind), Some("float"));

        tree.set(kind, "data", 9).unwrap();
        assert_eq!(tree.enum_name(kind), None);
        assert!(tree.set_enum(kind, "adpcm").is_err());
    }

    #[test]
    fn test_flags() {
        let mut tag = tag();
        let root = tag.root();
        let tree = tag.tree_mut();
        let flags = tree.get_block(root, "flags").unwrap();

        tree.set_flag(flags, "stereo", true).unwrap();
        assert!(tree.flag(flags, "stereo").unwrap());
        assert!(!tree.flag(flags, "both").unwrap());
        assert_eq!(tree.flag_names(flags), ["stereo"]);

        tree.set_flag(flags, "loop", true).unwrap();
        assert_eq!(tree.flag_names(flags), ["loop", "stereo", "both"]);
        tree.set_flag(flags, "both", false).unwrap();
        assert_eq!(tree.get_int(root, "flags").unwrap(), 0);
    }
}
