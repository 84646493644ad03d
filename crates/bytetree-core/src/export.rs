//! JSON export of a block tree.
//!
//! List blocks become objects keyed by field name (arrays become JSON
//! arrays), enum blocks export their option name when one matches, bool
//! blocks export the names of their set flags, and unions export their raw
//! buffer plus the active view.

use serde_json::{json, Map, Value as Json};

use crate::block::{AttrIndex, BlockTree, NodeId, NodeKind};
use crate::{Result, Value};

/// Export the subtree rooted at `id`.
pub fn to_json(tree: &BlockTree, id: NodeId) -> Result<Json> {
    let node = tree.node(id)?;
    let ft = node.desc.field_type;
    Ok(match &node.kind {
        NodeKind::List { .. } if ft.flags.is_array => {
            let mut items = Vec::new();
            let mut steptree = None;
            for (index, value) in tree.children(id) {
                match index {
                    AttrIndex::Steptree => steptree = Some(value_to_json(tree, value)?),
                    _ => items.push(value_to_json(tree, value)?),
                }
            }
            match steptree {
                Some(steptree) => json!({ "items": items, "STEPTREE": steptree }),
                None => Json::Array(items),
            }
        }
        NodeKind::List { .. } => {
            let mut map = Map::new();
            for (index, value) in tree.children(id) {
                let name = match index {
                    AttrIndex::Steptree => "STEPTREE".to_owned(),
                    _ => tree.attr_desc(id, index)?.name.clone(),
                };
                map.insert(name, value_to_json(tree, value)?);
            }
            Json::Object(map)
        }
        NodeKind::Data(value) if ft.flags.is_enum => match tree.enum_name(id) {
            Some(name) => Json::String(name.to_owned()),
            None => value_to_json(tree, value)?,
        },
        NodeKind::Data(_) if ft.flags.is_bool => {
            json!(tree.flag_names(id))
        }
        NodeKind::Data(value) | NodeKind::Wrapper(value) => value_to_json(tree, value)?,
        NodeKind::Union(state) => json!({
            "raw": hex(&state.raw),
            "active": state.active,
            "view": value_to_json(tree, &state.view)?,
        }),
        NodeKind::Void => Json::Null,
    })
}

fn value_to_json(tree: &BlockTree, value: &Value) -> Result<Json> {
    Ok(match value {
        Value::None => Json::Null,
        Value::Int(v) => match i64::try_from(*v) {
            Ok(v) => json!(v),
            Err(_) => match u64::try_from(*v) {
                Ok(v) => json!(v),
                Err(_) => Json::String(v.to_string()),
            },
        },
        Value::Float(v) | Value::Timestamp(v) => json!(v),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(hex(b)),
        Value::UInts(v) => json!(v),
        Value::SInts(v) => json!(v),
        Value::Floats(v) => json!(v),
        Value::Block(child) => to_json(tree, *child)?,
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{array_desc, bool_desc, container_desc, enum_desc, field};
    use crate::field_types::{BOOL8, BYTES_RAW, UENUM8, UINT8};
    use crate::{Tag, TagOptions};

    #[test]
    fn test_export_nested_tree() {
        let def = container_desc(
            "root",
            [
                enum_desc(&UENUM8, "kind", [("small", 1u8), ("large", 2u8)]),
                bool_desc(&BOOL8, "flags", [("a", 1u8), ("b", 2u8), ("c", 4u8)]),
                field(&UINT8, "count"),
                array_desc("items", ".count", field(&UINT8, "item")),
                field(&BYTES_RAW, "tail").size(2usize),
            ],
        )
        .build()
        .unwrap();
        let tag = Tag::parse(def, &[2, 5, 2, 10, 20, 0xde, 0xad], TagOptions::default()).unwrap();

        let out = to_json(tag.tree(), tag.root()).unwrap();
        assert_eq!(
            out,
            json!({
                "kind": "large",
                "flags": ["a", "c"],
                "count": 2,
                "items": [10, 20],
                "tail": "dead",
            })
        );
    }
}
