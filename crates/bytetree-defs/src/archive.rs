//! A small record archive laid out through pointers.
//!
//! ```text
//! header   magic "BTAR", record_count, table_ptr
//! table    at table_ptr: record_count records of payload_ptr (u32)
//! payloads at each payload_ptr: a zlib stream holding a NUL-terminated name
//!          and a NUL-terminated body
//! ```
//!
//! Table and payload positions are not stored anywhere but in the pointers,
//! so serializing lays them out again: the table right after the header,
//! then every payload in record order.

use bytetree_core::builder::{array_desc, container_desc, field, stream_adapter_desc, struct_desc};
use bytetree_core::field_types::{CSTR_UTF8, UINT32};
use bytetree_core::{DescRef, Result};

use crate::adapters::ZlibAdapter;

/// `BTAR` read as a little-endian u32.
pub const ARCHIVE_MAGIC: u32 = u32::from_le_bytes(*b"BTAR");

/// The archive definition.
pub fn archive_def() -> Result<DescRef> {
    let payload = stream_adapter_desc(
        "payload",
        ZlibAdapter::default(),
        container_desc("entry", [field(&CSTR_UTF8, "name"), field(&CSTR_UTF8, "body")]),
    )
    .pointer(".payload_ptr")
    .carry_off(false);

    let record = container_desc("record", [field(&UINT32, "payload_ptr"), payload]);

    container_desc(
        "archive",
        [
            struct_desc(
                "header",
                [
                    field(&UINT32, "magic").default(ARCHIVE_MAGIC),
                    field(&UINT32, "record_count"),
                    field(&UINT32, "table_ptr"),
                ],
            ),
            array_desc("records", ".header.record_count", record)
                .pointer(".header.table_ptr")
                .carry_off(false),
        ],
    )
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytetree_core::{Tag, TagOptions};

    fn filled() -> Tag {
        let mut tag = Tag::new(archive_def().unwrap()).unwrap();
        let root = tag.root();
        let tree = tag.tree_mut();
        let records = tree.get_block(root, "records").unwrap();
        for (name, body) in [("a.txt", "alpha"), ("b.txt", "bravo bravo bravo")] {
            let i = tree.append(records, None).unwrap();
            let record = tree.get_block(records, i).unwrap();
            let payload = tree.get_block(record, "payload").unwrap();
            let entry = tree.get_block(payload, "data").unwrap();
            tree.set(entry, "name", name).unwrap();
            tree.set(entry, "body", body).unwrap();
        }
        tag
    }

    #[test]
    fn test_pointers_laid_out_after_table() {
        let mut tag = filled();
        let bytes = tag.serialize().unwrap();
        let root = tag.root();
        let tree = tag.tree();
        let header = tree.get_block(root, "header").unwrap();
        assert_eq!(tree.get_int(header, "record_count").unwrap(), 2);
        assert_eq!(tree.get_int(header, "table_ptr").unwrap(), 12);

        let records = tree.get_block(root, "records").unwrap();
        let first = tree.get_block(records, 0usize).unwrap();
        let second = tree.get_block(records, 1usize).unwrap();
        let p0 = tree.get_int(first, "payload_ptr").unwrap() as usize;
        let p1 = tree.get_int(second, "payload_ptr").unwrap() as usize;
        assert_eq!(p0, 20);
        assert!(p1 > p0 && p1 < bytes.len());
        assert_eq!(&bytes[..4], b"BTAR");
    }

    #[test]
    fn test_archive_round_trip() {
        let mut tag = filled();
        let bytes = tag.serialize().unwrap();

        let mut back = Tag::parse(archive_def().unwrap(), &bytes, TagOptions::default()).unwrap();
        let root = back.root();
        let tree = back.tree();
        let records = tree.get_block(root, "records").unwrap();
        assert_eq!(tree.len(records), 2);
        let second = tree.get_block(records, 1usize).unwrap();
        let payload = tree.get_block(second, "payload").unwrap();
        let entry = tree.get_block(payload, "data").unwrap();
        assert_eq!(tree.get_str(entry, "name").unwrap(), "b.txt");
        assert_eq!(tree.get_str(entry, "body").unwrap(), "bravo bravo bravo");

        assert_eq!(back.serialize().unwrap(), bytes);
    }
}
