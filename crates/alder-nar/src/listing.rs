//! The JSON directory listing published next to each archive.
//!
//! Schema: `{"version": 1, "root": <node>}` where each node carries its
//! `type` plus type-specific attributes, and directories nest an
//! `entries` map.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::NarNode;

/// Current listing schema version.
pub const LISTING_VERSION: u32 = 1;

/// Top-level listing document.
#[derive(Debug, Serialize)]
pub struct NarListing {
    pub version: u32,
    pub root: ListingNode,
}

/// One node of the listing tree.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ListingNode {
    Regular {
        size: u64,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        executable: bool,
    },
    Symlink {
        target: String,
    },
    Directory {
        entries: BTreeMap<String, ListingNode>,
    },
}

impl NarListing {
    /// Describe a parsed archive.
    pub fn of(root: &NarNode) -> Self {
        NarListing {
            version: LISTING_VERSION,
            root: describe(root),
        }
    }
}

fn describe(node: &NarNode) -> ListingNode {
    match node {
        NarNode::Regular { executable, contents } => ListingNode::Regular {
            size: contents.len() as u64,
            executable: *executable,
        },
        NarNode::Symlink { target } => ListingNode::Symlink { target: target.clone() },
        NarNode::Directory { entries } => ListingNode::Directory {
            entries: entries.iter().map(|(k, v)| (k.clone(), describe(v))).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn regular_file_listing() {
        let listing = NarListing::of(&NarNode::regular(b"12345".to_vec()));
        let value = serde_json::to_value(&listing).unwrap();
        assert_eq!(
            value,
            json!({"version": 1, "root": {"type": "regular", "size": 5}})
        );
    }

    #[test]
    fn executable_bit_appears_only_when_set() {
        let node = NarNode::Regular {
            executable: true,
            contents: b"x".to_vec(),
        };
        let value = serde_json::to_value(NarListing::of(&node)).unwrap();
        assert_eq!(value["root"]["executable"], json!(true));

        let plain = serde_json::to_value(NarListing::of(&NarNode::regular(b"x".to_vec()))).unwrap();
        assert!(plain["root"].get("executable").is_none());
    }

    #[test]
    fn directory_listing_nests_entries() {
        let mut entries = BTreeMap::new();
        entries.insert("lib".to_string(), NarNode::Directory { entries: BTreeMap::new() });
        entries.insert(
            "link".to_string(),
            NarNode::Symlink { target: "lib".to_string() },
        );
        let value = serde_json::to_value(NarListing::of(&NarNode::Directory { entries })).unwrap();

        assert_eq!(
            value,
            json!({
                "version": 1,
                "root": {
                    "type": "directory",
                    "entries": {
                        "lib": {"type": "directory", "entries": {}},
                        "link": {"type": "symlink", "target": "lib"},
                    }
                }
            })
        );
    }
}
