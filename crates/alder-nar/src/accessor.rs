//! Read-only traversal over a parsed archive.

use crate::NarError;
use crate::NarNode;

/// An in-memory archive indexed by `/`-separated paths.
///
/// Built once per ingested archive and consulted for listings and the
/// debug-info scan. `""` and `"/"` both address the root.
pub struct NarAccessor {
    root: NarNode,
}

impl NarAccessor {
    pub fn new(root: NarNode) -> Self {
        NarAccessor { root }
    }

    /// Parse raw archive bytes and index the result.
    pub fn from_bytes(nar: &[u8]) -> Result<Self, NarError> {
        Ok(NarAccessor {
            root: crate::reader::parse(&mut &nar[..])?,
        })
    }

    pub fn root(&self) -> &NarNode {
        &self.root
    }

    /// Resolve a path to its node, if present. Does not follow symlinks.
    pub fn lookup(&self, path: &str) -> Option<&NarNode> {
        let mut node = &self.root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match node {
                NarNode::Directory { entries } => node = entries.get(component)?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Entry names of a directory, in sorted order.
    pub fn read_directory(&self, path: &str) -> Option<Vec<&str>> {
        match self.lookup(path)? {
            NarNode::Directory { entries } => {
                Some(entries.keys().map(String::as_str).collect())
            }
            _ => None,
        }
    }

    /// Contents of a regular file.
    pub fn read_file(&self, path: &str) -> Option<&[u8]> {
        match self.lookup(path)? {
            NarNode::Regular { contents, .. } => Some(contents),
            _ => None,
        }
    }

    /// Whether `path` resolves to a directory.
    pub fn is_directory(&self, path: &str) -> bool {
        matches!(self.lookup(path), Some(NarNode::Directory { .. }))
    }

    /// Whether `path` resolves to a regular file.
    pub fn is_regular(&self, path: &str) -> bool {
        matches!(self.lookup(path), Some(NarNode::Regular { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    fn sample() -> NarAccessor {
        let mut bin = BTreeMap::new();
        bin.insert("tool".to_string(), NarNode::regular(b"ELF".to_vec()));
        let mut root = BTreeMap::new();
        root.insert("bin".to_string(), NarNode::Directory { entries: bin });
        root.insert(
            "link".to_string(),
            NarNode::Symlink { target: "bin".to_string() },
        );
        NarAccessor::new(NarNode::Directory { entries: root })
    }

    #[test]
    fn resolves_nested_paths() {
        let accessor = sample();
        assert!(accessor.is_directory("/bin"));
        assert!(accessor.is_regular("/bin/tool"));
        assert_eq!(accessor.read_file("/bin/tool"), Some(&b"ELF"[..]));
    }

    #[test]
    fn empty_and_slash_address_the_root() {
        let accessor = sample();
        assert!(accessor.is_directory(""));
        assert!(accessor.is_directory("/"));
        assert_eq!(accessor.read_directory("/").unwrap(), vec!["bin", "link"]);
    }

    #[test]
    fn missing_paths_and_wrong_kinds_return_none() {
        let accessor = sample();
        assert!(accessor.lookup("/no/such").is_none());
        assert!(accessor.read_file("/bin").is_none());
        assert!(accessor.read_directory("/bin/tool").is_none());
        // Symlinks are not followed.
        assert!(accessor.lookup("/link/tool").is_none());
    }

    #[test]
    fn indexes_parsed_bytes() {
        let nar = crate::writer::dump_string(b"blob");
        let accessor = NarAccessor::from_bytes(&nar).unwrap();
        assert!(accessor.is_regular(""));
    }
}
