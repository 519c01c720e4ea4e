//! Archive parsing into an in-memory tree.

use std::collections::BTreeMap;
use std::io::Read;

use alder_hash::NAR_VERSION_MAGIC;

use crate::MAX_DEPTH;
use crate::NarError;
use crate::NarNode;
use crate::wire;

/// Parse a complete archive, magic token included.
pub fn parse<R: Read>(r: &mut R) -> Result<NarNode, NarError> {
    let magic = wire::read_bytes(r)?;
    if magic != NAR_VERSION_MAGIC.as_bytes() {
        return Err(NarError::corrupt("bad archive magic"));
    }
    parse_node(r, 0)
}

fn parse_node<R: Read>(r: &mut R, depth: usize) -> Result<NarNode, NarError> {
    if depth > MAX_DEPTH {
        return Err(NarError::TooDeep { max: MAX_DEPTH });
    }

    wire::expect_str(r, "(")?;
    wire::expect_str(r, "type")?;
    let node_type = wire::read_string(r)?;

    match node_type.as_str() {
        "regular" => parse_regular(r),
        "symlink" => parse_symlink(r),
        "directory" => parse_directory(r, depth),
        other => Err(NarError::corrupt(format!("unknown node type '{}'", other))),
    }
}

fn parse_regular<R: Read>(r: &mut R) -> Result<NarNode, NarError> {
    let mut executable = false;

    let tag = wire::read_string(r)?;
    let tag = if tag == "executable" {
        executable = true;
        wire::expect_str(r, "")?;
        wire::read_string(r)?
    } else {
        tag
    };

    if tag != "contents" {
        return Err(NarError::corrupt(format!("expected 'contents', got '{}'", tag)));
    }

    let contents = wire::read_bytes(r)?;
    wire::expect_str(r, ")")?;
    Ok(NarNode::Regular { executable, contents })
}

fn parse_symlink<R: Read>(r: &mut R) -> Result<NarNode, NarError> {
    wire::expect_str(r, "target")?;
    let target = wire::read_string(r)?;
    wire::expect_str(r, ")")?;
    Ok(NarNode::Symlink { target })
}

fn parse_directory<R: Read>(r: &mut R, depth: usize) -> Result<NarNode, NarError> {
    let mut entries = BTreeMap::new();
    let mut previous_name: Option<String> = None;

    loop {
        let tag = wire::read_string(r)?;
        match tag.as_str() {
            ")" => return Ok(NarNode::Directory { entries }),
            "entry" => {
                wire::expect_str(r, "(")?;
                wire::expect_str(r, "name")?;
                let name = wire::read_string(r)?;

                if name.is_empty() || name == "." || name == ".." || name.contains('/') {
                    return Err(NarError::corrupt(format!("invalid entry name '{}'", name)));
                }
                if let Some(prev) = &previous_name {
                    if *prev >= name {
                        return Err(NarError::corrupt("directory entries are not sorted"));
                    }
                }

                wire::expect_str(r, "node")?;
                let node = parse_node(r, depth + 1)?;
                wire::expect_str(r, ")")?;

                previous_name = Some(name.clone());
                entries.insert(name, node);
            }
            other => {
                return Err(NarError::corrupt(format!(
                    "expected 'entry' or ')', got '{}'",
                    other
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::writer;

    #[test]
    fn roundtrips_a_single_file() {
        let nar = writer::dump_string(b"payload");
        let node = parse(&mut nar.as_slice()).unwrap();
        assert_eq!(node, NarNode::regular(b"payload".to_vec()));
    }

    #[test]
    fn roundtrips_a_nested_tree() {
        let mut inner = BTreeMap::new();
        inner.insert(
            "script".to_string(),
            NarNode::Regular {
                executable: true,
                contents: b"#!/bin/sh\nexit 0\n".to_vec(),
            },
        );
        let mut entries = BTreeMap::new();
        entries.insert("bin".to_string(), NarNode::Directory { entries: inner });
        entries.insert(
            "link".to_string(),
            NarNode::Symlink { target: "bin/script".to_string() },
        );
        let tree = NarNode::Directory { entries };

        let nar = writer::dump_to_vec(&tree);
        assert_eq!(parse(&mut nar.as_slice()).unwrap(), tree);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut nar = writer::dump_string(b"x");
        nar[8] = b'X';
        let err = parse(&mut nar.as_slice()).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn rejects_truncated_archives() {
        let nar = writer::dump_string(b"a longer payload than the cut");
        for cut in [0, 10, 30, nar.len() - 1] {
            assert!(parse(&mut nar[..cut].as_ref()).is_err());
        }
    }

    #[test]
    fn rejects_unsorted_directories() {
        let mut out = Vec::new();
        wire::write_str(&mut out, alder_hash::NAR_VERSION_MAGIC).unwrap();
        for token in ["(", "type", "directory"] {
            wire::write_str(&mut out, token).unwrap();
        }
        for name in ["b", "a"] {
            for token in ["entry", "(", "name", name, "node", "(", "type", "symlink", "target", "x", ")", ")"] {
                wire::write_str(&mut out, token).unwrap();
            }
        }
        wire::write_str(&mut out, ")").unwrap();

        let err = parse(&mut out.as_slice()).unwrap_err();
        assert!(err.to_string().contains("sorted"));
    }

    #[test]
    fn rejects_dot_and_slash_entry_names() {
        for bad in [".", "..", "a/b"] {
            let mut out = Vec::new();
            wire::write_str(&mut out, alder_hash::NAR_VERSION_MAGIC).unwrap();
            for token in ["(", "type", "directory", "entry", "(", "name", bad] {
                wire::write_str(&mut out, token).unwrap();
            }
            assert!(parse(&mut out.as_slice()).is_err());
        }
    }
}
