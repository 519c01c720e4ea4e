//! Archive serialization, from in-memory trees or straight off the
//! filesystem.

use std::io::Write;
use std::path::Path;

use alder_hash::NAR_VERSION_MAGIC;

use crate::NarError;
use crate::NarNode;
use crate::wire;

/// Serialize a tree into `w`, magic token included.
pub fn dump<W: Write>(node: &NarNode, w: &mut W) -> Result<(), NarError> {
    wire::write_str(w, NAR_VERSION_MAGIC)?;
    dump_node(node, w)?;
    Ok(())
}

/// Serialize a tree into a buffer.
pub fn dump_to_vec(node: &NarNode) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    dump(node, &mut out).unwrap_or_default();
    out
}

/// The archive of a single non-executable regular file holding `contents`.
///
/// This is how small text blobs (derivation files among them) are wrapped
/// for ingestion.
pub fn dump_string(contents: &[u8]) -> Vec<u8> {
    dump_to_vec(&NarNode::regular(contents))
}

/// Archive an on-disk file, directory or symlink.
pub fn dump_path(path: &Path) -> Result<Vec<u8>, NarError> {
    let node = node_from_path(path)?;
    Ok(dump_to_vec(&node))
}

fn dump_node<W: Write>(node: &NarNode, w: &mut W) -> Result<(), NarError> {
    wire::write_str(w, "(")?;
    wire::write_str(w, "type")?;

    match node {
        NarNode::Regular { executable, contents } => {
            wire::write_str(w, "regular")?;
            if *executable {
                wire::write_str(w, "executable")?;
                wire::write_str(w, "")?;
            }
            wire::write_str(w, "contents")?;
            wire::write_bytes(w, contents)?;
        }
        NarNode::Symlink { target } => {
            wire::write_str(w, "symlink")?;
            wire::write_str(w, "target")?;
            wire::write_str(w, target)?;
        }
        NarNode::Directory { entries } => {
            wire::write_str(w, "directory")?;
            for (name, entry) in entries {
                wire::write_str(w, "entry")?;
                wire::write_str(w, "(")?;
                wire::write_str(w, "name")?;
                wire::write_str(w, name)?;
                wire::write_str(w, "node")?;
                dump_node(entry, w)?;
                wire::write_str(w, ")")?;
            }
        }
    }

    wire::write_str(w, ")")?;
    Ok(())
}

/// Build an in-memory tree from the filesystem. Entry order comes from
/// sorting the directory listing, not from readdir order.
pub fn node_from_path(path: &Path) -> Result<NarNode, NarError> {
    let meta = std::fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = std::fs::read_link(path)?;
        let target = target
            .to_str()
            .ok_or_else(|| NarError::corrupt("symlink target is not UTF-8"))?
            .to_string();
        Ok(NarNode::Symlink { target })
    } else if file_type.is_file() {
        let contents = std::fs::read(path)?;
        Ok(NarNode::Regular {
            executable: is_executable(&meta),
            contents,
        })
    } else if file_type.is_dir() {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| NarError::corrupt("directory entry name is not UTF-8"))?;
            names.push(name);
        }
        names.sort();

        let mut entries = std::collections::BTreeMap::new();
        for name in names {
            let child = node_from_path(&path.join(&name))?;
            entries.insert(name, child);
        }
        Ok(NarNode::Directory { entries })
    } else {
        Err(NarError::corrupt(format!(
            "unsupported file type at '{}'",
            path.display()
        )))
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}
