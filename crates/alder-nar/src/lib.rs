//! Deterministic filesystem archives.
//!
//! A NAR ("archive") is the canonical byte serialization of a file tree:
//! directory entries sorted by name, no timestamps, no ownership, only the
//! executable bit survives. Identical trees serialize to identical bytes,
//! which is what makes content addressing of sources and outputs possible.
//!
//! The format is a stream of length-prefixed, zero-padded tokens (see
//! [`wire`]) opened by the [`alder_hash::NAR_VERSION_MAGIC`] token. The
//! same framing is reused by the derivation wire codec.

use std::collections::BTreeMap;

use thiserror::Error;

pub mod accessor;
pub mod listing;
pub mod reader;
pub mod wire;
pub mod writer;

pub use accessor::NarAccessor;
pub use listing::NarListing;
pub use reader::parse;
pub use writer::dump;
pub use writer::dump_path;
pub use writer::dump_string;

/// The framed form of the magic token: every archive starts with exactly
/// these 24 bytes.
pub const FRAMED_MAGIC: [u8; 24] = [
    13, 0, 0, 0, 0, 0, 0, 0, b'n', b'i', b'x', b'-', b'a', b'r', b'c', b'h', b'i', b'v', b'e',
    b'-', b'1', 0, 0, 0,
];

/// Upper bound on any single framed object (string, file contents).
pub const MAX_OBJECT_SIZE: u64 = 8 * 1024 * 1024 * 1024;

/// Upper bound on directory nesting when parsing.
pub const MAX_DEPTH: usize = 256;

/// Errors produced while reading or writing archives.
#[derive(Debug, Error)]
pub enum NarError {
    /// Structural violation: bad magic, bad token, unsorted directory,
    /// oversized object, truncated input.
    #[error("corrupt archive: {reason}")]
    Corrupt {
        /// What was violated.
        reason: String,
    },

    /// Nesting deeper than [`MAX_DEPTH`].
    #[error("archive nesting exceeds {max} levels")]
    TooDeep {
        /// The configured bound.
        max: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NarError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        NarError::Corrupt { reason: reason.into() }
    }
}

/// One node of an archived tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarNode {
    Regular {
        executable: bool,
        contents: Vec<u8>,
    },
    Symlink {
        target: String,
    },
    Directory {
        /// Sorted by entry name; serialization order is iteration order.
        entries: BTreeMap<String, NarNode>,
    },
}

impl NarNode {
    /// A non-executable regular file.
    pub fn regular(contents: impl Into<Vec<u8>>) -> Self {
        NarNode::Regular {
            executable: false,
            contents: contents.into(),
        }
    }

    /// Node type name as it appears on the wire and in listings.
    pub fn type_name(&self) -> &'static str {
        match self {
            NarNode::Regular { .. } => "regular",
            NarNode::Symlink { .. } => "symlink",
            NarNode::Directory { .. } => "directory",
        }
    }
}
