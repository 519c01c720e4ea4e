//! Store path algebra.
//!
//! Every object in the store is named by an immutable [`StorePath`]: a
//! 160-bit digest rendered as 32 base-32 characters, a dash, and a
//! human-readable name. The digest is derived from a typed preimage
//!
//! ```text
//! <type>:sha256:<inner-digest>:<store-dir>:<name>
//! ```
//!
//! where `<type>` discriminates text objects, NAR-ingested sources and
//! build outputs. [`StoreDir`] carries the construction rules; see
//! [`StoreDir::make_store_path`] and its callers for the exact recipes.

mod content_address;
mod store_dir;
mod store_path;

pub use content_address::ContentAddress;
pub use content_address::FixedOutputHash;
pub use content_address::IngestionMethod;
pub use store_dir::StoreDir;
pub use store_dir::output_path_name;
pub use store_path::DIGEST_LENGTH;
pub use store_path::DRV_EXTENSION;
pub use store_path::ENCODED_DIGEST_LENGTH;
pub use store_path::MAX_NAME_LENGTH;
pub use store_path::StorePath;
pub use store_path::StorePathWithOutputs;

use thiserror::Error;

/// Errors produced when parsing or constructing store paths.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorePathError {
    /// The path does not live directly under the store directory.
    #[error("path '{path}' is not in the store directory '{store_dir}'")]
    NotInStore {
        /// The path as given.
        path: String,
        /// The store directory it was checked against.
        store_dir: String,
    },

    /// The base name is not `<32 base-32 chars>-<name>`.
    #[error("invalid store path '{path}'")]
    InvalidPath {
        /// The offending path or base name.
        path: String,
    },

    /// The name component violates the accepted character class or length.
    #[error("invalid store path name '{name}': {reason}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// What the name violated.
        reason: String,
    },

    /// The store directory string itself is malformed.
    #[error("invalid store directory '{dir}'")]
    InvalidStoreDir {
        /// The offending directory string.
        dir: String,
    },

    /// A hash algorithm outside md5/sha1/sha256 in a fixed-output recipe,
    /// or a non-SHA-256 hash where only SHA-256 is accepted.
    #[error("hash algorithm {algorithm} is not accepted for {context} paths")]
    UnsupportedAlgorithm {
        /// The rejected algorithm name.
        algorithm: String,
        /// Which construction rejected it.
        context: String,
    },

    /// A content-address descriptor failed to parse.
    #[error("invalid content address '{input}'")]
    InvalidContentAddress {
        /// The offending descriptor.
        input: String,
    },

    #[error(transparent)]
    Hash(#[from] alder_hash::HashError),
}
