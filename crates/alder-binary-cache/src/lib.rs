//! An object-store-backed binary cache.
//!
//! [`BinaryCacheStore`] publishes store objects into any
//! [`ObjectBackend`] (an HTTP bucket, a directory, an in-memory map) and
//! reads them back:
//!
//! - **Ingest** validates references and the archive hash, optionally
//!   emits a JSON listing and a debug-info index, compresses the payload
//!   and uploads it, then signs and uploads the `.narinfo` record — the
//!   narinfo is always the last write, so readers never observe metadata
//!   for a payload that is not there yet.
//! - **Reads** locate the payload via the narinfo, decompress and verify
//!   it against the recorded archive hash.
//! - **Lookups** go through a two-tier path-info cache: an in-process LRU
//!   and an optional persistent tier (see [`cache`]).
//!
//! The backend offers no compare-and-swap, so concurrent writers of the
//! same path race and signature appends are last-writer-wins.

use thiserror::Error;

pub mod backend;
pub mod cache;
pub mod compression;
pub mod config;
pub mod constants;
pub mod interrupt;
pub mod store;

pub use backend::MemoryBackend;
pub use backend::ObjectBackend;
pub use cache::FileDiskCache;
pub use cache::NarInfoDiskCache;
pub use compression::Compression;
pub use config::BinaryCacheConfig;
pub use store::BinaryCacheStore;
pub use store::StatsSnapshot;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BinaryCacheError>;

/// Errors surfaced by the binary cache.
#[derive(Debug, Error)]
pub enum BinaryCacheError {
    /// Bad archive magic, hash mismatch or structural corruption.
    #[error("corrupt archive for '{path}': {reason}")]
    CorruptNar {
        /// Base name of the affected path.
        path: String,
        /// What was wrong.
        reason: String,
    },

    /// A declared reference has no narinfo in the cache.
    #[error("cannot add '{path}' to the binary cache because the reference '{reference}' is not valid")]
    MissingReference {
        /// The path being added.
        path: String,
        /// The reference that failed to resolve.
        reference: String,
    },

    /// The narinfo exists but the payload it points at is gone.
    #[error("substitute for '{path}' has disappeared from the binary cache")]
    SubstituteGone {
        /// Base name of the affected path.
        path: String,
    },

    /// A file the caller requires is absent from the backend.
    #[error("file '{file}' does not exist in the binary cache")]
    NoSuchBinaryCacheFile {
        /// Backend-relative path of the missing file.
        file: String,
    },

    /// A path was queried that has no narinfo.
    #[error("path '{path}' is not valid in this binary cache")]
    PathNotValid {
        /// Base name of the queried path.
        path: String,
    },

    /// The cache was created for a different store directory.
    #[error("binary cache is for stores with prefix '{actual}', not '{expected}'")]
    StoreDirMismatch {
        /// Store directory this consumer is configured for.
        expected: String,
        /// Store directory recorded in the cache info file.
        actual: String,
    },

    /// A malformed `nix-cache-info` header file.
    #[error("invalid cache info file: {reason}")]
    InvalidCacheInfo {
        /// What failed to parse.
        reason: String,
    },

    /// A compression name outside the supported set.
    #[error("unsupported compression '{name}'")]
    UnsupportedCompression {
        /// The unknown algorithm name.
        name: String,
    },

    /// Cooperative cancellation; propagates without being caught.
    #[error("operation interrupted")]
    Interrupted,

    /// Transport failure in the object backend, passed through unchanged.
    #[error("backend '{uri}': {message}")]
    Backend {
        /// The backend's URI.
        uri: String,
        /// Transport error description.
        message: String,
    },

    #[error(transparent)]
    StorePath(#[from] alder_store_path::StorePathError),

    #[error(transparent)]
    NarInfo(#[from] alder_narinfo::NarInfoError),

    #[error(transparent)]
    Derivation(#[from] alder_derivation::DerivationError),

    #[error("listing serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
