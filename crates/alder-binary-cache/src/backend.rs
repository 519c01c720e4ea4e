//! The object backend seam.
//!
//! Everything the store needs from its storage is three operations over
//! backend-relative paths. Concrete HTTP/S3/directory backends live with
//! their transports; this crate ships only the in-memory implementation
//! used by tests and embedders.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::Result;

/// A flat keyed object store.
///
/// `put` is create-or-overwrite with no atomicity promised across
/// distinct paths; absence is reported as `None`, transport failures as
/// errors — implementations must not conflate the two.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Identifies this backend in cache keys and error reports.
    fn uri(&self) -> String;

    /// Fetch a file, `None` when absent.
    async fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Create or overwrite a file.
    async fn put(&self, path: &str, data: Bytes, mime_type: &str) -> Result<()>;

    /// Whether a file exists.
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Backend keeping everything in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, StoredFile>>,
}

#[derive(Debug)]
struct StoredFile {
    data: Bytes,
    mime_type: String,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored paths, sorted. Test helper.
    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// MIME type recorded for a file. Test helper.
    pub fn mime_type(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).map(|f| f.mime_type.clone())
    }

    /// Drop a file behind the store's back. Test helper for
    /// gone-payload scenarios.
    pub fn remove(&self, path: &str) -> bool {
        self.files.lock().remove(path).is_some()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn uri(&self) -> String {
        "memory://".to_string()
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self.files.lock().get(path).map(|f| f.data.clone()))
    }

    async fn put(&self, path: &str, data: Bytes, mime_type: &str) -> Result<()> {
        self.files.lock().insert(
            path.to_string(),
            StoredFile {
                data,
                mime_type: mime_type.to_string(),
            },
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }
}
