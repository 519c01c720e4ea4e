//! Two-tier path-info caching.
//!
//! Tier one is an in-process LRU keyed by hash part, holding both
//! positive entries (a parsed narinfo) and negative entries (the path is
//! known to be absent), each with its own TTL. Tier two is optional and
//! persistent, keyed by `(store URI, hash part)` so one cache directory
//! can serve several backends.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;

use alder_narinfo::NarInfo;
use alder_store_path::StoreDir;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::Result;

/// Outcome of a cache probe.
pub enum CacheLookup {
    /// Nothing known; ask the next tier.
    Miss,
    /// The path is known to have no narinfo.
    Absent,
    /// A fresh narinfo.
    Present(Arc<NarInfo>),
}

struct CachedPathInfo {
    info: Option<Arc<NarInfo>>,
    deadline: Instant,
}

/// The in-process tier.
pub struct PathInfoCache {
    entries: Mutex<LruCache<String, CachedPathInfo>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl PathInfoCache {
    pub fn new(capacity: usize, positive_ttl: Duration, negative_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        PathInfoCache {
            entries: Mutex::new(LruCache::new(capacity)),
            positive_ttl,
            negative_ttl,
        }
    }

    /// Probe by hash part; expired entries are dropped on the way out.
    pub fn lookup(&self, hash_part: &str) -> CacheLookup {
        let mut entries = self.entries.lock();

        let fresh = match entries.get(hash_part) {
            None => return CacheLookup::Miss,
            Some(cached) if cached.deadline <= Instant::now() => None,
            Some(cached) => Some(match &cached.info {
                Some(info) => CacheLookup::Present(info.clone()),
                None => CacheLookup::Absent,
            }),
        };

        match fresh {
            Some(lookup) => lookup,
            None => {
                entries.pop(hash_part);
                CacheLookup::Miss
            }
        }
    }

    /// Record a positive or negative answer.
    pub fn upsert(&self, hash_part: &str, info: Option<Arc<NarInfo>>) {
        let ttl = if info.is_some() {
            self.positive_ttl
        } else {
            self.negative_ttl
        };
        self.entries.lock().put(
            hash_part.to_string(),
            CachedPathInfo {
                info,
                deadline: Instant::now() + ttl,
            },
        );
    }
}

/// Outcome of a persistent-tier probe.
pub enum DiskCacheLookup {
    Unknown,
    Absent,
    Present(Box<NarInfo>),
}

/// The optional persistent tier.
#[async_trait]
pub trait NarInfoDiskCache: Send + Sync {
    async fn lookup(
        &self,
        store_uri: &str,
        hash_part: &str,
        store_dir: &StoreDir,
    ) -> Result<DiskCacheLookup>;

    /// Record an answer; `None` caches absence.
    async fn upsert(
        &self,
        store_uri: &str,
        hash_part: &str,
        info: Option<&NarInfo>,
        store_dir: &StoreDir,
    ) -> Result<()>;
}

/// File-backed persistent tier: one directory per store URI, one
/// `.narinfo` file per positive entry and one `.absent` marker per
/// negative entry. Markers expire by file age.
pub struct FileDiskCache {
    root: PathBuf,
    negative_ttl: Duration,
}

impl FileDiskCache {
    pub fn new(root: impl Into<PathBuf>, negative_ttl: Duration) -> Self {
        FileDiskCache {
            root: root.into(),
            negative_ttl,
        }
    }

    fn dir_for(&self, store_uri: &str) -> PathBuf {
        let sanitized: String = store_uri
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        self.root.join(sanitized)
    }
}

#[async_trait]
impl NarInfoDiskCache for FileDiskCache {
    async fn lookup(
        &self,
        store_uri: &str,
        hash_part: &str,
        store_dir: &StoreDir,
    ) -> Result<DiskCacheLookup> {
        let dir = self.dir_for(store_uri);
        let positive = dir.join(format!("{}.narinfo", hash_part));

        match tokio::fs::read_to_string(&positive).await {
            Ok(text) => {
                let whence = positive.display().to_string();
                let info = NarInfo::parse(store_dir, &text, &whence)?;
                return Ok(DiskCacheLookup::Present(Box::new(info)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let negative = dir.join(format!("{}.absent", hash_part));
        match tokio::fs::metadata(&negative).await {
            Ok(meta) => {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or(Duration::MAX);
                if age < self.negative_ttl {
                    Ok(DiskCacheLookup::Absent)
                } else {
                    debug!(hash_part, "expired negative disk cache entry");
                    let _ = tokio::fs::remove_file(&negative).await;
                    Ok(DiskCacheLookup::Unknown)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DiskCacheLookup::Unknown),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(
        &self,
        store_uri: &str,
        hash_part: &str,
        info: Option<&NarInfo>,
        store_dir: &StoreDir,
    ) -> Result<()> {
        let dir = self.dir_for(store_uri);
        tokio::fs::create_dir_all(&dir).await?;

        let positive = dir.join(format!("{}.narinfo", hash_part));
        let negative = dir.join(format!("{}.absent", hash_part));

        match info {
            Some(info) => {
                tokio::fs::write(&positive, info.to_text(store_dir)).await?;
                let _ = tokio::fs::remove_file(&negative).await;
            }
            None => {
                tokio::fs::write(&negative, b"").await?;
                let _ = tokio::fs::remove_file(&positive).await;
            }
        }
        Ok(())
    }
}
