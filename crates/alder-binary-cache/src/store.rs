//! The binary cache store proper.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use alder_derivation::Derivation;
use alder_derivation::aterm;
use alder_derivation::name_from_drv_name;
use alder_hash::Hash;
use alder_hash::HashAlgorithm;
use alder_hash::HashSink;
use alder_nar::FRAMED_MAGIC;
use alder_nar::NarAccessor;
use alder_nar::NarListing;
use alder_narinfo::NarInfo;
use alder_narinfo::SigningKey;
use alder_narinfo::ValidPathInfo;
use alder_store_path::ContentAddress;
use alder_store_path::IngestionMethod;
use alder_store_path::StoreDir;
use alder_store_path::StorePath;
use bytes::Bytes;
use futures::StreamExt;
use futures::TryStreamExt;
use tracing::debug;
use tracing::instrument;

use crate::BinaryCacheConfig;
use crate::BinaryCacheError;
use crate::Compression;
use crate::ObjectBackend;
use crate::Result;
use crate::cache::CacheLookup;
use crate::cache::DiskCacheLookup;
use crate::cache::NarInfoDiskCache;
use crate::cache::PathInfoCache;
use crate::compression;
use crate::constants::BUILD_ID_DIR;
use crate::constants::CACHE_INFO_FILE;
use crate::constants::DEBUG_INFO_WORKERS;
use crate::constants::DEFAULT_PRIORITY;
use crate::constants::MIME_CACHE_INFO;
use crate::constants::MIME_JSON;
use crate::constants::MIME_NAR;
use crate::constants::MIME_NARINFO;
use crate::interrupt::check_interrupt;

/// A store publishing into and reading from an [`ObjectBackend`].
pub struct BinaryCacheStore<B> {
    backend: B,
    store_dir: StoreDir,
    config: BinaryCacheConfig,
    secret_key: Option<SigningKey>,
    cache: PathInfoCache,
    disk_cache: Option<Arc<dyn NarInfoDiskCache>>,
    want_mass_query: bool,
    priority: u32,
    stats: Stats,
}

impl<B: std::fmt::Debug> std::fmt::Debug for BinaryCacheStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryCacheStore")
            .field("backend", &self.backend)
            .field("store_dir", &self.store_dir)
            .field("config", &self.config)
            .field("want_mass_query", &self.want_mass_query)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl<B: ObjectBackend> BinaryCacheStore<B> {
    /// Open the cache, reading or creating its `nix-cache-info` header.
    /// A `StoreDir` recorded by the cache that differs from the
    /// configured one is fatal.
    pub async fn open(
        backend: B,
        config: BinaryCacheConfig,
        disk_cache: Option<Arc<dyn NarInfoDiskCache>>,
    ) -> Result<Self> {
        let store_dir = StoreDir::new(&config.store_dir)?;
        let secret_key = match &config.secret_key {
            Some(key) => Some(SigningKey::from_string(key)?),
            None => None,
        };
        let cache = PathInfoCache::new(
            config.path_info_cache_capacity,
            config.positive_ttl,
            config.negative_ttl,
        );

        let mut want_mass_query = false;
        let mut priority = DEFAULT_PRIORITY;

        match backend.get(CACHE_INFO_FILE).await? {
            None => {
                backend
                    .put(
                        CACHE_INFO_FILE,
                        Bytes::from(format!("StoreDir: {}\n", store_dir)),
                        MIME_CACHE_INFO,
                    )
                    .await?;
            }
            Some(data) => {
                let text = String::from_utf8_lossy(&data);
                for line in text.lines() {
                    let Some((key, value)) = line.split_once(':') else {
                        continue;
                    };
                    let value = value.trim();
                    match key {
                        "StoreDir" => {
                            if value != store_dir.as_str() {
                                return Err(BinaryCacheError::StoreDirMismatch {
                                    expected: store_dir.to_string(),
                                    actual: value.to_string(),
                                });
                            }
                        }
                        "WantMassQuery" => want_mass_query = value == "1",
                        "Priority" => {
                            priority = value.parse().map_err(|_| {
                                BinaryCacheError::InvalidCacheInfo {
                                    reason: format!("bad Priority value '{}'", value),
                                }
                            })?;
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(BinaryCacheStore {
            backend,
            store_dir,
            config,
            secret_key,
            cache,
            disk_cache,
            want_mass_query,
            priority,
            stats: Stats::default(),
        })
    }

    pub fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the cache invites bulk existence queries.
    pub fn want_mass_query(&self) -> bool {
        self.want_mass_query
    }

    /// Substituter priority; lower wins.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Current operation counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn narinfo_file_for(path: &StorePath) -> String {
        format!("{}.narinfo", path.hash_part())
    }

    /// Fetch a backend file that must exist.
    pub async fn require_file(&self, relative: &str) -> Result<Bytes> {
        self.backend.get(relative).await?.ok_or_else(|| {
            BinaryCacheError::NoSuchBinaryCacheFile {
                file: relative.to_string(),
            }
        })
    }

    /// Whether a narinfo for `path` is present, through the caches.
    pub async fn is_valid_path(&self, path: &StorePath) -> Result<bool> {
        Ok(self.query_path_info(path).await?.is_some())
    }

    /// Path metadata through the two cache tiers.
    pub async fn query_path_info(&self, path: &StorePath) -> Result<Option<Arc<NarInfo>>> {
        let hash_part = path.hash_part();

        match self.cache.lookup(&hash_part) {
            CacheLookup::Present(info) => return Ok(Some(info)),
            CacheLookup::Absent => return Ok(None),
            CacheLookup::Miss => {}
        }

        if let Some(disk) = &self.disk_cache {
            match disk
                .lookup(&self.backend.uri(), &hash_part, &self.store_dir)
                .await?
            {
                DiskCacheLookup::Present(info) => {
                    let info = Arc::new(*info);
                    self.cache.upsert(&hash_part, Some(info.clone()));
                    return Ok(Some(info));
                }
                DiskCacheLookup::Absent => {
                    self.cache.upsert(&hash_part, None);
                    return Ok(None);
                }
                DiskCacheLookup::Unknown => {}
            }
        }

        let fetched = self.query_path_info_uncached(path).await?.map(Arc::new);

        self.cache.upsert(&hash_part, fetched.clone());
        if let Some(disk) = &self.disk_cache {
            disk.upsert(
                &self.backend.uri(),
                &hash_part,
                fetched.as_deref(),
                &self.store_dir,
            )
            .await?;
        }

        Ok(fetched)
    }

    /// Path metadata straight from the backend, no caches consulted.
    #[instrument(skip(self), fields(path = %path, cache = %self.backend.uri()))]
    pub async fn query_path_info_uncached(&self, path: &StorePath) -> Result<Option<NarInfo>> {
        let narinfo_file = Self::narinfo_file_for(path);
        debug!("querying path info");

        let Some(data) = self.backend.get(&narinfo_file).await? else {
            return Ok(None);
        };
        self.stats.nar_info_read.fetch_add(1, Ordering::Relaxed);

        let text = std::str::from_utf8(&data).map_err(|_| {
            BinaryCacheError::NarInfo(alder_narinfo::NarInfoError::Format {
                whence: narinfo_file.clone(),
                reason: "not valid UTF-8".to_string(),
            })
        })?;
        Ok(Some(NarInfo::parse(&self.store_dir, text, &narinfo_file)?))
    }

    /// Upload a narinfo and upsert both cache tiers. Always the final
    /// write of an ingest.
    async fn write_nar_info(&self, narinfo: NarInfo) -> Result<()> {
        let narinfo_file = Self::narinfo_file_for(&narinfo.info.path);
        self.backend
            .put(
                &narinfo_file,
                Bytes::from(narinfo.to_text(&self.store_dir)),
                MIME_NARINFO,
            )
            .await?;
        self.stats.nar_info_write.fetch_add(1, Ordering::Relaxed);

        let hash_part = narinfo.info.path.hash_part();
        let info = Arc::new(narinfo);
        self.cache.upsert(&hash_part, Some(info.clone()));
        if let Some(disk) = &self.disk_cache {
            disk.upsert(&self.backend.uri(), &hash_part, Some(&info), &self.store_dir)
                .await?;
        }
        Ok(())
    }

    /// Ingest an archive under the metadata in `info`.
    ///
    /// The pipeline validates references and the declared hash, then
    /// uploads listing, debug-info links and the compressed archive
    /// before the narinfo, so the payload is always observable first.
    /// `_check_sigs` is accepted for interface compatibility; signature
    /// enforcement lives with the caller.
    #[instrument(skip(self, info, nar, repair, _check_sigs), fields(path = %info.path, nar_size = nar.len()))]
    pub async fn add_to_store(
        &self,
        info: &ValidPathInfo,
        nar: &[u8],
        repair: bool,
        _check_sigs: bool,
    ) -> Result<()> {
        check_interrupt()?;

        if !repair && self.is_valid_path(&info.path).await? {
            debug!("path already present");
            return Ok(());
        }

        // Reference narinfos are usually already cached; a miss here is
        // a hard failure, not a lazy publish.
        for reference in &info.references {
            if reference != &info.path && self.query_path_info(reference).await?.is_none() {
                return Err(BinaryCacheError::MissingReference {
                    path: info.path.base_name(),
                    reference: reference.base_name(),
                });
            }
        }

        if nar.len() < FRAMED_MAGIC.len() || nar[..FRAMED_MAGIC.len()] != FRAMED_MAGIC {
            return Err(corrupt(&info.path, "bad archive magic"));
        }

        let nar_hash = Hash::sha256(nar);
        if nar_hash != info.nar_hash {
            return Err(corrupt(
                &info.path,
                "archive does not match the declared hash",
            ));
        }

        let mut narinfo_body = info.clone();
        narinfo_body.nar_hash = nar_hash;
        narinfo_body.nar_size = nar.len() as u64;

        let accessor = if self.config.write_nar_listing || self.config.write_debug_info {
            Some(NarAccessor::from_bytes(nar).map_err(|e| corrupt(&info.path, &e.to_string()))?)
        } else {
            None
        };

        if self.config.write_nar_listing {
            if let Some(accessor) = &accessor {
                let listing = serde_json::to_string(&NarListing::of(accessor.root()))?;
                self.backend
                    .put(
                        &format!("{}.ls", info.path.base_name()),
                        Bytes::from(listing),
                        MIME_JSON,
                    )
                    .await?;
            }
        }

        check_interrupt()?;
        let started = Instant::now();
        let compressed = compression::compress(self.config.compression, nar).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let file_hash = Hash::sha256(&compressed);
        let file_size = compressed.len() as u64;
        let url = format!(
            "nar/{}.nar{}",
            file_hash.to_base32(),
            self.config.compression.extension()
        );

        debug!(
            compression = %self.config.compression,
            compressed_size = file_size,
            saved_percent = 100.0 - file_size as f64 / nar.len() as f64 * 100.0,
            duration_ms,
            "compressed archive"
        );

        let mut narinfo = NarInfo::new(
            narinfo_body,
            url.clone(),
            self.config.compression.as_str().to_string(),
        );
        narinfo.file_hash = Some(file_hash);
        narinfo.file_size = Some(file_size);

        if self.config.write_debug_info {
            if let Some(accessor) = &accessor {
                self.write_debug_info_links(accessor, &url).await?;
            }
        }

        if repair || !self.backend.exists(&url).await? {
            self.stats.nar_write.fetch_add(1, Ordering::Relaxed);
            self.backend.put(&url, Bytes::from(compressed), MIME_NAR).await?;
        } else {
            self.stats.nar_write_averted.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.nar_write_bytes.fetch_add(nar.len() as u64, Ordering::Relaxed);
        self.stats
            .nar_write_compressed_bytes
            .fetch_add(file_size, Ordering::Relaxed);
        self.stats
            .nar_write_compression_ms
            .fetch_add(duration_ms, Ordering::Relaxed);

        if let Some(key) = &self.secret_key {
            narinfo.info.sign(&self.store_dir, key)?;
        }

        self.write_nar_info(narinfo).await
    }

    /// Index debug symbols under `/lib/debug/.build-id` as
    /// `debuginfo/<build-id>` links to the uploaded archive. Existing
    /// links are never overwritten; entries upload concurrently, bounded
    /// by [`DEBUG_INFO_WORKERS`].
    async fn write_debug_info_links(&self, accessor: &NarAccessor, url: &str) -> Result<()> {
        if !accessor.is_directory(BUILD_ID_DIR) {
            return Ok(());
        }

        let mut links: Vec<(String, String)> = Vec::new();
        for prefix in accessor.read_directory(BUILD_ID_DIR).unwrap_or_default() {
            let dir = format!("{}/{}", BUILD_ID_DIR, prefix);
            if prefix.len() != 2 || !is_lower_hex(prefix) || !accessor.is_directory(&dir) {
                continue;
            }
            for file_name in accessor.read_directory(&dir).unwrap_or_default() {
                let member = format!("{}/{}", dir, file_name);
                if !accessor.is_regular(&member) {
                    continue;
                }
                let Some(stem) = file_name.strip_suffix(".debug") else {
                    continue;
                };
                if stem.len() != 38 || !is_lower_hex(stem) {
                    continue;
                }
                links.push((format!("debuginfo/{}{}", prefix, stem), member));
            }
        }

        let target = format!("../{}", url);
        futures::stream::iter(links.into_iter().map(|(key, member)| {
            let target = target.clone();
            async move {
                check_interrupt()?;
                if self.backend.exists(&key).await? {
                    return Ok(());
                }
                debug!(key = %key, "writing debug-info link");
                let document = serde_json::json!({ "archive": target, "member": member });
                self.backend
                    .put(&key, Bytes::from(document.to_string()), MIME_JSON)
                    .await
            }
        }))
        .buffer_unordered(DEBUG_INFO_WORKERS)
        .try_collect::<Vec<()>>()
        .await?;

        Ok(())
    }

    /// Stream the uncompressed archive for `path` into `sink`, verifying
    /// it against the recorded hash after decompression.
    #[instrument(skip(self, sink), fields(path = %path))]
    pub async fn nar_from_path<W: std::io::Write>(
        &self,
        path: &StorePath,
        sink: &mut W,
    ) -> Result<()> {
        let narinfo = self.query_path_info(path).await?.ok_or_else(|| {
            BinaryCacheError::PathNotValid {
                path: path.base_name(),
            }
        })?;
        let algorithm: Compression = narinfo.compression.parse()?;

        let compressed = match self.require_file(&narinfo.url).await {
            Ok(data) => data,
            Err(BinaryCacheError::NoSuchBinaryCacheFile { .. }) => {
                return Err(BinaryCacheError::SubstituteGone {
                    path: path.base_name(),
                });
            }
            Err(e) => return Err(e),
        };
        self.stats
            .nar_read_compressed_bytes
            .fetch_add(compressed.len() as u64, Ordering::Relaxed);

        check_interrupt()?;
        let nar = compression::decompress(algorithm, &compressed)
            .await
            .map_err(|e| corrupt(path, &format!("decompression failed: {}", e)))?;

        let mut hasher = HashSink::new(HashAlgorithm::Sha256);
        hasher.update(&nar);
        let (nar_hash, nar_size) = hasher.finish();
        if nar_hash != narinfo.info.nar_hash {
            return Err(corrupt(
                path,
                "decompressed archive does not match the recorded hash",
            ));
        }

        sink.write_all(&nar)?;
        self.stats.nar_read.fetch_add(1, Ordering::Relaxed);
        self.stats.nar_read_bytes.fetch_add(nar_size, Ordering::Relaxed);
        Ok(())
    }

    /// Store a small text blob at its text-type path, wrapping it in a
    /// single-file archive. Idempotent unless `repair`.
    pub async fn add_text_to_store(
        &self,
        name: &str,
        contents: &[u8],
        references: &BTreeSet<StorePath>,
        repair: bool,
    ) -> Result<StorePath> {
        let path = self
            .store_dir
            .compute_store_path_for_text(name, contents, references)?;

        if repair || !self.is_valid_path(&path).await? {
            let nar = alder_nar::dump_string(contents);
            let mut info = ValidPathInfo::new(path.clone(), Hash::sha256(&nar));
            info.nar_size = nar.len() as u64;
            info.references = references.clone();
            info.ca = Some(ContentAddress::Text {
                hash: Hash::sha256(contents),
            });
            self.add_to_store(&info, &nar, repair, true).await?;
        }

        Ok(path)
    }

    /// Ingest an on-disk file or tree at its fixed-output path.
    ///
    /// `Recursive` hashes the archive serialization, `Flat` the file
    /// bytes; either way the uploaded payload is the archive.
    pub async fn add_path_to_store(
        &self,
        name: &str,
        source: &Path,
        method: IngestionMethod,
        algorithm: HashAlgorithm,
        repair: bool,
    ) -> Result<StorePath> {
        let (nar, content_hash) = match method {
            IngestionMethod::Recursive => {
                let nar = alder_nar::dump_path(source)
                    .map_err(|e| BinaryCacheError::Io(std::io::Error::other(e.to_string())))?;
                let content_hash = Hash::hash_bytes(algorithm, &nar);
                (nar, content_hash)
            }
            IngestionMethod::Flat => {
                let bytes = std::fs::read(source)?;
                let content_hash = Hash::hash_bytes(algorithm, &bytes);
                (alder_nar::dump_string(&bytes), content_hash)
            }
        };

        let path = self
            .store_dir
            .make_fixed_output_path(method, &content_hash, name)?;

        let mut info = ValidPathInfo::new(path.clone(), Hash::sha256(&nar));
        info.nar_size = nar.len() as u64;
        info.ca = Some(ContentAddress::Fixed {
            method,
            hash: content_hash,
        });
        self.add_to_store(&info, &nar, repair, true).await?;

        Ok(path)
    }

    /// Union new signatures into a published narinfo and re-upload it.
    /// Last writer wins; the backend offers nothing stronger.
    pub async fn add_signatures(
        &self,
        path: &StorePath,
        sigs: &BTreeSet<String>,
    ) -> Result<()> {
        let narinfo = self.query_path_info(path).await?.ok_or_else(|| {
            BinaryCacheError::PathNotValid {
                path: path.base_name(),
            }
        })?;

        let mut narinfo = (*narinfo).clone();
        narinfo.info.sigs.extend(sigs.iter().cloned());
        self.write_nar_info(narinfo).await
    }

    /// Serialize a derivation into the store as a text object named
    /// `<name>.drv`, referencing its sources and input derivations.
    pub async fn write_derivation(&self, drv: &Derivation, repair: bool) -> Result<StorePath> {
        let contents = drv.unparse(&self.store_dir, false, None)?;
        let name = format!("{}{}", drv.name, alder_derivation::DRV_EXTENSION);
        self.add_text_to_store(&name, contents.as_bytes(), &drv.references(), repair)
            .await
    }

    /// Read a derivation back out of the cache.
    pub async fn read_derivation(&self, drv_path: &StorePath) -> Result<Derivation> {
        let name = name_from_drv_name(drv_path.name())?;

        let mut nar = Vec::new();
        self.nar_from_path(drv_path, &mut nar).await?;

        let accessor = NarAccessor::from_bytes(&nar)
            .map_err(|e| corrupt(drv_path, &e.to_string()))?;
        let contents = accessor
            .read_file("")
            .ok_or_else(|| corrupt(drv_path, "derivation archive is not a single file"))?;
        let text = std::str::from_utf8(contents)
            .map_err(|_| corrupt(drv_path, "derivation text is not UTF-8"))?;

        Ok(aterm::parse_derivation(&self.store_dir, text, &name)?)
    }

    /// The plain-text build log for a path, located via its deriver.
    pub async fn get_build_log(&self, path: &StorePath) -> Result<Option<Vec<u8>>> {
        let drv_path = if path.is_derivation() {
            path.clone()
        } else {
            match self.query_path_info(path).await? {
                Some(info) => match &info.info.deriver {
                    Some(deriver) => deriver.clone(),
                    None => return Ok(None),
                },
                None => return Ok(None),
            }
        };

        let log_file = format!("log/{}", drv_path.base_name());
        debug!(log_file = %log_file, "fetching build log");
        Ok(self.backend.get(&log_file).await?.map(|data| data.to_vec()))
    }
}

fn corrupt(path: &StorePath, reason: &str) -> BinaryCacheError {
    BinaryCacheError::CorruptNar {
        path: path.base_name(),
        reason: reason.to_string(),
    }
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[derive(Default)]
struct Stats {
    nar_info_read: AtomicU64,
    nar_info_write: AtomicU64,
    nar_write: AtomicU64,
    nar_write_averted: AtomicU64,
    nar_write_bytes: AtomicU64,
    nar_write_compressed_bytes: AtomicU64,
    nar_write_compression_ms: AtomicU64,
    nar_read: AtomicU64,
    nar_read_bytes: AtomicU64,
    nar_read_compressed_bytes: AtomicU64,
}

impl Stats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            nar_info_read: self.nar_info_read.load(Ordering::Relaxed),
            nar_info_write: self.nar_info_write.load(Ordering::Relaxed),
            nar_write: self.nar_write.load(Ordering::Relaxed),
            nar_write_averted: self.nar_write_averted.load(Ordering::Relaxed),
            nar_write_bytes: self.nar_write_bytes.load(Ordering::Relaxed),
            nar_write_compressed_bytes: self.nar_write_compressed_bytes.load(Ordering::Relaxed),
            nar_write_compression_ms: self.nar_write_compression_ms.load(Ordering::Relaxed),
            nar_read: self.nar_read.load(Ordering::Relaxed),
            nar_read_bytes: self.nar_read_bytes.load(Ordering::Relaxed),
            nar_read_compressed_bytes: self.nar_read_compressed_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub nar_info_read: u64,
    pub nar_info_write: u64,
    pub nar_write: u64,
    pub nar_write_averted: u64,
    pub nar_write_bytes: u64,
    pub nar_write_compressed_bytes: u64,
    pub nar_write_compression_ms: u64,
    pub nar_read: u64,
    pub nar_read_bytes: u64,
    pub nar_read_compressed_bytes: u64,
}
