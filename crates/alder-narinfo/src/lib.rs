//! Per-path metadata records.
//!
//! A [`ValidPathInfo`] describes a stored object: its path, the hash and
//! size of its archive, what it references, who derived it and who signed
//! it. A [`NarInfo`] extends that with where the compressed payload
//! actually lives; its textual form is the `.narinfo` file published next
//! to every archive, one `Key: value` pair per line.

use std::collections::BTreeSet;

use alder_hash::Hash;
use alder_store_path::ContentAddress;
use alder_store_path::StoreDir;
use alder_store_path::StorePath;
use alder_store_path::StorePathError;
use thiserror::Error;

pub mod signing;

pub use signing::PublicKey;
pub use signing::SigningKey;

/// Deriver field value for paths whose deriver is unknown.
pub const UNKNOWN_DERIVER: &str = "unknown-deriver";

/// Compression assumed when a narinfo omits the `Compression:` field.
pub const DEFAULT_COMPRESSION: &str = "bzip2";

/// Errors produced by narinfo handling.
#[derive(Debug, Error)]
pub enum NarInfoError {
    /// The text does not parse as a narinfo record.
    #[error("invalid narinfo '{whence}': {reason}")]
    Format {
        /// Name of the offending file or source.
        whence: String,
        /// What was wrong.
        reason: String,
    },

    /// Fingerprinting needs a SHA-256 NAR hash and a non-zero size.
    #[error("cannot fingerprint '{path}': missing NAR hash or size")]
    Fingerprint {
        /// The affected store path.
        path: String,
    },

    /// A malformed `name:base64` key string.
    #[error("invalid key '{name}': {reason}")]
    InvalidKey {
        /// The key name, or the whole string when no name could be split.
        name: String,
        /// What was wrong.
        reason: String,
    },

    #[error(transparent)]
    StorePath(#[from] StorePathError),
}

/// Metadata accompanying every stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPathInfo {
    pub path: StorePath,
    /// The derivation that built this path, when known.
    pub deriver: Option<StorePath>,
    /// SHA-256 of the uncompressed archive.
    pub nar_hash: Hash,
    pub references: BTreeSet<StorePath>,
    /// Seconds since the epoch; zero when never registered locally.
    pub registration_time: u64,
    pub nar_size: u64,
    /// Whether this path was built locally rather than substituted.
    pub ultimate: bool,
    /// `key-name:base64-ed25519` signature strings.
    pub sigs: BTreeSet<String>,
    /// How the path was content-addressed, when it was.
    pub ca: Option<ContentAddress>,
}

impl ValidPathInfo {
    pub fn new(path: StorePath, nar_hash: Hash) -> Self {
        ValidPathInfo {
            path,
            deriver: None,
            nar_hash,
            references: BTreeSet::new(),
            registration_time: 0,
            nar_size: 0,
            ultimate: false,
            sigs: BTreeSet::new(),
            ca: None,
        }
    }

    /// The byte string signatures cover: printed path, NAR hash, NAR size
    /// and the sorted reference list, semicolon-joined under a version
    /// prefix.
    pub fn fingerprint(&self, store_dir: &StoreDir) -> Result<String, NarInfoError> {
        if self.nar_size == 0 {
            return Err(NarInfoError::Fingerprint {
                path: self.path.base_name(),
            });
        }
        let references: Vec<String> = store_dir.print_path_set(&self.references);
        Ok(format!(
            "1;{};{};{};{}",
            store_dir.print_path(&self.path),
            self.nar_hash.tagged_base32(),
            self.nar_size,
            references.join(",")
        ))
    }

    /// Sign the fingerprint and append the signature.
    pub fn sign(&mut self, store_dir: &StoreDir, key: &SigningKey) -> Result<(), NarInfoError> {
        let fingerprint = self.fingerprint(store_dir)?;
        self.sigs.insert(key.sign(&fingerprint));
        Ok(())
    }

    /// How many of the attached signatures verify against trusted keys.
    pub fn count_valid_signatures(
        &self,
        store_dir: &StoreDir,
        trusted: &[PublicKey],
    ) -> usize {
        match self.fingerprint(store_dir) {
            Ok(fingerprint) => self
                .sigs
                .iter()
                .filter(|sig| signing::verify(&fingerprint, sig, trusted))
                .count(),
            Err(_) => 0,
        }
    }

    /// A path is trusted when at least one signature verifies.
    pub fn check_trust(&self, store_dir: &StoreDir, trusted: &[PublicKey]) -> bool {
        self.count_valid_signatures(store_dir, trusted) >= 1
    }
}

/// A [`ValidPathInfo`] plus the location and shape of the uploaded
/// payload.
///
/// `file_hash`/`file_size` describe the *compressed* object as uploaded;
/// `nar_hash`/`nar_size` in the embedded info describe the uncompressed
/// archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarInfo {
    pub info: ValidPathInfo,
    /// Backend-relative location of the compressed archive.
    pub url: String,
    /// Compression algorithm name (`none`, `xz`, `bzip2`, `br`, `gzip`,
    /// `zstd`).
    pub compression: String,
    /// SHA-256 of the compressed payload.
    pub file_hash: Option<Hash>,
    pub file_size: Option<u64>,
    /// Build platform, when recorded.
    pub system: Option<String>,
}

impl NarInfo {
    pub fn new(info: ValidPathInfo, url: String, compression: String) -> Self {
        NarInfo {
            info,
            url,
            compression,
            file_hash: None,
            file_size: None,
            system: None,
        }
    }

    /// Parse narinfo text. `whence` names the source for error reports.
    /// Field order is immaterial; `StorePath`, `URL`, `NarHash` and
    /// `NarSize` are required.
    pub fn parse(store_dir: &StoreDir, text: &str, whence: &str) -> Result<Self, NarInfoError> {
        let fail = |reason: String| NarInfoError::Format {
            whence: whence.to_string(),
            reason,
        };

        let mut path = None;
        let mut url = None;
        let mut compression = None;
        let mut file_hash = None;
        let mut file_size = None;
        let mut nar_hash = None;
        let mut nar_size = None;
        let mut references = BTreeSet::new();
        let mut deriver = None;
        let mut system = None;
        let mut sigs = BTreeSet::new();
        let mut ca = None;

        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| fail(format!("line '{}' lacks a 'key: value' separator", line)))?;

            match key {
                "StorePath" => path = Some(store_dir.parse_path(value)?),
                "URL" => url = Some(value.to_string()),
                "Compression" => compression = Some(value.to_string()),
                "FileHash" => {
                    file_hash = Some(
                        Hash::parse_tagged(value).map_err(|e| fail(e.to_string()))?,
                    )
                }
                "FileSize" => {
                    file_size =
                        Some(value.parse::<u64>().map_err(|e| fail(e.to_string()))?)
                }
                "NarHash" => {
                    nar_hash = Some(
                        Hash::parse_tagged(value).map_err(|e| fail(e.to_string()))?,
                    )
                }
                "NarSize" => {
                    nar_size =
                        Some(value.parse::<u64>().map_err(|e| fail(e.to_string()))?)
                }
                "References" => {
                    for base_name in value.split(' ').filter(|s| !s.is_empty()) {
                        references.insert(StorePath::from_base_name(base_name)?);
                    }
                }
                "Deriver" => {
                    if value != UNKNOWN_DERIVER {
                        deriver = Some(StorePath::from_base_name(value)?);
                    }
                }
                "System" => system = Some(value.to_string()),
                "Sig" => {
                    sigs.insert(value.to_string());
                }
                "CA" => {
                    ca = Some(
                        value
                            .parse::<ContentAddress>()
                            .map_err(|e| fail(e.to_string()))?,
                    )
                }
                // Unknown keys are carried by newer producers; skip them.
                _ => {}
            }
        }

        let path = path.ok_or_else(|| fail("missing StorePath field".to_string()))?;
        let nar_hash = nar_hash.ok_or_else(|| fail("missing NarHash field".to_string()))?;

        let mut info = ValidPathInfo::new(path, nar_hash);
        info.nar_size = nar_size.ok_or_else(|| fail("missing NarSize field".to_string()))?;
        info.references = references;
        info.deriver = deriver;
        info.sigs = sigs;
        info.ca = ca;

        Ok(NarInfo {
            info,
            url: url.ok_or_else(|| fail("missing URL field".to_string()))?,
            compression: compression.unwrap_or_else(|| DEFAULT_COMPRESSION.to_string()),
            file_hash,
            file_size,
            system,
        })
    }

    /// Render the canonical textual form.
    pub fn to_text(&self, store_dir: &StoreDir) -> String {
        let mut out = String::with_capacity(512);

        out.push_str(&format!("StorePath: {}\n", store_dir.print_path(&self.info.path)));
        out.push_str(&format!("URL: {}\n", self.url));
        out.push_str(&format!("Compression: {}\n", self.compression));
        if let Some(file_hash) = &self.file_hash {
            out.push_str(&format!("FileHash: {}\n", file_hash.tagged_base32()));
        }
        if let Some(file_size) = self.file_size {
            out.push_str(&format!("FileSize: {}\n", file_size));
        }
        out.push_str(&format!("NarHash: {}\n", self.info.nar_hash.tagged_base32()));
        out.push_str(&format!("NarSize: {}\n", self.info.nar_size));

        let references: Vec<String> =
            self.info.references.iter().map(StorePath::base_name).collect();
        out.push_str(&format!("References: {}\n", references.join(" ")));

        if let Some(deriver) = &self.info.deriver {
            out.push_str(&format!("Deriver: {}\n", deriver.base_name()));
        }
        if let Some(system) = &self.system {
            out.push_str(&format!("System: {}\n", system));
        }
        for sig in &self.info.sigs {
            out.push_str(&format!("Sig: {}\n", sig));
        }
        if let Some(ca) = &self.info.ca {
            out.push_str(&format!("CA: {}\n", ca));
        }

        out
    }
}
