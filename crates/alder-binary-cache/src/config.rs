//! Store configuration.

use std::time::Duration;

use crate::Compression;
use crate::constants;

/// Knobs for a [`crate::BinaryCacheStore`].
#[derive(Debug, Clone)]
pub struct BinaryCacheConfig {
    /// Store directory this cache serves; must match the cache's
    /// `nix-cache-info` header.
    pub store_dir: String,

    /// Algorithm applied to uploaded archives.
    pub compression: Compression,

    /// Publish a `.ls` JSON listing next to each narinfo.
    pub write_nar_listing: bool,

    /// Publish `debuginfo/<build-id>` links for debug symbols found in
    /// ingested archives.
    pub write_debug_info: bool,

    /// Signing key in `name:base64-keypair` form; when set, every
    /// published narinfo carries a signature.
    pub secret_key: Option<String>,

    /// Capacity of the in-process path-info cache.
    pub path_info_cache_capacity: usize,

    /// Freshness window for cached narinfos.
    pub positive_ttl: Duration,

    /// Freshness window for cached negative answers.
    pub negative_ttl: Duration,
}

impl Default for BinaryCacheConfig {
    fn default() -> Self {
        BinaryCacheConfig {
            store_dir: "/nix/store".to_string(),
            compression: Compression::default(),
            write_nar_listing: false,
            write_debug_info: false,
            secret_key: None,
            path_info_cache_capacity: constants::PATH_INFO_CACHE_CAPACITY,
            positive_ttl: constants::POSITIVE_NAR_INFO_TTL,
            negative_ttl: constants::NEGATIVE_NAR_INFO_TTL,
        }
    }
}
