//! Resource bounds and protocol constants.

use std::time::Duration;

/// Header file at the backend root describing the cache.
pub const CACHE_INFO_FILE: &str = "nix-cache-info";

/// MIME type of uploaded compressed archives.
pub const MIME_NAR: &str = "application/x-nix-nar";

/// MIME type of uploaded narinfo records.
pub const MIME_NARINFO: &str = "text/x-nix-narinfo";

/// MIME type of the cache info header file.
pub const MIME_CACHE_INFO: &str = "text/x-nix-cache-info";

/// MIME type of listings and debug-info links.
pub const MIME_JSON: &str = "application/json";

/// Directory inside an archive that holds build-id debug links.
pub const BUILD_ID_DIR: &str = "/lib/debug/.build-id";

/// Concurrent uploads during the debug-info pass. Entries are
/// independent per build-id, so this only bounds backend pressure.
pub const DEBUG_INFO_WORKERS: usize = 25;

/// Default cache priority. Lower wins; the public cache uses 40, so a
/// private cache defaults below it.
pub const DEFAULT_PRIORITY: u32 = 30;

/// Entries held by the in-process path-info cache.
pub const PATH_INFO_CACHE_CAPACITY: usize = 65536;

/// How long a cached narinfo stays fresh (30 days).
pub const POSITIVE_NAR_INFO_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// How long a cached "no such path" answer stays fresh (1 hour).
/// Much shorter than the positive TTL: absent paths appear later.
pub const NEGATIVE_NAR_INFO_TTL: Duration = Duration::from_secs(3600);

const _: () = assert!(DEBUG_INFO_WORKERS > 0);
const _: () = assert!(PATH_INFO_CACHE_CAPACITY > 0);
const _: () = assert!(NEGATIVE_NAR_INFO_TTL.as_secs() < POSITIVE_NAR_INFO_TTL.as_secs());
