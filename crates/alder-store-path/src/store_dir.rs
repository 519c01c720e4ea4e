//! The store directory and the path construction recipes bound to it.

use std::collections::BTreeSet;
use std::fmt;

use alder_hash::Hash;
use alder_hash::HashAlgorithm;

use crate::IngestionMethod;
use crate::StorePath;
use crate::StorePathError;
use crate::store_path::DIGEST_LENGTH;

/// Default store directory.
pub const DEFAULT_STORE_DIR: &str = "/nix/store";

/// An absolute store directory, e.g. `/nix/store`.
///
/// All path construction and printing goes through a `StoreDir`, since the
/// directory string is baked into every path digest preimage: the same
/// content stored under two different directories yields two different
/// store paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreDir(String);

impl StoreDir {
    /// Accepts an absolute path without a trailing slash.
    pub fn new(dir: &str) -> Result<Self, StorePathError> {
        if !dir.starts_with('/') || dir.len() < 2 || dir.ends_with('/') {
            return Err(StorePathError::InvalidStoreDir { dir: dir.to_string() });
        }
        Ok(StoreDir(dir.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render a store path under this directory.
    pub fn print_path(&self, path: &StorePath) -> String {
        format!("{}/{}", self.0, path.base_name())
    }

    /// Render a set of paths, preserving the set's sorted order.
    pub fn print_path_set(&self, paths: &BTreeSet<StorePath>) -> Vec<String> {
        paths.iter().map(|p| self.print_path(p)).collect()
    }

    /// Parse an absolute path that must live directly under this directory.
    pub fn parse_path(&self, path: &str) -> Result<StorePath, StorePathError> {
        let base_name = path
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorePathError::NotInStore {
                path: path.to_string(),
                store_dir: self.0.clone(),
            })?;

        if base_name.contains('/') {
            return Err(StorePathError::InvalidPath { path: path.to_string() });
        }

        StorePath::from_base_name(base_name)
    }

    /// Core construction: digest the typed preimage
    /// `<type>:<algo>:<inner-digest>:<store-dir>:<name>` with SHA-256 and
    /// keep the first 160 bits.
    pub fn make_store_path(
        &self,
        path_type: &str,
        inner_hash: &Hash,
        name: &str,
    ) -> Result<StorePath, StorePathError> {
        crate::store_path::validate_name(name)?;

        let preimage = format!(
            "{}:{}:{}:{}",
            path_type,
            inner_hash.tagged_base16(),
            self.0,
            name
        );
        let digest_full = Hash::sha256(preimage.as_bytes());

        let mut digest = [0u8; DIGEST_LENGTH];
        digest.copy_from_slice(&digest_full.as_bytes()[..DIGEST_LENGTH]);

        StorePath::new(digest, name)
    }

    /// Path for a literal text object (derivation files and other small
    /// blobs). References are baked into the type discriminator in sorted
    /// order; text objects cannot refer to themselves.
    pub fn make_text_path(
        &self,
        name: &str,
        text_hash: &Hash,
        references: &BTreeSet<StorePath>,
    ) -> Result<StorePath, StorePathError> {
        if text_hash.algorithm() != HashAlgorithm::Sha256 {
            return Err(StorePathError::UnsupportedAlgorithm {
                algorithm: text_hash.algorithm().to_string(),
                context: "text".to_string(),
            });
        }
        self.make_store_path(&self.make_type("text", references, false), text_hash, name)
    }

    /// Path for a content-addressed tree or file.
    ///
    /// A recursively-ingested SHA-256 hash uses the `source` type directly;
    /// everything else goes through the `output:out` flavor over a
    /// `fixed:out:` preimage. Fixed recipes accept md5, sha1 and sha256.
    pub fn make_fixed_output_path(
        &self,
        method: IngestionMethod,
        hash: &Hash,
        name: &str,
    ) -> Result<StorePath, StorePathError> {
        if method == IngestionMethod::Recursive && hash.algorithm() == HashAlgorithm::Sha256 {
            return self.make_store_path("source", hash, name);
        }

        if hash.algorithm() == HashAlgorithm::Sha512 {
            return Err(StorePathError::UnsupportedAlgorithm {
                algorithm: hash.algorithm().to_string(),
                context: "fixed-output".to_string(),
            });
        }

        let inner = Hash::sha256(
            format!(
                "fixed:out:{}{}:",
                method.prefix(),
                hash.tagged_base16()
            )
            .as_bytes(),
        );
        self.make_store_path("output:out", &inner, name)
    }

    /// Path for an input-addressed build output. `drv_hash` is the
    /// derivation's hash modulo fixed-output subgraphs.
    pub fn make_output_path(
        &self,
        output_id: &str,
        drv_hash: &Hash,
        drv_name: &str,
    ) -> Result<StorePath, StorePathError> {
        self.make_store_path(
            &format!("output:{}", output_id),
            drv_hash,
            &output_path_name(drv_name, output_id),
        )
    }

    /// Compute the path `add_text_to_store` would produce, without storing.
    pub fn compute_store_path_for_text(
        &self,
        name: &str,
        contents: &[u8],
        references: &BTreeSet<StorePath>,
    ) -> Result<StorePath, StorePathError> {
        self.make_text_path(name, &Hash::sha256(contents), references)
    }

    fn make_type(
        &self,
        prefix: &str,
        references: &BTreeSet<StorePath>,
        self_reference: bool,
    ) -> String {
        let mut out = prefix.to_string();
        for reference in references {
            out.push(':');
            out.push_str(&self.print_path(reference));
        }
        if self_reference {
            out.push_str(":self");
        }
        out
    }
}

impl Default for StoreDir {
    fn default() -> Self {
        StoreDir(DEFAULT_STORE_DIR.to_string())
    }
}

impl fmt::Display for StoreDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filesystem name of a derivation output: the plain derivation name for
/// `out`, otherwise `<name>-<id>`.
pub fn output_path_name(drv_name: &str, output_id: &str) -> String {
    if output_id == "out" {
        drv_name.to_string()
    } else {
        format!("{}-{}", drv_name, output_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alder_hash::base32;

    fn text_path_reference(contents: &[u8], name: &str) -> String {
        // Recompute the digest by hand from the documented preimage.
        let inner = Hash::sha256(contents);
        let pre = format!("text:sha256:{}:/nix/store:{}", inner.to_base16(), name);
        let outer = Hash::sha256(pre.as_bytes());
        base32::encode(&outer.as_bytes()[..DIGEST_LENGTH])
    }

    #[test]
    fn rejects_malformed_directories() {
        assert!(StoreDir::new("relative/store").is_err());
        assert!(StoreDir::new("/").is_err());
        assert!(StoreDir::new("/nix/store/").is_err());
        assert!(StoreDir::new("/nix/store").is_ok());
    }

    #[test]
    fn prints_and_parses_roundtrip() {
        let dir = StoreDir::default();
        let path =
            StorePath::from_base_name("00bgd045z0d4icpbc2yyz4gx48ak44la-hello-1.0").unwrap();
        let printed = dir.print_path(&path);
        assert_eq!(printed, "/nix/store/00bgd045z0d4icpbc2yyz4gx48ak44la-hello-1.0");
        assert_eq!(dir.parse_path(&printed).unwrap(), path);
    }

    #[test]
    fn parse_rejects_foreign_and_nested_paths() {
        let dir = StoreDir::default();
        assert!(matches!(
            dir.parse_path("/other/store/00bgd045z0d4icpbc2yyz4gx48ak44la-x"),
            Err(StorePathError::NotInStore { .. })
        ));
        assert!(dir
            .parse_path("/nix/store/00bgd045z0d4icpbc2yyz4gx48ak44la-x/nested")
            .is_err());
    }

    #[test]
    fn text_path_matches_documented_preimage() {
        let dir = StoreDir::default();
        let contents = b"Hello, World!\n";
        let path = dir
            .compute_store_path_for_text("hello", contents, &BTreeSet::new())
            .unwrap();

        assert_eq!(path.hash_part(), text_path_reference(contents, "hello"));
        assert_eq!(path.name(), "hello");
    }

    #[test]
    fn text_path_depends_on_references() {
        let dir = StoreDir::default();
        let reference =
            StorePath::from_base_name("00bgd045z0d4icpbc2yyz4gx48ak44la-dep").unwrap();
        let empty = BTreeSet::new();
        let with_ref: BTreeSet<_> = [reference].into_iter().collect();

        let p1 = dir.compute_store_path_for_text("x", b"same", &empty).unwrap();
        let p2 = dir.compute_store_path_for_text("x", b"same", &with_ref).unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn text_path_depends_on_store_dir() {
        let contents = b"same";
        let refs = BTreeSet::new();
        let p1 = StoreDir::default()
            .compute_store_path_for_text("x", contents, &refs)
            .unwrap();
        let p2 = StoreDir::new("/gnu/store")
            .unwrap()
            .compute_store_path_for_text("x", contents, &refs)
            .unwrap();
        assert_ne!(p1.hash_part(), p2.hash_part());
    }

    #[test]
    fn fixed_output_flat_matches_documented_preimage() {
        let dir = StoreDir::default();
        let content_hash = Hash::sha256(b"tarball bytes");
        let path = dir
            .make_fixed_output_path(IngestionMethod::Flat, &content_hash, "foo.tar.gz")
            .unwrap();

        let inner = Hash::sha256(
            format!("fixed:out:sha256:{}:", content_hash.to_base16()).as_bytes(),
        );
        let pre = format!("output:out:sha256:{}:/nix/store:foo.tar.gz", inner.to_base16());
        let expected = base32::encode(&Hash::sha256(pre.as_bytes()).as_bytes()[..DIGEST_LENGTH]);

        assert_eq!(path.hash_part(), expected);
    }

    #[test]
    fn fixed_output_recursive_sha256_uses_source_type() {
        let dir = StoreDir::default();
        let nar_hash = Hash::sha256(b"nar bytes");
        let path = dir
            .make_fixed_output_path(IngestionMethod::Recursive, &nar_hash, "tree")
            .unwrap();

        let pre = format!("source:sha256:{}:/nix/store:tree", nar_hash.to_base16());
        let expected = base32::encode(&Hash::sha256(pre.as_bytes()).as_bytes()[..DIGEST_LENGTH]);
        assert_eq!(path.hash_part(), expected);
    }

    #[test]
    fn fixed_output_recursive_sha1_uses_fixed_recipe() {
        let dir = StoreDir::default();
        let hash = Hash::hash_bytes(HashAlgorithm::Sha1, b"bytes");
        let path = dir
            .make_fixed_output_path(IngestionMethod::Recursive, &hash, "x")
            .unwrap();

        let inner =
            Hash::sha256(format!("fixed:out:r:sha1:{}:", hash.to_base16()).as_bytes());
        let pre = format!("output:out:sha256:{}:/nix/store:x", inner.to_base16());
        let expected = base32::encode(&Hash::sha256(pre.as_bytes()).as_bytes()[..DIGEST_LENGTH]);
        assert_eq!(path.hash_part(), expected);
    }

    #[test]
    fn fixed_output_rejects_sha512() {
        let dir = StoreDir::default();
        let hash = Hash::hash_bytes(HashAlgorithm::Sha512, b"bytes");
        assert!(matches!(
            dir.make_fixed_output_path(IngestionMethod::Flat, &hash, "x"),
            Err(StorePathError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn text_path_rejects_non_sha256() {
        let dir = StoreDir::default();
        let sha1 = Hash::hash_bytes(HashAlgorithm::Sha1, b"x");
        assert!(dir.make_text_path("x", &sha1, &BTreeSet::new()).is_err());
    }

    #[test]
    fn output_path_name_suffixes_secondary_outputs() {
        assert_eq!(output_path_name("hello-1.0", "out"), "hello-1.0");
        assert_eq!(output_path_name("hello-1.0", "dev"), "hello-1.0-dev");
    }

    #[test]
    fn output_path_uses_output_discriminator() {
        let dir = StoreDir::default();
        let modulo = Hash::sha256(b"derivation identity");
        let out = dir.make_output_path("out", &modulo, "pkg").unwrap();
        let dev = dir.make_output_path("dev", &modulo, "pkg").unwrap();

        assert_eq!(out.name(), "pkg");
        assert_eq!(dev.name(), "pkg-dev");
        assert_ne!(out.hash_part(), dev.hash_part());
    }
}
