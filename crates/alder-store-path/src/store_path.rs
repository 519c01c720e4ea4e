//! The [`StorePath`] value type and its base-name syntax.

use std::cmp::Ordering;
use std::fmt;

use alder_hash::base32;

use crate::StorePathError;

/// Digest length in bytes (160 bits).
pub const DIGEST_LENGTH: usize = 20;

/// Digest length once rendered in base-32.
pub const ENCODED_DIGEST_LENGTH: usize = 32;

/// Longest accepted name component.
pub const MAX_NAME_LENGTH: usize = 211;

/// Extension carried by serialized derivation files.
pub const DRV_EXTENSION: &str = ".drv";

/// An immutable store object name: 20-byte digest plus name component.
///
/// Prints as `<base-32 digest>-<name>`; the full filesystem form is
/// produced by [`StoreDir::print_path`](crate::StoreDir::print_path).
/// Ordering follows the printed form, so sorted containers iterate in the
/// byte order of the rendered paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    digest: [u8; DIGEST_LENGTH],
    name: String,
}

impl StorePath {
    /// Build a path from a digest and a validated name.
    pub fn new(digest: [u8; DIGEST_LENGTH], name: &str) -> Result<Self, StorePathError> {
        validate_name(name)?;
        Ok(StorePath {
            digest,
            name: name.to_string(),
        })
    }

    /// Parse a base name of the form `<32 base-32 chars>-<name>`.
    pub fn from_base_name(base_name: &str) -> Result<Self, StorePathError> {
        if !base_name.is_ascii()
            || base_name.len() < ENCODED_DIGEST_LENGTH + 1
            || base_name.as_bytes()[ENCODED_DIGEST_LENGTH] != b'-'
        {
            return Err(StorePathError::InvalidPath {
                path: base_name.to_string(),
            });
        }

        let digest_part = &base_name[..ENCODED_DIGEST_LENGTH];
        let decoded = base32::decode(digest_part).map_err(|_| StorePathError::InvalidPath {
            path: base_name.to_string(),
        })?;
        let digest: [u8; DIGEST_LENGTH] =
            decoded.try_into().map_err(|_| StorePathError::InvalidPath {
                path: base_name.to_string(),
            })?;

        Self::new(digest, &base_name[ENCODED_DIGEST_LENGTH + 1..])
    }

    /// The 20-byte digest.
    pub fn digest(&self) -> &[u8; DIGEST_LENGTH] {
        &self.digest
    }

    /// The digest rendered as 32 base-32 characters; the narinfo key.
    pub fn hash_part(&self) -> String {
        base32::encode(&self.digest)
    }

    /// The name component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<digest>-<name>`, the path's final filesystem component.
    pub fn base_name(&self) -> String {
        format!("{}-{}", self.hash_part(), self.name)
    }

    /// Whether this path holds a serialized derivation.
    pub fn is_derivation(&self) -> bool {
        self.name.ends_with(DRV_EXTENSION)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.hash_part(), self.name)
    }
}

impl Ord for StorePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash_part()
            .cmp(&other.hash_part())
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for StorePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A store path optionally narrowed to named derivation outputs.
///
/// An empty output set means the path itself; a non-empty set means
/// "these outputs of this derivation". Prints as `<path>!out1,out2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorePathWithOutputs {
    pub path: StorePath,
    pub outputs: std::collections::BTreeSet<String>,
}

impl StorePathWithOutputs {
    pub fn new(path: StorePath) -> Self {
        StorePathWithOutputs {
            path,
            outputs: Default::default(),
        }
    }

    /// Render against a printed path, appending `!out1,out2` when outputs
    /// are selected.
    pub fn print(&self, store_dir: &crate::StoreDir) -> String {
        let printed = store_dir.print_path(&self.path);
        if self.outputs.is_empty() {
            printed
        } else {
            let outputs: Vec<&str> = self.outputs.iter().map(String::as_str).collect();
            format!("{}!{}", printed, outputs.join(","))
        }
    }

    /// Parse a `<path>[!out1,out2]` string against a store directory.
    pub fn parse(store_dir: &crate::StoreDir, input: &str) -> Result<Self, StorePathError> {
        match input.split_once('!') {
            None => Ok(Self::new(store_dir.parse_path(input)?)),
            Some((path, outputs)) => Ok(StorePathWithOutputs {
                path: store_dir.parse_path(path)?,
                outputs: outputs.split(',').map(str::to_string).collect(),
            }),
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), StorePathError> {
    if name.is_empty() {
        return Err(StorePathError::InvalidName {
            name: name.to_string(),
            reason: "empty name".to_string(),
        });
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(StorePathError::InvalidName {
            name: name.to_string(),
            reason: format!("longer than {} characters", MAX_NAME_LENGTH),
        });
    }
    if name.starts_with('.') {
        return Err(StorePathError::InvalidName {
            name: name.to_string(),
            reason: "starts with a period".to_string(),
        });
    }
    for c in name.chars() {
        let accepted = c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_' | '?' | '=');
        if !accepted {
            return Err(StorePathError::InvalidName {
                name: name.to_string(),
                reason: format!("illegal character '{}'", c),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::StoreDir;

    const BASE: &str = "00bgd045z0d4icpbc2yyz4gx48ak44la-hello-1.0";

    #[test]
    fn parses_valid_base_name() {
        let path = StorePath::from_base_name(BASE).unwrap();
        assert_eq!(path.name(), "hello-1.0");
        assert_eq!(path.hash_part(), "00bgd045z0d4icpbc2yyz4gx48ak44la");
        assert_eq!(path.base_name(), BASE);
    }

    #[test]
    fn display_matches_base_name() {
        let path = StorePath::from_base_name(BASE).unwrap();
        assert_eq!(path.to_string(), BASE);
    }

    #[test]
    fn rejects_short_and_separatorless_base_names() {
        assert!(StorePath::from_base_name("tooshort-x").is_err());
        assert!(StorePath::from_base_name("00bgd045z0d4icpbc2yyz4gx48ak44laxhello").is_err());
    }

    #[test]
    fn rejects_digest_outside_alphabet() {
        // 'e' is not in the store's base-32 alphabet.
        assert!(StorePath::from_base_name("e0bgd045z0d4icpbc2yyz4gx48ak44la-hello").is_err());
    }

    #[test]
    fn rejects_bad_names() {
        let digest = [0u8; DIGEST_LENGTH];
        assert!(StorePath::new(digest, "").is_err());
        assert!(StorePath::new(digest, ".hidden").is_err());
        assert!(StorePath::new(digest, "with space").is_err());
        assert!(StorePath::new(digest, "tilde~1").is_err());
        assert!(StorePath::new(digest, &"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn accepts_full_character_class() {
        let digest = [0u8; DIGEST_LENGTH];
        assert!(StorePath::new(digest, "a+B-c.d_e?f=0").is_ok());
        assert!(StorePath::new(digest, &"x".repeat(MAX_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn derivation_detection_uses_extension() {
        let digest = [0u8; DIGEST_LENGTH];
        assert!(StorePath::new(digest, "hello-1.0.drv").unwrap().is_derivation());
        assert!(!StorePath::new(digest, "hello-1.0").unwrap().is_derivation());
    }

    #[test]
    fn ordering_follows_printed_form() {
        let a = StorePath::from_base_name("00bgd045z0d4icpbc2yyz4gx48ak44la-b").unwrap();
        let b = StorePath::from_base_name("10bgd045z0d4icpbc2yyz4gx48ak44la-a").unwrap();
        assert!(a < b);
        assert!(a.base_name() < b.base_name());
    }

    #[test]
    fn with_outputs_prints_selection() {
        let dir = StoreDir::default();
        let path = StorePath::from_base_name(BASE).unwrap();

        let plain = StorePathWithOutputs::new(path.clone());
        assert_eq!(plain.print(&dir), format!("/nix/store/{}", BASE));

        let mut selected = StorePathWithOutputs::new(path);
        selected.outputs.insert("out".to_string());
        selected.outputs.insert("dev".to_string());
        assert_eq!(
            selected.print(&dir),
            format!("/nix/store/{}!dev,out", BASE)
        );
    }

    #[test]
    fn with_outputs_parses_back() {
        let dir = StoreDir::default();
        let printed = format!("/nix/store/{}!dev,out", BASE);
        let parsed = StorePathWithOutputs::parse(&dir, &printed).unwrap();
        assert_eq!(parsed.outputs.len(), 2);
        assert_eq!(parsed.print(&dir), printed);
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;

        proptest! {
            #[test]
            fn printed_paths_parse_back(
                digest in prop::array::uniform20(any::<u8>()),
                name in "[A-Za-z0-9+_?=](?:[A-Za-z0-9+_?=.-]){0,40}",
            ) {
                let path = StorePath::new(digest, &name).unwrap();
                let dir = StoreDir::default();
                prop_assert_eq!(dir.parse_path(&dir.print_path(&path)).unwrap(), path);
            }

            #[test]
            fn base_names_roundtrip(digest in prop::array::uniform20(any::<u8>())) {
                let path = StorePath::new(digest, "pkg-1.0").unwrap();
                prop_assert_eq!(
                    StorePath::from_base_name(&path.base_name()).unwrap(),
                    path
                );
            }
        }
    }
}
