//! Content-address descriptors attached to store objects.

use std::fmt;
use std::str::FromStr;

use alder_hash::Hash;
use alder_hash::HashAlgorithm;

use crate::StorePathError;

/// How file contents were turned into bytes before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IngestionMethod {
    /// The file's literal bytes.
    Flat,
    /// The NAR serialization of the tree.
    Recursive,
}

impl IngestionMethod {
    /// `r:` for recursive hashes, empty for flat. Prepended to algorithm
    /// names in derivation output fields and fixed-output preimages.
    pub const fn prefix(self) -> &'static str {
        match self {
            IngestionMethod::Flat => "",
            IngestionMethod::Recursive => "r:",
        }
    }
}

/// A declared fixed-output hash: ingestion method plus digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedOutputHash {
    pub method: IngestionMethod,
    pub hash: Hash,
}

impl FixedOutputHash {
    /// `[r:]<algo>`, the `hashAlgo` field of serialized derivations.
    pub fn method_algo(&self) -> String {
        format!("{}{}", self.method.prefix(), self.hash.algorithm())
    }
}

/// Descriptor recording how a store object's path was derived from its
/// content. Printed into the narinfo `CA:` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentAddress {
    /// A literal text object hashed with SHA-256.
    Text { hash: Hash },
    /// A fixed-output object (flat or NAR-recursive).
    Fixed { method: IngestionMethod, hash: Hash },
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentAddress::Text { hash } => write!(f, "text:{}", hash.tagged_base32()),
            ContentAddress::Fixed { method, hash } => {
                write!(f, "fixed:{}{}", method.prefix(), hash.tagged_base32())
            }
        }
    }
}

impl FromStr for ContentAddress {
    type Err = StorePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorePathError::InvalidContentAddress { input: s.to_string() };

        if let Some(rest) = s.strip_prefix("text:") {
            let hash = Hash::parse_tagged(rest).map_err(|_| invalid())?;
            if hash.algorithm() != HashAlgorithm::Sha256 {
                return Err(invalid());
            }
            Ok(ContentAddress::Text { hash })
        } else if let Some(rest) = s.strip_prefix("fixed:") {
            let (method, rest) = match rest.strip_prefix("r:") {
                Some(rest) => (IngestionMethod::Recursive, rest),
                None => (IngestionMethod::Flat, rest),
            };
            let hash = Hash::parse_tagged(rest).map_err(|_| invalid())?;
            Ok(ContentAddress::Fixed { method, hash })
        } else {
            Err(invalid())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_descriptor_roundtrips() {
        let ca = ContentAddress::Text {
            hash: Hash::sha256(b"contents"),
        };
        let printed = ca.to_string();
        assert!(printed.starts_with("text:sha256:"));
        assert_eq!(printed.parse::<ContentAddress>().unwrap(), ca);
    }

    #[test]
    fn fixed_recursive_descriptor_roundtrips() {
        let ca = ContentAddress::Fixed {
            method: IngestionMethod::Recursive,
            hash: Hash::sha256(b"tree"),
        };
        let printed = ca.to_string();
        assert!(printed.starts_with("fixed:r:sha256:"));
        assert_eq!(printed.parse::<ContentAddress>().unwrap(), ca);
    }

    #[test]
    fn fixed_flat_descriptor_roundtrips() {
        let ca = ContentAddress::Fixed {
            method: IngestionMethod::Flat,
            hash: Hash::hash_bytes(HashAlgorithm::Sha1, b"blob"),
        };
        let printed = ca.to_string();
        assert!(printed.starts_with("fixed:sha1:"));
        assert_eq!(printed.parse::<ContentAddress>().unwrap(), ca);
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!("git:sha1:abcd".parse::<ContentAddress>().is_err());
    }

    #[test]
    fn rejects_non_sha256_text() {
        let sha1 = Hash::hash_bytes(HashAlgorithm::Sha1, b"x").tagged_base32();
        assert!(format!("text:{}", sha1).parse::<ContentAddress>().is_err());
    }

    #[test]
    fn method_algo_renders_recursive_prefix() {
        let fixed = FixedOutputHash {
            method: IngestionMethod::Recursive,
            hash: Hash::sha256(b"x"),
        };
        assert_eq!(fixed.method_algo(), "r:sha256");

        let flat = FixedOutputHash {
            method: IngestionMethod::Flat,
            hash: Hash::hash_bytes(HashAlgorithm::Md5, b"x"),
        };
        assert_eq!(flat.method_algo(), "md5");
    }
}
