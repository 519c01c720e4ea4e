//! Tagged cryptographic hashes for the artifact store.
//!
//! A [`Hash`] pairs an [`HashAlgorithm`] with its digest bytes and knows how
//! to render itself in the three encodings the store uses:
//!
//! - base-16 (lowercase hex) for canonical derivation text and preimages,
//! - the store's base-32 (see [`base32`]) for store paths, narinfo fields
//!   and object URLs,
//! - base-64 for compact display.
//!
//! Parsers discriminate the encoding by digest length, so any of the three
//! forms is accepted wherever a hash is read back.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use digest::Digest;
use thiserror::Error;

pub mod base32;

/// Magic token opening every serialized filesystem archive.
pub const NAR_VERSION_MAGIC: &str = "nix-archive-1";

/// Errors produced when parsing or constructing hashes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The algorithm tag is not one of md5, sha1, sha256, sha512.
    #[error("unknown hash algorithm '{name}'")]
    UnknownAlgorithm {
        /// The tag as it appeared in the input.
        name: String,
    },

    /// The digest length matches none of the supported encodings.
    #[error("hash '{input}' has wrong length for algorithm {algorithm}")]
    WrongLength {
        /// The digest string as it appeared in the input.
        input: String,
        /// The algorithm the digest was parsed against.
        algorithm: HashAlgorithm,
    },

    /// A hash string without an `algo:` prefix was given where one is required.
    #[error("hash '{input}' does not include an algorithm tag")]
    MissingAlgorithm {
        /// The untagged input.
        input: String,
    },

    /// A character outside the base-16 alphabet.
    #[error("invalid base-16 digest '{input}'")]
    InvalidBase16 {
        /// The offending digest string.
        input: String,
    },

    /// A character outside the store's base-32 alphabet.
    #[error("invalid base-32 character '{character}'")]
    InvalidBase32Character {
        /// The offending character.
        character: char,
    },

    /// A base-32 string whose trailing bits overflow the decoded length.
    #[error("invalid base-32 encoding of length {length}")]
    InvalidBase32Length {
        /// Length of the rejected input in characters.
        length: usize,
    },

    /// A digest that fails base-64 decoding.
    #[error("invalid base-64 digest '{input}'")]
    InvalidBase64 {
        /// The offending digest string.
        input: String,
    },
}

/// The digest algorithms understood by the store.
///
/// Modern content addressing is SHA-256 only; the other algorithms survive
/// for fixed-output hashes declared by older recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Digest size in bytes.
    pub const fn size(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Lowercase name used in tagged renderings and preimages.
    pub const fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(HashError::UnknownAlgorithm { name: other.to_string() }),
        }
    }
}

/// A digest tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl Hash {
    /// Wrap raw digest bytes, checking the length against the algorithm.
    pub fn from_bytes(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Result<Self, HashError> {
        if bytes.len() != algorithm.size() {
            return Err(HashError::WrongLength {
                input: hex::encode(&bytes),
                algorithm,
            });
        }
        Ok(Hash { algorithm, bytes })
    }

    /// Hash `data` in one shot.
    pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut sink = HashSink::new(algorithm);
        sink.update(data);
        sink.finish().0
    }

    /// SHA-256 of `data`. The store's workhorse.
    pub fn sha256(data: &[u8]) -> Self {
        Self::hash_bytes(HashAlgorithm::Sha256, data)
    }

    /// The tagging algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex rendering of the digest, no algorithm tag.
    pub fn to_base16(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Store base-32 rendering of the digest, no algorithm tag.
    pub fn to_base32(&self) -> String {
        base32::encode(&self.bytes)
    }

    /// Base-64 rendering of the digest, no algorithm tag.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `algo:hexdigest`, as used in path preimages.
    pub fn tagged_base16(&self) -> String {
        format!("{}:{}", self.algorithm, self.to_base16())
    }

    /// `algo:base32digest`, as used in narinfo fields and fingerprints.
    pub fn tagged_base32(&self) -> String {
        format!("{}:{}", self.algorithm, self.to_base32())
    }

    /// Parse a digest of known algorithm, accepting base-16, base-32 or
    /// base-64 discriminated by length.
    pub fn parse_untagged(algorithm: HashAlgorithm, digest: &str) -> Result<Self, HashError> {
        let size = algorithm.size();

        let bytes = if digest.len() == size * 2 {
            hex::decode(digest).map_err(|_| HashError::InvalidBase16 { input: digest.to_string() })?
        } else if digest.len() == base32::encoded_len(size) {
            base32::decode(digest)?
        } else if digest.len() == base64_len(size) {
            base64::engine::general_purpose::STANDARD
                .decode(digest)
                .map_err(|_| HashError::InvalidBase64 { input: digest.to_string() })?
        } else {
            return Err(HashError::WrongLength {
                input: digest.to_string(),
                algorithm,
            });
        };

        Self::from_bytes(algorithm, bytes)
    }

    /// Parse an `algo:digest` string.
    pub fn parse_tagged(input: &str) -> Result<Self, HashError> {
        let (algo, digest) = input
            .split_once(':')
            .ok_or_else(|| HashError::MissingAlgorithm { input: input.to_string() })?;
        Self::parse_untagged(algo.parse()?, digest)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tagged_base32())
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_tagged(s)
    }
}

const fn base64_len(size: usize) -> usize {
    (size + 2) / 3 * 4
}

enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

/// Incremental hasher that also counts the bytes fed to it.
///
/// Implements [`std::io::Write`] so it can sit behind any byte sink.
pub struct HashSink {
    inner: Hasher,
    bytes_written: u64,
}

impl HashSink {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Md5 => Hasher::Md5(md5::Md5::new()),
            HashAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        };
        HashSink { inner, bytes_written: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
        self.bytes_written += data.len() as u64;
    }

    /// Finish hashing, returning the digest and the byte count.
    pub fn finish(self) -> (Hash, u64) {
        let (algorithm, bytes) = match self.inner {
            Hasher::Md5(h) => (HashAlgorithm::Md5, h.finalize().to_vec()),
            Hasher::Sha1(h) => (HashAlgorithm::Sha1, h.finalize().to_vec()),
            Hasher::Sha256(h) => (HashAlgorithm::Sha256, h.finalize().to_vec()),
            Hasher::Sha512(h) => (HashAlgorithm::Sha512, h.finalize().to_vec()),
        };
        (Hash { algorithm, bytes }, self.bytes_written)
    }
}

impl std::io::Write for HashSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
