//! Ed25519 keys for narinfo signing.
//!
//! Keys and signatures share the `name:base64-payload` wire format; the
//! name ties a signature to the trusted key that must verify it. Secret
//! keys serialize as the 64-byte seed-plus-public keypair.

use base64::Engine;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::Verifier;

use crate::NarInfoError;

/// A named Ed25519 signing key.
pub struct SigningKey {
    name: String,
    key: ed25519_dalek::SigningKey,
}

impl SigningKey {
    /// Derive a key pair from a 32-byte seed.
    pub fn from_seed(name: &str, seed: &[u8; 32]) -> Self {
        SigningKey {
            name: name.to_string(),
            key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Parse a `name:base64(64-byte keypair)` string.
    pub fn from_string(input: &str) -> Result<Self, NarInfoError> {
        let (name, payload) = split_key(input)?;
        let bytes = decode_payload(&name, payload)?;
        let keypair: [u8; 64] = bytes.try_into().map_err(|_| NarInfoError::InvalidKey {
            name: name.clone(),
            reason: "secret key must be 64 bytes".to_string(),
        })?;
        let key = ed25519_dalek::SigningKey::from_keypair_bytes(&keypair).map_err(|e| {
            NarInfoError::InvalidKey {
                name: name.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(SigningKey { name, key })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sign a fingerprint, producing a `name:base64-signature` string.
    pub fn sign(&self, fingerprint: &str) -> String {
        let signature = self.key.sign(fingerprint.as_bytes());
        format!(
            "{}:{}",
            self.name,
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
        )
    }

    /// The corresponding verification key.
    pub fn to_public(&self) -> PublicKey {
        PublicKey {
            name: self.name.clone(),
            key: self.key.verifying_key(),
        }
    }

    /// Serialize as `name:base64(keypair)`.
    pub fn to_string(&self) -> String {
        format!(
            "{}:{}",
            self.name,
            base64::engine::general_purpose::STANDARD.encode(self.key.to_keypair_bytes())
        )
    }
}

/// A named Ed25519 verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    name: String,
    key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Parse a `name:base64(32-byte public key)` string.
    pub fn from_string(input: &str) -> Result<Self, NarInfoError> {
        let (name, payload) = split_key(input)?;
        let bytes = decode_payload(&name, payload)?;
        let raw: [u8; 32] = bytes.try_into().map_err(|_| NarInfoError::InvalidKey {
            name: name.clone(),
            reason: "public key must be 32 bytes".to_string(),
        })?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&raw).map_err(|e| {
            NarInfoError::InvalidKey {
                name: name.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(PublicKey { name, key })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize as `name:base64(public key)`, the form listed in a
    /// trusted-keys configuration.
    pub fn to_string(&self) -> String {
        format!(
            "{}:{}",
            self.name,
            base64::engine::general_purpose::STANDARD.encode(self.key.as_bytes())
        )
    }
}

/// Check one `name:base64-signature` string against the trusted key of
/// the same name.
pub fn verify(fingerprint: &str, signature: &str, trusted: &[PublicKey]) -> bool {
    let Some((name, payload)) = signature.split_once(':') else {
        return false;
    };
    let Ok(raw) = base64::engine::general_purpose::STANDARD.decode(payload) else {
        return false;
    };
    let raw: [u8; 64] = match raw.try_into() {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    let signature = Signature::from_bytes(&raw);

    trusted
        .iter()
        .filter(|key| key.name == name)
        .any(|key| key.key.verify(fingerprint.as_bytes(), &signature).is_ok())
}

fn split_key(input: &str) -> Result<(String, &str), NarInfoError> {
    match input.split_once(':') {
        Some((name, payload)) if !name.is_empty() && !payload.is_empty() => {
            Ok((name.to_string(), payload))
        }
        _ => Err(NarInfoError::InvalidKey {
            name: input.to_string(),
            reason: "expected 'name:base64-payload'".to_string(),
        }),
    }
}

fn decode_payload(name: &str, payload: &str) -> Result<Vec<u8>, NarInfoError> {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| NarInfoError::InvalidKey {
            name: name.to_string(),
            reason: e.to_string(),
        })
}
