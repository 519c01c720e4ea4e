//! Build recipes ("derivations") and their serializations.
//!
//! A [`Derivation`] is an immutable description of one build step: named
//! outputs, input derivations and sources, a builder invocation and an
//! environment. Its canonical text form (see [`aterm`]) is both the
//! on-disk `.drv` format and the preimage for derivation hashing; the
//! binary form (see [`wire`]) is what crosses the network, with the input
//! derivation graph already resolved away.
//!
//! Output paths come in two flavors, and every operation that looks at an
//! output matches both arms:
//!
//! - [`DerivationOutput::Fixed`] declares its content hash up front, so
//!   the output path is computable without building;
//! - [`DerivationOutput::Intensional`] carries a path that was derived
//!   from the recipe itself via [`hash_modulo::hash_derivation_modulo`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use alder_hash::Hash;
use alder_hash::base32;
use alder_store_path::FixedOutputHash;
use alder_store_path::StoreDir;
use alder_store_path::StorePath;
use alder_store_path::StorePathError;
use thiserror::Error;

pub mod aterm;
pub mod hash_modulo;
pub mod wire;

pub use hash_modulo::DerivationResolver;
pub use hash_modulo::DrvHashes;
pub use hash_modulo::hash_derivation_modulo;

pub use alder_store_path::DRV_EXTENSION;

/// Errors produced by derivation handling.
#[derive(Debug, Error)]
pub enum DerivationError {
    /// The derivation declares no output with this id.
    #[error("derivation has no output '{id}'")]
    MissingOutput {
        /// The requested output id.
        id: String,
    },

    /// Canonical text that does not follow the `Derive(...)` grammar.
    #[error("error parsing derivation: {reason}")]
    Format {
        /// What failed to parse.
        reason: String,
    },

    /// A `hashAlgo` field that is not `[r:]md5|sha1|sha256|sha512`.
    /// Malformed strings are rejected outright rather than stripped.
    #[error("invalid hash algorithm specification '{spec}'")]
    InvalidHashAlgo {
        /// The offending field contents.
        spec: String,
    },

    /// The input-derivation graph loops back on itself.
    #[error("cyclic reference through derivation '{path}'")]
    CyclicReference {
        /// Base name of the derivation closing the cycle.
        path: String,
    },

    /// A derivation path that the resolver cannot supply.
    #[error("derivation '{path}' is not available")]
    MissingDerivation {
        /// Base name of the unavailable derivation.
        path: String,
    },

    /// A derivation file name without the `.drv` extension.
    #[error("'{name}' is not a derivation file name")]
    NotADerivation {
        /// The offending name.
        name: String,
    },

    /// Framing errors from the binary wire form.
    #[error("derivation wire format: {0}")]
    Wire(#[from] alder_nar::NarError),

    /// Transport errors while writing the binary wire form.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    StorePath(#[from] StorePathError),
}

/// One declared output of a derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivationOutput {
    /// Content-addressed: the hash is declared a priori and the path is
    /// derivable without building.
    Fixed(FixedOutputHash),
    /// Input-addressed: the path was computed from the recipe when the
    /// derivation was constructed.
    Intensional { path: StorePath },
}

impl DerivationOutput {
    /// The output's store path. Intensional outputs carry it; fixed
    /// outputs compute it from the declared hash and the derivation name.
    pub fn path(
        &self,
        store_dir: &StoreDir,
        drv_name: &str,
    ) -> Result<StorePath, DerivationError> {
        match self {
            DerivationOutput::Intensional { path } => Ok(path.clone()),
            DerivationOutput::Fixed(fixed) => Ok(store_dir.make_fixed_output_path(
                fixed.method,
                &fixed.hash,
                drv_name,
            )?),
        }
    }
}

/// A build recipe.
///
/// All maps and sets iterate in sorted key order; the canonical
/// serialization depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Derivation {
    pub name: String,
    pub outputs: BTreeMap<String, DerivationOutput>,
    pub input_drvs: BTreeMap<StorePath, BTreeSet<String>>,
    pub input_srcs: BTreeSet<StorePath>,
    pub platform: String,
    pub builder: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Derivation {
    /// The single declared `out` output, when this is a fixed-output
    /// derivation.
    pub fn fixed_output(&self) -> Option<&FixedOutputHash> {
        if self.outputs.len() != 1 {
            return None;
        }
        match self.outputs.get("out") {
            Some(DerivationOutput::Fixed(fixed)) => Some(fixed),
            _ => None,
        }
    }

    /// Exactly one output named `out`, of the fixed flavor.
    pub fn is_fixed_output(&self) -> bool {
        self.fixed_output().is_some()
    }

    /// Whether the builder is an in-process builtin rather than an
    /// executable path.
    pub fn is_builtin(&self) -> bool {
        self.builder.starts_with("builtin:")
    }

    /// Look up an output by id.
    pub fn find_output(&self, id: &str) -> Result<&DerivationOutput, DerivationError> {
        self.outputs
            .get(id)
            .ok_or_else(|| DerivationError::MissingOutput { id: id.to_string() })
    }

    /// Store paths of all outputs.
    pub fn output_paths(&self, store_dir: &StoreDir) -> Result<BTreeSet<StorePath>, DerivationError> {
        self.outputs
            .values()
            .map(|output| output.path(store_dir, &self.name))
            .collect()
    }

    /// Declared output ids.
    pub fn output_names(&self) -> BTreeSet<String> {
        self.outputs.keys().cloned().collect()
    }

    /// What a serialized copy of this derivation references: all input
    /// sources and input derivation paths. Outputs are deliberately not
    /// references.
    pub fn references(&self) -> BTreeSet<StorePath> {
        let mut refs = self.input_srcs.clone();
        refs.extend(self.input_drvs.keys().cloned());
        refs
    }

    /// The store path a serialized copy of this derivation would occupy:
    /// a text-type path over the canonical form, named `<name>.drv`.
    pub fn compute_store_path(&self, store_dir: &StoreDir) -> Result<StorePath, DerivationError> {
        let contents = self.unparse(store_dir, false, None)?;
        let name = format!("{}{}", self.name, DRV_EXTENSION);
        Ok(store_dir.compute_store_path_for_text(
            &name,
            contents.as_bytes(),
            &self.references(),
        )?)
    }
}

/// Whether `output` is selected by a wanted-output set; an empty set
/// selects everything.
pub fn want_output(output: &str, wanted: &BTreeSet<String>) -> bool {
    wanted.is_empty() || wanted.contains(output)
}

/// Placeholder string substituted for an output path that is not known
/// yet: `/` followed by the base-32 SHA-256 of `nix-output:<id>`.
pub fn hash_placeholder(output_name: &str) -> String {
    let digest = Hash::sha256(format!("nix-output:{}", output_name).as_bytes());
    format!("/{}", base32::encode(digest.as_bytes()))
}

/// Derivation name from a `.drv` store path name, extension stripped.
pub fn name_from_drv_name(file_name: &str) -> Result<String, DerivationError> {
    file_name
        .strip_suffix(DRV_EXTENSION)
        .map(str::to_string)
        .ok_or_else(|| DerivationError::NotADerivation {
            name: file_name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use alder_hash::HashAlgorithm;
    use alder_store_path::IngestionMethod;

    pub(crate) fn fixed_output_drv(name: &str, content: &[u8]) -> Derivation {
        let mut drv = Derivation {
            name: name.to_string(),
            platform: "x86_64-linux".to_string(),
            builder: "/bin/fetch".to_string(),
            ..Default::default()
        };
        drv.outputs.insert(
            "out".to_string(),
            DerivationOutput::Fixed(FixedOutputHash {
                method: IngestionMethod::Flat,
                hash: Hash::hash_bytes(HashAlgorithm::Sha256, content),
            }),
        );
        drv
    }

    #[test]
    fn fixed_output_detection_requires_single_out() {
        let mut drv = fixed_output_drv("foo", b"payload");
        assert!(drv.is_fixed_output());

        let out_path = drv
            .find_output("out")
            .unwrap()
            .path(&StoreDir::default(), "foo")
            .unwrap();
        drv.outputs.insert(
            "dev".to_string(),
            DerivationOutput::Intensional { path: out_path },
        );
        assert!(!drv.is_fixed_output());
    }

    #[test]
    fn intensional_only_is_not_fixed_output() {
        let path = StorePath::from_base_name("00bgd045z0d4icpbc2yyz4gx48ak44la-x").unwrap();
        let mut drv = Derivation {
            name: "x".to_string(),
            ..Default::default()
        };
        drv.outputs
            .insert("out".to_string(), DerivationOutput::Intensional { path });
        assert!(!drv.is_fixed_output());
    }

    #[test]
    fn builtin_builders_are_recognized() {
        let mut drv = fixed_output_drv("foo", b"x");
        drv.builder = "builtin:fetchurl".to_string();
        assert!(drv.is_builtin());
    }

    #[test]
    fn references_union_sources_and_input_drvs() {
        let src = StorePath::from_base_name("00bgd045z0d4icpbc2yyz4gx48ak44la-src").unwrap();
        let dep = StorePath::from_base_name("10bgd045z0d4icpbc2yyz4gx48ak44la-dep.drv").unwrap();

        let mut drv = fixed_output_drv("foo", b"x");
        drv.input_srcs.insert(src.clone());
        drv.input_drvs.insert(dep.clone(), ["out".to_string()].into());

        let refs = drv.references();
        assert!(refs.contains(&src));
        assert!(refs.contains(&dep));
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn missing_output_is_an_error() {
        let drv = fixed_output_drv("foo", b"x");
        assert!(matches!(
            drv.find_output("doc"),
            Err(DerivationError::MissingOutput { .. })
        ));
    }

    #[test]
    fn want_output_with_empty_set_selects_all() {
        let empty = BTreeSet::new();
        assert!(want_output("out", &empty));

        let narrowed: BTreeSet<String> = ["dev".to_string()].into();
        assert!(want_output("dev", &narrowed));
        assert!(!want_output("out", &narrowed));
    }

    #[test]
    fn hash_placeholder_is_stable_and_path_shaped() {
        let p = hash_placeholder("out");
        assert_eq!(p, hash_placeholder("out"));
        assert!(p.starts_with('/'));
        assert_eq!(p.len(), 1 + 52);
        assert_ne!(p, hash_placeholder("dev"));
    }

    #[test]
    fn drv_names_strip_the_extension() {
        assert_eq!(name_from_drv_name("hello-1.0.drv").unwrap(), "hello-1.0");
        assert!(name_from_drv_name("hello-1.0").is_err());
    }
}
