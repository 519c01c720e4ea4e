//! Derivation hashing modulo fixed-output subgraphs.
//!
//! The hash that names input-addressed outputs must not change when a
//! fixed-output dependency is rebuilt differently (new mirror URL, new
//! builder) as long as its declared content hash is unchanged. So before
//! hashing a derivation's canonical text, every input derivation path is
//! replaced by the recursive hash of that derivation, and fixed-output
//! derivations collapse to a digest of `(method, algorithm, hash, path)`
//! alone.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use alder_hash::Hash;
use alder_store_path::StoreDir;
use alder_store_path::StorePath;
use parking_lot::Mutex;
use tracing::trace;

use crate::Derivation;
use crate::DerivationError;

/// Supplies input derivations during recursive hashing.
pub trait DerivationResolver {
    /// Load the derivation stored at `path`.
    fn load_derivation(&self, path: &StorePath) -> Result<Derivation, DerivationError>;
}

/// An in-memory derivation graph; the resolver used in tests and by
/// callers that have already materialized their closure.
#[derive(Default)]
pub struct InMemoryResolver {
    derivations: BTreeMap<StorePath, Derivation>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `drv` under its computed text path, returning that path.
    pub fn insert(
        &mut self,
        store_dir: &StoreDir,
        drv: Derivation,
    ) -> Result<StorePath, DerivationError> {
        let path = drv.compute_store_path(store_dir)?;
        self.derivations.insert(path.clone(), drv);
        Ok(path)
    }
}

impl DerivationResolver for InMemoryResolver {
    fn load_derivation(&self, path: &StorePath) -> Result<Derivation, DerivationError> {
        self.derivations
            .get(path)
            .cloned()
            .ok_or_else(|| DerivationError::MissingDerivation {
                path: path.base_name(),
            })
    }
}

/// Memoization table for [`hash_derivation_modulo`], keyed by derivation
/// path.
///
/// Purely a performance cache: entries are deterministic, so repeated
/// recomputation yields identical results. Lookups hold the lock only
/// briefly; recursive computation happens outside it, and inserts
/// tolerate a racing writer having filled the slot with the same value.
#[derive(Default)]
pub struct DrvHashes {
    memo: Mutex<HashMap<StorePath, Hash>>,
}

impl DrvHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, path: &StorePath) -> Option<Hash> {
        self.memo.lock().get(path).cloned()
    }

    fn insert(&self, path: StorePath, hash: Hash) {
        self.memo.lock().entry(path).or_insert(hash);
    }
}

/// The SHA-256 identifying `drv` for output-path derivation.
///
/// Fixed-output derivations collapse to
/// `fixed:out:<rec><algo>:<hex>:<printed output path>`; all others hash
/// their canonical text with input derivation paths substituted by their
/// recursive hashes. A cycle in the input graph (impossible for honestly
/// constructed derivations, whose paths depend on their inputs) is
/// reported rather than looping.
pub fn hash_derivation_modulo(
    store_dir: &StoreDir,
    drv: &Derivation,
    mask_outputs: bool,
    resolver: &dyn DerivationResolver,
    hashes: &DrvHashes,
) -> Result<Hash, DerivationError> {
    let mut visiting = BTreeSet::new();
    hash_modulo(store_dir, drv, mask_outputs, resolver, hashes, &mut visiting)
}

fn hash_modulo(
    store_dir: &StoreDir,
    drv: &Derivation,
    mask_outputs: bool,
    resolver: &dyn DerivationResolver,
    hashes: &DrvHashes,
    visiting: &mut BTreeSet<StorePath>,
) -> Result<Hash, DerivationError> {
    if let Some(fixed) = drv.fixed_output() {
        let output_path =
            store_dir.make_fixed_output_path(fixed.method, &fixed.hash, &drv.name)?;
        let preimage = format!(
            "fixed:out:{}:{}:{}",
            fixed.method_algo(),
            fixed.hash.to_base16(),
            store_dir.print_path(&output_path)
        );
        return Ok(Hash::sha256(preimage.as_bytes()));
    }

    let mut inputs2: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (drv_path, output_ids) in &drv.input_drvs {
        let hash = match hashes.lookup(drv_path) {
            Some(hash) => {
                trace!(drv = %drv_path, "derivation hash memo hit");
                hash
            }
            None => {
                if !visiting.insert(drv_path.clone()) {
                    return Err(DerivationError::CyclicReference {
                        path: drv_path.base_name(),
                    });
                }
                let loaded = resolver.load_derivation(drv_path)?;
                let hash = hash_modulo(store_dir, &loaded, false, resolver, hashes, visiting)?;
                visiting.remove(drv_path);
                hashes.insert(drv_path.clone(), hash.clone());
                hash
            }
        };
        inputs2.insert(hash.to_base16(), output_ids.clone());
    }

    let text = drv.unparse(store_dir, mask_outputs, Some(&inputs2))?;
    Ok(Hash::sha256(text.as_bytes()))
}
