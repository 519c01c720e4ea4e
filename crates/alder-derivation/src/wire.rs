//! Binary wire form of a derivation.
//!
//! Length-prefixed with the same padded framing as archives. The input
//! derivation map is not carried: by the time a derivation crosses the
//! wire its dependency graph has been resolved, so only outputs, input
//! sources, the builder invocation and the environment travel.

use std::io::Read;
use std::io::Write;

use alder_nar::wire;
use alder_store_path::StoreDir;

use crate::Derivation;
use crate::DerivationError;
use crate::DerivationOutput;
use crate::aterm;

/// Serialize the resolved ("basic") form of `drv` into `w`.
pub fn write_derivation<W: Write>(
    drv: &Derivation,
    store_dir: &StoreDir,
    w: &mut W,
) -> Result<(), DerivationError> {
    wire::write_u64(w, drv.outputs.len() as u64)?;
    for (id, output) in &drv.outputs {
        wire::write_str(w, id)?;
        let path = output.path(store_dir, &drv.name)?;
        wire::write_str(w, &store_dir.print_path(&path))?;
        let (algo, hash) = match output {
            DerivationOutput::Fixed(fixed) => (fixed.method_algo(), fixed.hash.to_base16()),
            DerivationOutput::Intensional { .. } => (String::new(), String::new()),
        };
        wire::write_str(w, &algo)?;
        wire::write_str(w, &hash)?;
    }

    let srcs = store_dir.print_path_set(&drv.input_srcs);
    wire::write_string_list(w, &srcs)?;

    wire::write_str(w, &drv.platform)?;
    wire::write_str(w, &drv.builder)?;
    wire::write_string_list(w, &drv.args)?;

    wire::write_u64(w, drv.env.len() as u64)?;
    for (key, value) in &drv.env {
        wire::write_str(w, key)?;
        wire::write_str(w, value)?;
    }

    Ok(())
}

/// Read a resolved derivation from `r`. `name` is supplied out of band
/// (it names the `.drv` file, which the wire form does not repeat).
pub fn read_derivation<R: Read>(
    r: &mut R,
    store_dir: &StoreDir,
    name: &str,
) -> Result<Derivation, DerivationError> {
    let mut drv = Derivation {
        name: name.to_string(),
        ..Default::default()
    };

    let output_count = wire::read_u64(r)?;
    for _ in 0..output_count {
        let id = wire::read_string(r)?;
        let path = wire::read_string(r)?;
        let hash_algo = wire::read_string(r)?;
        let hash = wire::read_string(r)?;

        let output = if hash_algo.is_empty() {
            DerivationOutput::Intensional {
                path: store_dir.parse_path(&path)?,
            }
        } else {
            let (method, algorithm) = aterm::parse_hash_algo(&hash_algo)?;
            let hash = alder_hash::Hash::parse_untagged(algorithm, &hash)
                .map_err(|e| DerivationError::Format { reason: e.to_string() })?;
            DerivationOutput::Fixed(alder_store_path::FixedOutputHash { method, hash })
        };
        drv.outputs.insert(id, output);
    }

    for src in wire::read_string_list(r)? {
        drv.input_srcs.insert(store_dir.parse_path(&src)?);
    }

    drv.platform = wire::read_string(r)?;
    drv.builder = wire::read_string(r)?;
    drv.args = wire::read_string_list(r)?;

    let env_count = wire::read_u64(r)?;
    for _ in 0..env_count {
        let key = wire::read_string(r)?;
        let value = wire::read_string(r)?;
        drv.env.insert(key, value);
    }

    Ok(drv)
}
