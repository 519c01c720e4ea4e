//! The canonical `Derive(...)` text form.
//!
//! This is the on-disk `.drv` format and the preimage consumed by
//! derivation hashing. Emission order is strictly the sorted key order of
//! the underlying maps, so the same derivation always serializes to the
//! same bytes. Strings are double-quoted with C-style escapes for
//! `\n`, `\r`, `\t`, `\"` and `\\`; everything else passes through.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use alder_hash::Hash;
use alder_hash::HashAlgorithm;
use alder_store_path::FixedOutputHash;
use alder_store_path::IngestionMethod;
use alder_store_path::StoreDir;

use crate::Derivation;
use crate::DerivationError;
use crate::DerivationOutput;

impl Derivation {
    /// Serialize to canonical text.
    ///
    /// With `mask_outputs`, every output path and every environment
    /// variable named after an output becomes the empty string; this
    /// masked form is the self-referential proxy consumed by
    /// [`crate::hash_derivation_modulo`]. `actual_inputs`, when given,
    /// replaces the input-derivation map wholesale (keys are printed
    /// verbatim, not as store paths).
    pub fn unparse(
        &self,
        store_dir: &StoreDir,
        mask_outputs: bool,
        actual_inputs: Option<&BTreeMap<String, BTreeSet<String>>>,
    ) -> Result<String, DerivationError> {
        let mut s = String::with_capacity(4096);
        s.push_str("Derive([");

        let mut first = true;
        for (id, output) in &self.outputs {
            sep(&mut s, &mut first);
            s.push('(');
            print_unquoted(&mut s, id);
            s.push(',');
            if mask_outputs {
                print_unquoted(&mut s, "");
            } else {
                let path = output.path(store_dir, &self.name)?;
                print_unquoted(&mut s, &store_dir.print_path(&path));
            }
            match output {
                DerivationOutput::Fixed(fixed) => {
                    s.push(',');
                    print_unquoted(&mut s, &fixed.method_algo());
                    s.push(',');
                    print_unquoted(&mut s, &fixed.hash.to_base16());
                }
                DerivationOutput::Intensional { .. } => {
                    s.push(',');
                    print_unquoted(&mut s, "");
                    s.push(',');
                    print_unquoted(&mut s, "");
                }
            }
            s.push(')');
        }

        s.push_str("],[");
        first = true;
        match actual_inputs {
            Some(inputs) => {
                for (key, output_ids) in inputs {
                    sep(&mut s, &mut first);
                    s.push('(');
                    print_unquoted(&mut s, key);
                    s.push(',');
                    print_unquoted_list(&mut s, output_ids.iter().map(String::as_str));
                    s.push(')');
                }
            }
            None => {
                for (drv_path, output_ids) in &self.input_drvs {
                    sep(&mut s, &mut first);
                    s.push('(');
                    print_unquoted(&mut s, &store_dir.print_path(drv_path));
                    s.push(',');
                    print_unquoted_list(&mut s, output_ids.iter().map(String::as_str));
                    s.push(')');
                }
            }
        }

        s.push_str("],");
        let printed_srcs = store_dir.print_path_set(&self.input_srcs);
        print_unquoted_list(&mut s, printed_srcs.iter().map(String::as_str));

        s.push(',');
        print_unquoted(&mut s, &self.platform);
        s.push(',');
        print_quoted(&mut s, &self.builder);
        s.push(',');
        print_quoted_list(&mut s, self.args.iter().map(String::as_str));

        s.push_str(",[");
        first = true;
        for (key, value) in &self.env {
            sep(&mut s, &mut first);
            s.push('(');
            print_quoted(&mut s, key);
            s.push(',');
            if mask_outputs && self.outputs.contains_key(key) {
                print_quoted(&mut s, "");
            } else {
                print_quoted(&mut s, value);
            }
            s.push(')');
        }

        s.push_str("])");
        Ok(s)
    }
}

fn sep(s: &mut String, first: &mut bool) {
    if *first {
        *first = false;
    } else {
        s.push(',');
    }
}

fn print_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

// Store paths, ids and hashes never contain characters needing escapes.
fn print_unquoted(out: &mut String, s: &str) {
    out.push('"');
    out.push_str(s);
    out.push('"');
}

fn print_quoted_list<'a>(out: &mut String, items: impl Iterator<Item = &'a str>) {
    out.push('[');
    let mut first = true;
    for item in items {
        sep(out, &mut first);
        print_quoted(out, item);
    }
    out.push(']');
}

fn print_unquoted_list<'a>(out: &mut String, items: impl Iterator<Item = &'a str>) {
    out.push('[');
    let mut first = true;
    for item in items {
        sep(out, &mut first);
        print_unquoted(out, item);
    }
    out.push(']');
}

/// Parse canonical text back into a [`Derivation`]. `name` is the
/// derivation name (the `.drv` file name with its extension stripped).
pub fn parse_derivation(
    store_dir: &StoreDir,
    input: &str,
    name: &str,
) -> Result<Derivation, DerivationError> {
    let mut p = Parser::new(input);
    let mut drv = Derivation {
        name: name.to_string(),
        ..Default::default()
    };

    p.expect("Derive([")?;
    while !p.end_of_list()? {
        p.expect("(")?;
        let id = p.parse_string()?;
        p.expect(",")?;
        let path = p.parse_path_string()?;
        p.expect(",")?;
        let hash_algo = p.parse_string()?;
        p.expect(",")?;
        let hash = p.parse_string()?;
        p.expect(")")?;
        let output = output_from_fields(store_dir, &path, &hash_algo, &hash)?;
        drv.outputs.insert(id, output);
    }

    p.expect(",[")?;
    while !p.end_of_list()? {
        p.expect("(")?;
        let drv_path = store_dir.parse_path(&p.parse_path_string()?)?;
        p.expect(",[")?;
        let mut ids = BTreeSet::new();
        while !p.end_of_list()? {
            ids.insert(p.parse_string()?);
        }
        p.expect(")")?;
        drv.input_drvs.insert(drv_path, ids);
    }

    p.expect(",[")?;
    while !p.end_of_list()? {
        let path = p.parse_path_string()?;
        drv.input_srcs.insert(store_dir.parse_path(&path)?);
    }

    p.expect(",")?;
    drv.platform = p.parse_string()?;
    p.expect(",")?;
    drv.builder = p.parse_string()?;

    p.expect(",[")?;
    while !p.end_of_list()? {
        drv.args.push(p.parse_string()?);
    }

    p.expect(",[")?;
    while !p.end_of_list()? {
        p.expect("(")?;
        let key = p.parse_string()?;
        p.expect(",")?;
        let value = p.parse_string()?;
        p.expect(")")?;
        drv.env.insert(key, value);
    }

    p.expect(")")?;
    Ok(drv)
}

/// Classify a parsed output record: a non-empty `hashAlgo` makes it fixed
/// (the stored path is redundant and recomputed on demand), an empty one
/// makes it intensional.
fn output_from_fields(
    store_dir: &StoreDir,
    path: &str,
    hash_algo: &str,
    hash: &str,
) -> Result<DerivationOutput, DerivationError> {
    if hash_algo.is_empty() {
        return Ok(DerivationOutput::Intensional {
            path: store_dir.parse_path(path)?,
        });
    }

    let (method, algorithm) = parse_hash_algo(hash_algo)?;
    let hash = Hash::parse_untagged(algorithm, hash)
        .map_err(|e| DerivationError::Format { reason: e.to_string() })?;

    Ok(DerivationOutput::Fixed(FixedOutputHash { method, hash }))
}

/// Parse an `[r:]<algo>` field. Anything that is not exactly an optional
/// `r:` prefix followed by a known algorithm name is rejected.
pub fn parse_hash_algo(spec: &str) -> Result<(IngestionMethod, HashAlgorithm), DerivationError> {
    let (method, rest) = match spec.strip_prefix("r:") {
        Some(rest) => (IngestionMethod::Recursive, rest),
        None => (IngestionMethod::Flat, spec),
    };
    let algorithm: HashAlgorithm = rest
        .parse()
        .map_err(|_| DerivationError::InvalidHashAlgo { spec: spec.to_string() })?;
    Ok((method, algorithm))
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn fail(&self, reason: impl Into<String>) -> DerivationError {
        DerivationError::Format {
            reason: format!("{} at offset {}", reason.into(), self.pos),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<u8, DerivationError> {
        let c = self.peek().ok_or_else(|| self.fail("unexpected end of input"))?;
        self.pos += 1;
        Ok(c)
    }

    fn expect(&mut self, token: &str) -> Result<(), DerivationError> {
        if self.input[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.fail(format!("expected '{}'", token)))
        }
    }

    /// Consume a `,` (more items) or `]` (done) between list elements.
    fn end_of_list(&mut self) -> Result<bool, DerivationError> {
        match self.peek() {
            Some(b',') => {
                self.pos += 1;
                Ok(false)
            }
            Some(b']') => {
                self.pos += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(self.fail("unexpected end of input in list")),
        }
    }

    fn parse_string(&mut self) -> Result<String, DerivationError> {
        self.expect("\"")?;
        let mut out = Vec::new();
        loop {
            match self.next()? {
                b'"' => break,
                b'\\' => match self.next()? {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    other => out.push(other),
                },
                other => out.push(other),
            }
        }
        String::from_utf8(out).map_err(|_| self.fail("non-UTF-8 string"))
    }

    fn parse_path_string(&mut self) -> Result<String, DerivationError> {
        let s = self.parse_string()?;
        if !s.starts_with('/') {
            return Err(self.fail(format!("bad path '{}' in derivation", s)));
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alder_store_path::StorePath;

    use crate::tests::fixed_output_drv;

    fn sample_drv(store_dir: &StoreDir) -> Derivation {
        let fetch = fixed_output_drv("dep.tar.gz", b"remote bytes");
        let fetch_path = fetch.compute_store_path(store_dir).unwrap();

        let mut drv = Derivation {
            name: "hello-1.0".to_string(),
            platform: "x86_64-linux".to_string(),
            builder: "/bin/sh".to_string(),
            args: vec!["-e".to_string(), "builder.sh".to_string()],
            ..Default::default()
        };
        drv.input_drvs
            .insert(fetch_path, ["out".to_string()].into());
        drv.input_srcs.insert(
            StorePath::from_base_name("00bgd045z0d4icpbc2yyz4gx48ak44la-builder.sh").unwrap(),
        );
        drv.outputs.insert(
            "out".to_string(),
            DerivationOutput::Intensional {
                path: StorePath::from_base_name(
                    "10bgd045z0d4icpbc2yyz4gx48ak44la-hello-1.0",
                )
                .unwrap(),
            },
        );
        drv.env.insert("out".to_string(), "/nix/store/10bgd045z0d4icpbc2yyz4gx48ak44la-hello-1.0".to_string());
        drv.env.insert("with\nnewline".to_string(), "tab\there \"quoted\" back\\slash".to_string());
        drv
    }

    #[test]
    fn unparse_of_empty_derivation_is_minimal() {
        let drv = Derivation {
            name: "empty".to_string(),
            ..Default::default()
        };
        assert_eq!(
            drv.unparse(&StoreDir::default(), false, None).unwrap(),
            r#"Derive([],[],[],"","",[],[])"#
        );
    }

    #[test]
    fn unparse_parse_roundtrip() {
        let dir = StoreDir::default();
        let drv = sample_drv(&dir);

        let text = drv.unparse(&dir, false, None).unwrap();
        let parsed = parse_derivation(&dir, &text, "hello-1.0").unwrap();
        assert_eq!(parsed, drv);

        // And the text itself is a fixed point.
        assert_eq!(parsed.unparse(&dir, false, None).unwrap(), text);
    }

    #[test]
    fn unparse_is_deterministic() {
        let dir = StoreDir::default();
        let drv = sample_drv(&dir);
        assert_eq!(
            drv.unparse(&dir, false, None).unwrap(),
            drv.clone().unparse(&dir, false, None).unwrap()
        );
    }

    #[test]
    fn fixed_outputs_serialize_method_algo_and_hash() {
        let dir = StoreDir::default();
        let drv = fixed_output_drv("dep.tar.gz", b"remote bytes");
        let text = drv.unparse(&dir, false, None).unwrap();

        let hash = Hash::sha256(b"remote bytes");
        assert!(text.contains(&format!("\"sha256\",\"{}\"", hash.to_base16())));

        let parsed = parse_derivation(&dir, &text, "dep.tar.gz").unwrap();
        assert_eq!(parsed, drv);
    }

    #[test]
    fn masking_blanks_output_paths_and_env() {
        let dir = StoreDir::default();
        let drv = sample_drv(&dir);
        let masked = drv.unparse(&dir, true, None).unwrap();

        assert!(!masked.contains("10bgd045z0d4icpbc2yyz4gx48ak44la-hello-1.0"));
        // The env entry keyed by the output id is blanked, other env survives.
        assert!(masked.contains(r#"("out","")"#));
        assert!(masked.contains("tab\\there"));
    }

    #[test]
    fn actual_inputs_replace_the_input_drv_map() {
        let dir = StoreDir::default();
        let drv = sample_drv(&dir);

        let mut inputs = BTreeMap::new();
        inputs.insert(
            "0123456789abcdef".to_string(),
            ["out".to_string()].into_iter().collect::<BTreeSet<_>>(),
        );
        let text = drv.unparse(&dir, true, Some(&inputs)).unwrap();

        assert!(text.contains(r#"("0123456789abcdef",["out"])"#));
        assert!(!text.contains("dep.tar.gz.drv"));
    }

    #[test]
    fn escapes_roundtrip_through_parse() {
        let dir = StoreDir::default();
        let mut drv = fixed_output_drv("esc", b"x");
        drv.env.insert(
            "weird".to_string(),
            "line1\nline2\r\ttabbed \"quoted\" c:\\path".to_string(),
        );
        let text = drv.unparse(&dir, false, None).unwrap();
        let parsed = parse_derivation(&dir, &text, "esc").unwrap();
        assert_eq!(parsed, drv);
    }

    #[test]
    fn rejects_malformed_hash_algo() {
        assert!(parse_hash_algo("sha256").is_ok());
        assert!(parse_hash_algo("r:sha256").is_ok());
        assert!(matches!(
            parse_hash_algo("r:"),
            Err(DerivationError::InvalidHashAlgo { .. })
        ));
        assert!(parse_hash_algo("r:r:sha256").is_err());
        assert!(parse_hash_algo("sha4096").is_err());
        assert!(parse_hash_algo("R:sha256").is_err());
    }

    #[test]
    fn rejects_relative_paths() {
        let dir = StoreDir::default();
        let text = r#"Derive([],[],["relative/path"],"","",[],[])"#;
        assert!(parse_derivation(&dir, text, "x").is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let dir = StoreDir::default();
        let drv = sample_drv(&dir);
        let text = drv.unparse(&dir, false, None).unwrap();
        for cut in [5, text.len() / 2, text.len() - 1] {
            assert!(parse_derivation(&dir, &text[..cut], "hello-1.0").is_err());
        }
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;

        proptest! {
            #[test]
            fn arbitrary_env_and_args_roundtrip(
                env in prop::collection::btree_map(any::<String>(), any::<String>(), 0..6),
                args in prop::collection::vec(any::<String>(), 0..4),
            ) {
                let dir = StoreDir::default();
                let mut drv = fixed_output_drv("prop-drv", b"payload");
                drv.env = env;
                drv.args = args;

                let text = drv.unparse(&dir, false, None).unwrap();
                let parsed = parse_derivation(&dir, &text, "prop-drv").unwrap();
                prop_assert_eq!(&parsed, &drv);
                prop_assert_eq!(parsed.unparse(&dir, false, None).unwrap(), text);
            }
        }
    }
}
