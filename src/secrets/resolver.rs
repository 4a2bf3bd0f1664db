//! Logical secret path → backend path resolution.
//!
//! Templates reference secrets by a logical path. Before a backend is asked
//! for a value, the path is looked up (with the backend's prefix prepended)
//! in an override table loaded from a key-mapping file. This lets a
//! deployment relocate secrets without touching its templates.
//!
//! # Key-mapping file
//!
//! One record per line, two `;`-separated columns:
//!
//! ```text
//! prod/app/db/password;kv/data/prod-db
//! prod/app/api-key;kv/data/api
//! ```
//!
//! Rows that do not have exactly two columns are skipped.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::errors::{Error, Result};

/// Override table from `prefix + logical path` to backend path.
pub type KeyMapping = HashMap<String, String>;

/// Resolves `path` against `mapping` using `prefix`.
///
/// Returns `mapping[prefix + path]` when that key exists, else `path`
/// unchanged.
pub fn resolve(prefix: &str, mapping: &KeyMapping, path: &str) -> String {
    let candidate = format!("{}{}", prefix, path);
    match mapping.get(&candidate) {
        Some(mapped) => mapped.clone(),
        None => path.to_string(),
    }
}

/// Post-processing applied to a resolved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathSanitizer {
    /// Leave the resolved path untouched.
    #[default]
    None,
    /// Replace every character outside `[A-Za-z0-9-]` with `-`, the only
    /// characters Azure Key Vault accepts in secret names.
    AzureSecretName,
}

impl PathSanitizer {
    /// Applies the sanitizer to a resolved path.
    pub fn apply(&self, path: String) -> String {
        match self {
            Self::None => path,
            Self::AzureSecretName => path
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
                .collect(),
        }
    }
}

/// Per-backend resolution settings: prefix, key mapping and sanitizer.
#[derive(Debug, Clone, Default)]
pub struct KeyResolver {
    prefix: String,
    mapping: KeyMapping,
    sanitizer: PathSanitizer,
}

impl KeyResolver {
    pub fn new(prefix: impl Into<String>, mapping: KeyMapping) -> Self {
        Self { prefix: prefix.into(), mapping, sanitizer: PathSanitizer::None }
    }

    pub fn with_sanitizer(mut self, sanitizer: PathSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub fn set_mapping(&mut self, mapping: KeyMapping) {
        self.mapping = mapping;
    }

    pub fn set_sanitizer(&mut self, sanitizer: PathSanitizer) {
        self.sanitizer = sanitizer;
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn mapping(&self) -> &KeyMapping {
        &self.mapping
    }

    /// Resolves a logical path into the path sent to the backend.
    pub fn resolve(&self, path: &str) -> String {
        let resolved = resolve(&self.prefix, &self.mapping, path);
        if resolved != path {
            debug!(path = %path, resolved = %resolved, "Resolved secret path through key mapping");
        }
        self.sanitizer.apply(resolved)
    }
}

/// Loads a key-mapping file.
///
/// An empty `path` yields an empty mapping, so an unset `--*-mapping` flag
/// needs no special casing.
pub fn load_key_mapping(path: impl AsRef<Path>) -> Result<KeyMapping> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Ok(KeyMapping::new());
    }

    let file = File::open(path)
        .map_err(|e| Error::io(format!("failed to open {}", path.display()), e))?;
    let mapping = parse_key_mapping(file)
        .map_err(|e| Error::mapping(path.display().to_string(), e))?;

    debug!(path = %path.display(), entries = mapping.len(), "Loaded key mapping");
    Ok(mapping)
}

/// Parses `;`-delimited mapping records from a reader.
pub fn parse_key_mapping<R: Read>(reader: R) -> std::result::Result<KeyMapping, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut mapping = KeyMapping::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != 2 {
            continue;
        }
        mapping.insert(record[0].to_string(), record[1].to_string());
    }
    Ok(mapping)
}
