//! Target schema loading.
//!
//! A declaration is a TOML or JSON file:
//!
//! ```toml
//! name = "clinic"
//! version = "2024.1"
//!
//! [tables.patients.columns.mrn]
//! semantic_type = "identifier"
//! required = true
//! unique = true
//! ```
//!
//! The loader records the SHA-256 of the file bytes as the schema fingerprint.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use edm_model::TargetSchema;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::hash::sha256_hex;

/// Environment variable overriding the schema directory.
pub const SCHEMAS_ENV_VAR: &str = "EDM_SCHEMAS_DIR";

/// Directory holding bundled schema declarations.
///
/// Resolution order:
/// 1. `EDM_SCHEMAS_DIR` environment variable
/// 2. `schemas/` directory relative to workspace root
pub fn schemas_root() -> PathBuf {
    if let Ok(root) = std::env::var(SCHEMAS_ENV_VAR) {
        return PathBuf::from(root);
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../schemas")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

fn format_of(path: &Path) -> Result<Format, ConfigError> {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Parses a declaration from text without touching the file system.
pub fn parse_target_schema(path: &Path, text: &str) -> Result<TargetSchema, ConfigError> {
    let mut schema: TargetSchema = match format_of(path)? {
        Format::Toml => toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?,
        Format::Json => serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?,
    };
    schema
        .validate()
        .map_err(|error| ConfigError::InvalidSchema {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
    schema.fingerprint = Some(sha256_hex(text.as_bytes()));
    Ok(schema)
}

/// Loads and validates a target schema declaration.
pub fn load_target_schema(path: &Path) -> Result<TargetSchema, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let schema = parse_target_schema(path, &text)?;
    info!(
        path = %path.display(),
        schema = %schema.version_key(),
        tables = schema.tables.len(),
        fingerprint = schema.fingerprint.as_deref().unwrap_or_default(),
        "loaded target schema"
    );
    Ok(schema)
}

/// Loads a declaration and checks it against a pinned fingerprint.
pub fn load_pinned_schema(path: &Path, expected_sha256: &str) -> Result<TargetSchema, ConfigError> {
    let schema = load_target_schema(path)?;
    let actual = schema.fingerprint.clone().unwrap_or_default();
    if !actual.eq_ignore_ascii_case(expected_sha256.trim()) {
        return Err(ConfigError::Sha256Mismatch {
            path: path.to_path_buf(),
            expected: expected_sha256.trim().to_string(),
            actual,
        });
    }
    Ok(schema)
}

/// Loaded schema versions keyed by `name@version`.
///
/// Lets migrations for different tenants target different versions side by side.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, TargetSchema>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `.toml` and `.json` declaration in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut catalog = Self::new();
        let entries = fs::read_dir(dir).map_err(|e| ConfigError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ConfigError::io(dir, e))?.path();
            if path.is_file() && format_of(&path).is_ok() {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            let schema = load_target_schema(&path)?;
            debug!(path = %path.display(), schema = %schema.version_key(), "catalogued schema");
            catalog.insert(schema);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, schema: TargetSchema) -> Option<TargetSchema> {
        self.schemas.insert(schema.version_key(), schema)
    }

    /// Looks up `name@version`.
    pub fn get(&self, version_key: &str) -> Option<&TargetSchema> {
        self.schemas.get(version_key)
    }

    /// Latest version of `name`, by version string order.
    pub fn latest(&self, name: &str) -> Option<&TargetSchema> {
        self.schemas
            .values()
            .filter(|s| s.name == name)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    pub fn version_keys(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_extension() {
        let error = parse_target_schema(Path::new("schema.yaml"), "").unwrap_err();
        assert!(matches!(error, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn identity_must_reference_declared_columns() {
        let text = r#"
            name = "clinic"
            version = "1"

            [tables.patients.columns.mrn]
            semantic_type = "identifier"

            [tables.patients.identity]
            name = ["first_name"]
        "#;
        let error = parse_target_schema(Path::new("clinic.toml"), text).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidSchema { .. }));
    }
}
