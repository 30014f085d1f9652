//! Durable JSON files.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use edm_model::{EngineError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

fn storage_error(operation: &str, path: &Path, error: impl std::fmt::Display) -> EngineError {
    EngineError::Storage {
        message: format!("failed to {operation} {}: {error}", path.display()),
    }
}

/// Writes `value` as pretty JSON through a temp file and rename, so readers
/// never observe a partial file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| storage_error("serialize", path, e))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| storage_error("create directory", parent, e))?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path).map_err(|e| storage_error("create", &temp_path, e))?;
    file.write_all(&bytes)
        .map_err(|e| storage_error("write", &temp_path, e))?;
    file.sync_all()
        .map_err(|e| storage_error("sync", &temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| storage_error("rename into", path, e))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
    Ok(())
}

/// Reads a JSON file, returning `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|e| storage_error("read", path, e))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| storage_error("parse", path, e))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let value = BTreeMap::from([("a".to_string(), 1u32)]);

        write_json_atomic(&path, &value).expect("write");
        let loaded: Option<BTreeMap<String, u32>> = read_json(&path).expect("read");
        assert_eq!(loaded, Some(value));
        assert!(!path.with_extension("json.tmp").exists());

        let missing: Option<BTreeMap<String, u32>> =
            read_json(&dir.path().join("missing.json")).expect("read missing");
        assert!(missing.is_none());
    }
}
