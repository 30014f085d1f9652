//! File-system repository of confirmed migrations.
//!
//! Each confirmed migration is stored as `{migration_id}.json`. Stored
//! migrations feed the historical precedent signal of the mapping engine.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::history::HistoricalMigration;

/// Repository for storing and retrieving confirmed migrations.
#[derive(Debug, Clone)]
pub struct MigrationRepository {
    base_dir: PathBuf,
}

/// Metadata about a stored migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationMetadata {
    pub migration_id: String,
    pub source_file: String,
    pub schema_version: String,
    pub file_path: PathBuf,
    pub mapping_count: usize,
}

/// Confirmed migration with repository metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMigration {
    #[serde(flatten)]
    pub migration: HistoricalMigration,
    pub saved_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    /// Version of the storage format.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl StoredMigration {
    pub fn new(migration: HistoricalMigration) -> Self {
        Self {
            migration,
            saved_at: Some(Utc::now()),
            description: None,
            version: default_version(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl MigrationRepository {
    /// Opens a repository at `base_dir`, creating the directory when missing.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).with_context(|| {
            format!(
                "Failed to create migration repository: {}",
                base_dir.display()
            )
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn save(&self, migration: &HistoricalMigration) -> Result<PathBuf> {
        self.save_stored(&StoredMigration::new(migration.clone()))
    }

    pub fn save_stored(&self, stored: &StoredMigration) -> Result<PathBuf> {
        let path = self.path_for(&stored.migration.migration_id);
        let json = serde_json::to_string_pretty(stored).with_context(|| {
            format!(
                "Failed to serialize migration {}",
                stored.migration.migration_id
            )
        })?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write migration to {}", path.display()))?;
        Ok(path)
    }

    /// Returns `None` if no migration is stored under `migration_id`.
    pub fn load(&self, migration_id: &str) -> Result<Option<HistoricalMigration>> {
        Ok(self.load_stored(migration_id)?.map(|s| s.migration))
    }

    pub fn load_stored(&self, migration_id: &str) -> Result<Option<StoredMigration>> {
        let path = self.path_for(migration_id);
        if !path.exists() {
            return Ok(None);
        }
        read_stored(&path).map(Some)
    }

    /// Loads every stored migration. Unreadable files are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<HistoricalMigration>> {
        let mut migrations = Vec::new();
        for path in self.json_files()? {
            match read_stored(&path) {
                Ok(stored) => migrations.push(stored.migration),
                Err(error) => warn!(path = %path.display(), %error, "skipping stored migration"),
            }
        }
        migrations.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(migrations)
    }

    pub fn list(&self) -> Result<Vec<MigrationMetadata>> {
        let mut metadata = Vec::new();
        for path in self.json_files()? {
            let contents = fs::read_to_string(&path)?;
            if let Ok(stored) = serde_json::from_str::<StoredMigration>(&contents) {
                metadata.push(MigrationMetadata {
                    migration_id: stored.migration.migration_id.clone(),
                    source_file: stored.migration.source_file.clone(),
                    schema_version: stored.migration.schema_version.clone(),
                    file_path: path,
                    mapping_count: stored.migration.mappings.len(),
                });
            }
        }
        metadata.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(metadata)
    }

    pub fn delete(&self, migration_id: &str) -> Result<bool> {
        let path = self.path_for(migration_id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete migration: {}", path.display()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn exists(&self, migration_id: &str) -> bool {
        self.path_for(migration_id).exists()
    }

    fn path_for(&self, migration_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.json", normalize_id(migration_id)))
    }

    fn json_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.base_dir)
            .with_context(|| format!("Failed to read repository: {}", self.base_dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn read_stored(path: &Path) -> Result<StoredMigration> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read migration from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse migration from {}", path.display()))
}

/// Normalize an ID for use in filenames.
fn normalize_id(id: &str) -> String {
    id.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
