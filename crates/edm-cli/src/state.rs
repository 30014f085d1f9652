//! On-disk state shared by successive `edm` invocations.
//!
//! ```text
//! <state-dir>/
//!   store.json      target tables
//!   executor.json   batches, retry queue, dedup candidates, lineage
//!   snapshots/      durable snapshots and the rollback log
//!   history/        confirmed migrations used as mapping precedent
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use edm_core::{ExecutorState, InMemoryStore, MigrationEngine, TargetStore, read_json, write_json_atomic};
use edm_map::MigrationRepository;
use edm_model::{EngineConfig, TargetSchema};
use tracing::debug;

const STORE_FILE: &str = "store.json";
const EXECUTOR_FILE: &str = "executor.json";
const SNAPSHOT_DIR: &str = "snapshots";
const HISTORY_DIR: &str = "history";

#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

/// An engine opened over a state directory, with the store it writes to.
#[derive(Debug)]
pub struct OpenedEngine {
    pub engine: MigrationEngine,
    pub store: Arc<InMemoryStore>,
    pub history: MigrationRepository,
}

impl StateDir {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create state dir: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    pub fn executor_path(&self) -> PathBuf {
        self.root.join(EXECUTOR_FILE)
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOT_DIR)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join(HISTORY_DIR)
    }

    pub fn load_store(&self) -> Result<InMemoryStore> {
        let path = self.store_path();
        InMemoryStore::load_json(&path).with_context(|| format!("load store: {}", path.display()))
    }

    pub fn load_executor_state(&self) -> Result<ExecutorState> {
        let path = self.executor_path();
        let state: Option<ExecutorState> =
            read_json(&path).with_context(|| format!("load executor state: {}", path.display()))?;
        Ok(state.unwrap_or_default())
    }

    /// Restores the engine. Snapshots persist under the state dir unless the
    /// configuration already names a directory.
    pub fn open_engine(&self, schema: TargetSchema, mut config: EngineConfig) -> Result<OpenedEngine> {
        if config.snapshot.persist_dir.is_none() {
            config.snapshot.persist_dir = Some(self.snapshot_dir());
        }
        let store = Arc::new(self.load_store()?);
        let state = self.load_executor_state()?;
        let history = MigrationRepository::new(self.history_dir())?;
        let precedents = history.load_all()?;
        debug!(
            batches = state.batches.len(),
            retry_items = state.retry_items.len(),
            precedents = precedents.len(),
            state_dir = %self.root.display(),
            "state restored"
        );
        let dyn_store: Arc<dyn TargetStore> = store.clone();
        let engine = MigrationEngine::with_state(schema, config, dyn_store, state, precedents)
            .context("open engine")?;
        Ok(OpenedEngine {
            engine,
            store,
            history,
        })
    }

    /// Writes tables and executor state back.
    pub fn save(&self, opened: &OpenedEngine) -> Result<()> {
        let store_path = self.store_path();
        opened
            .store
            .save_json(&store_path)
            .with_context(|| format!("save store: {}", store_path.display()))?;
        let executor_path = self.executor_path();
        write_json_atomic(&executor_path, &opened.engine.export_state())
            .with_context(|| format!("save executor state: {}", executor_path.display()))?;
        Ok(())
    }
}
