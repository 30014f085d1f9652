//! Execution options and engine configuration.

use serde::{Deserialize, Serialize};

/// Per-execution switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub enable_lineage_tracking: bool,
    pub create_pre_migration_snapshot: bool,
    pub enable_deduplication: bool,
    pub enable_quality_scoring: bool,
    pub enable_retry_logic: bool,
    /// Run transforms and validation without snapshots or writes.
    pub dry_run: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            enable_lineage_tracking: true,
            create_pre_migration_snapshot: true,
            enable_deduplication: true,
            enable_quality_scoring: true,
            enable_retry_logic: true,
            dry_run: false,
        }
    }
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            create_pre_migration_snapshot: false,
            ..Self::default()
        }
    }

    pub fn with_snapshot(mut self, enable: bool) -> Self {
        self.create_pre_migration_snapshot = enable;
        self
    }

    pub fn with_lineage(mut self, enable: bool) -> Self {
        self.enable_lineage_tracking = enable;
        self
    }

    pub fn with_deduplication(mut self, enable: bool) -> Self {
        self.enable_deduplication = enable;
        self
    }

    pub fn with_quality_scoring(mut self, enable: bool) -> Self {
        self.enable_quality_scoring = enable;
        self
    }

    pub fn with_retry(mut self, enable: bool) -> Self {
        self.enable_retry_logic = enable;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerSettings {
    /// Non-null values sampled per column.
    pub sample_size: usize,
    /// Minimum matched fraction for a pattern to win.
    pub pattern_floor: f64,
    /// Sample values kept on each column profile.
    pub kept_samples: usize,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            sample_size: 50,
            pattern_floor: 0.8,
            kept_samples: 5,
        }
    }
}

/// Weights of the three mapping signals.
///
/// `base = (name * w_name + pattern * w_pattern) / (w_name + w_pattern)` and
/// `confidence = base + history * w_history * (1 - base)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub name: f64,
    pub pattern: f64,
    pub history: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            name: 0.6,
            pattern: 0.4,
            history: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingSettings {
    pub weights: SignalWeights,
    /// Columns whose best candidate scores below this are UNMAPPED.
    pub min_confidence: f64,
    pub max_alternatives: usize,
    /// Minimum cosine similarity for a past migration to count as precedent.
    pub history_similarity_threshold: f64,
    /// Estimated accuracy required before auto-execution may be offered.
    pub auto_execute_min_accuracy: f64,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            min_confidence: 0.5,
            max_alternatives: 3,
            history_similarity_threshold: 0.75,
            auto_execute_min_accuracy: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupWeights {
    pub name: f64,
    pub dob: f64,
    pub phone: f64,
    pub email: f64,
}

impl Default for DedupWeights {
    fn default() -> Self {
        Self {
            name: 0.35,
            dob: 0.30,
            phone: 0.20,
            email: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub weights: DedupWeights,
    /// Pairs at or above this similarity become candidates.
    pub review_threshold: f64,
    /// Pairs at or above this similarity merge without review. Unset means
    /// every candidate goes to a human.
    pub auto_merge_threshold: Option<f64>,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            weights: DedupWeights::default(),
            review_threshold: 0.75,
            auto_merge_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub uniqueness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 1.0,
            accuracy: 1.0,
            consistency: 1.0,
            uniqueness: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub weights: QualityWeights,
    pub production_threshold: f64,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            production_threshold: 85.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub multiplier: u32,
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 30,
            multiplier: 2,
            max_delay_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Worker threads for row processing. Zero picks the available parallelism.
    pub worker_count: usize,
    /// Rows processed per resumable step.
    pub chunk_size: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            worker_count: 0,
            chunk_size: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Hours a snapshot remains eligible for rollback. Unset keeps it forever.
    pub retention_hours: Option<i64>,
    /// Directory for durable snapshot files. Unset keeps snapshots in memory.
    pub persist_dir: Option<std::path::PathBuf>,
}

/// Full engine configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub profiler: ProfilerSettings,
    pub mapping: MappingSettings,
    pub dedup: DedupSettings,
    pub quality: QualitySettings,
    pub retry: RetrySettings,
    pub executor: ExecutorSettings,
    pub snapshot: SnapshotSettings,
}
