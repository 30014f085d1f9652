pub mod batch;
pub mod dedup;
pub mod dna;
pub mod error;
pub mod ids;
pub mod lineage;
pub mod mapping;
pub mod options;
pub mod quality;
pub mod retry;
pub mod review;
pub mod schema;
pub mod snapshot;
pub mod value;

pub use batch::{BatchStatus, MigrationBatch, RowFailure};
pub use dedup::{DedupCandidate, FieldSimilarities, MatchMethod, Resolution};
pub use dna::{ColumnDna, DataType, PatternKind, SourceDna};
pub use error::{EngineError, ErrorKind, Result};
pub use ids::{BatchId, CandidateId, RetryId, RollbackId, SessionId, SnapshotId};
pub use lineage::{LineageRecord, TransformStep};
pub use mapping::{
    AlternativeMapping, Confirmation, ConfirmedMapping, ConfirmedMappings, MappingSuggestion,
    UNMAPPED,
};
pub use options::{
    DedupSettings, DedupWeights, EngineConfig, ExecutionOptions, ExecutorSettings,
    MappingSettings, ProfilerSettings, QualitySettings, QualityWeights, RetrySettings,
    SignalWeights, SnapshotSettings,
};
pub use quality::{Grade, QualityScore};
pub use retry::{RetryQueueItem, RetryStatus};
pub use review::{ReviewAction, ReviewEvent, ReviewSession, ReviewState};
pub use schema::{
    IdentityFields, PatternCompatibility, SemanticType, TargetColumn, TargetSchema, TargetTable,
};
pub use snapshot::{MigrationSnapshot, RollbackEvent, SnapshotStatus, SnapshotType};
pub use value::{CellValue, Dataset, Record, SourceRow, TableData, ValueKind};
