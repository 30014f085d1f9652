#![deny(unsafe_code)]

//! Mapping suggestion engine.
//!
//! Scores every compatible `(source column, target column)` pair on name
//! similarity, pattern compatibility and historical precedent, then emits a
//! ranked suggestion with alternatives per source column.

mod engine;
mod history;
mod repository;
mod score;
mod synonyms;
mod utils;

pub use engine::{ConfidenceLevel, ConfidenceThresholds, MappingEngine, MappingReport};
pub use history::{
    HistoricalMapping, HistoricalMigration, HistoryMatches, SimilarMigration, pattern_similarity,
};
pub use repository::{MigrationMetadata, MigrationRepository, StoredMigration};
pub use score::{CandidateScore, Precedent, ScoreComponent, name_similarity, score_candidate};
pub use synonyms::SynonymMap;
pub use utils::{normalize_text, token_set};
