//! Candidate scoring and explainability.
//!
//! Confidence combines three signals:
//!
//! ```text
//! base       = (name * w_name + pattern * w_pattern) / (w_name + w_pattern)
//! confidence = base + history * w_history * (1 - base)
//! ```
//!
//! Hint penalties multiply `base` before precedent is applied. Incompatible
//! pattern/type pairs never reach the scorer.

use std::collections::BTreeSet;

use edm_model::{ColumnDna, PatternCompatibility, SignalWeights, TargetColumn};
use rapidfuzz::distance::jaro_winkler;

use crate::synonyms::SynonymMap;
use crate::utils::{core_tokens, jaccard, normalize_text, token_set};

const COMPATIBLE_PATTERN_SCORE: f64 = 0.6;
/// Applied when a unique target is fed by a column with repeated values.
const UNIQUENESS_PENALTY: f64 = 0.85;
const UNIQUE_RATIO_MIN: f64 = 0.9;
/// Applied when a required target is fed by a mostly-empty column.
const REQUIRED_NULL_PENALTY: f64 = 0.9;
const REQUIRED_NULL_RATIO_MAX: f64 = 0.5;

/// A component contributing to the final score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreComponent {
    /// Component name (e.g., "Name similarity").
    pub name: &'static str,
    /// Component value in [0, 1], or the multiplier for penalties.
    pub value: f64,
    /// Human-readable description.
    pub description: String,
}

/// Score for a single source-column / target-column pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub confidence: f64,
    pub name: f64,
    pub pattern: f64,
    pub history: f64,
    /// Breakdown of score components for explainability.
    pub components: Vec<ScoreComponent>,
}

impl CandidateScore {
    /// One-line human-readable explanation of the score.
    pub fn explain(&self) -> String {
        self.components
            .iter()
            .map(|c| format!("{}: {:.0}%", c.name, c.value * 100.0))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Reasons attached to suggestions, one per component.
    pub fn reasons(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|c| format!("{}: {:.0}% ({})", c.name, c.value * 100.0, c.description))
            .collect()
    }
}

/// Precedent found in a past migration for a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Precedent {
    pub migration_id: String,
    pub similarity: f64,
}

/// Name similarity in [0, 1] and the component that explains it.
pub fn name_similarity(
    source_column: &str,
    table: &str,
    target_column: &str,
    target: &TargetColumn,
    synonyms: &SynonymMap,
) -> ScoreComponent {
    if synonyms.matches(source_column, table, target_column) {
        return ScoreComponent {
            name: "Name similarity",
            value: 1.0,
            description: format!("'{source_column}' is a known name for {target_column}"),
        };
    }

    let normalized_source = normalize_text(source_column);
    let mut best = jaro_winkler::similarity(
        normalized_source.chars(),
        normalize_text(target_column).chars(),
    );
    if let Some(label) = &target.label {
        best = best.max(jaro_winkler::similarity(
            normalized_source.chars(),
            normalize_text(label).chars(),
        ));
    }

    let source_tokens = token_set(source_column);
    let mut target_tokens = token_set(target_column);
    if let Some(label) = &target.label {
        target_tokens.extend(token_set(label));
    }
    best = best.max(token_overlap(&source_tokens, &target_tokens));

    ScoreComponent {
        name: "Name similarity",
        value: best.clamp(0.0, 1.0),
        description: format!("'{source_column}' vs '{target_column}'"),
    }
}

/// Overlap of meaningful tokens; generic tokens only count when nothing else is shared.
fn token_overlap(source: &BTreeSet<String>, target: &BTreeSet<String>) -> f64 {
    let source_core = core_tokens(source);
    let target_core = core_tokens(target);
    if source_core.is_empty() && target_core.is_empty() {
        return jaccard(source, target);
    }
    jaccard(&source_core, &target_core)
}

pub fn pattern_score(compatibility: PatternCompatibility) -> f64 {
    match compatibility {
        PatternCompatibility::Exact => 1.0,
        PatternCompatibility::Compatible => COMPATIBLE_PATTERN_SCORE,
        PatternCompatibility::Incompatible => 0.0,
    }
}

/// Scores one compatible candidate.
#[allow(clippy::too_many_arguments)]
pub fn score_candidate(
    column: &ColumnDna,
    table: &str,
    target_column: &str,
    target: &TargetColumn,
    compatibility: PatternCompatibility,
    precedent: Option<&Precedent>,
    synonyms: &SynonymMap,
    weights: &SignalWeights,
) -> CandidateScore {
    let mut components = Vec::new();

    let name = name_similarity(&column.original_name, table, target_column, target, synonyms);
    let name_value = name.value;
    components.push(name);

    let pattern = pattern_score(compatibility);
    components.push(ScoreComponent {
        name: "Pattern compatibility",
        value: pattern,
        description: format!(
            "{} {} {}",
            column.primary_pattern,
            match compatibility {
                PatternCompatibility::Exact => "matches",
                _ => "is compatible with",
            },
            target.semantic_type
        ),
    });

    let weight_sum = weights.name + weights.pattern;
    let mut base = if weight_sum > 0.0 {
        (name_value * weights.name + pattern * weights.pattern) / weight_sum
    } else {
        name_value
    };

    if target.unique && column.unique_percentage < UNIQUE_RATIO_MIN {
        base *= UNIQUENESS_PENALTY;
        components.push(ScoreComponent {
            name: "Uniqueness penalty",
            value: UNIQUENESS_PENALTY,
            description: format!(
                "target is unique but only {:.0}% of values are distinct",
                column.unique_percentage * 100.0
            ),
        });
    }
    if target.required && column.null_percentage > REQUIRED_NULL_RATIO_MAX {
        base *= REQUIRED_NULL_PENALTY;
        components.push(ScoreComponent {
            name: "Missing values penalty",
            value: REQUIRED_NULL_PENALTY,
            description: format!(
                "target is required but {:.0}% of values are missing",
                column.null_percentage * 100.0
            ),
        });
    }

    let history = precedent.map_or(0.0, |p| p.similarity.clamp(0.0, 1.0));
    if let Some(precedent) = precedent {
        components.push(ScoreComponent {
            name: "Historical precedent",
            value: history,
            description: format!("confirmed in migration {}", precedent.migration_id),
        });
    }

    let confidence = base + history * weights.history.clamp(0.0, 1.0) * (1.0 - base);

    CandidateScore {
        confidence: confidence.clamp(0.0, 1.0),
        name: name_value,
        pattern,
        history,
        components,
    }
}
