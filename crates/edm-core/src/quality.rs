//! Composite data-quality scoring of a finished batch.

use chrono::{DateTime, Utc};
use edm_model::{BatchId, Grade, QualityScore, QualitySettings};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Raw counts gathered while a batch runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Required target cells seen across all processed rows.
    pub required_cells: u64,
    /// Required target cells that were missing.
    pub required_missing: u64,
    pub rows_valid: u64,
    pub rows_failed: u64,
    /// Non-null target cells checked for canonical form.
    pub cells_checked: u64,
    pub cells_canonical: u64,
    pub records_written: u64,
    /// Records still referenced by an unresolved duplicate candidate.
    pub pending_duplicate_records: u64,
}

impl QualityMetrics {
    pub fn merge(&mut self, other: &QualityMetrics) {
        self.required_cells += other.required_cells;
        self.required_missing += other.required_missing;
        self.rows_valid += other.rows_valid;
        self.rows_failed += other.rows_failed;
        self.cells_checked += other.cells_checked;
        self.cells_canonical += other.cells_canonical;
        self.records_written += other.records_written;
        self.pending_duplicate_records += other.pending_duplicate_records;
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        100.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// The four sub-scores, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubScores {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub uniqueness: f64,
}

impl SubScores {
    pub fn from_metrics(metrics: &QualityMetrics) -> Self {
        let flagged = metrics.pending_duplicate_records.min(metrics.records_written);
        Self {
            completeness: percentage(
                metrics.required_cells.saturating_sub(metrics.required_missing),
                metrics.required_cells,
            ),
            accuracy: percentage(metrics.rows_valid, metrics.rows_valid + metrics.rows_failed),
            consistency: percentage(metrics.cells_canonical, metrics.cells_checked),
            uniqueness: percentage(metrics.records_written - flagged, metrics.records_written),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    settings: QualitySettings,
}

impl QualityScorer {
    pub fn new(settings: QualitySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &QualitySettings {
        &self.settings
    }

    /// Weighted mean of the sub-scores.
    pub fn overall(&self, scores: &SubScores) -> f64 {
        let w = self.settings.weights;
        let total = w.completeness + w.accuracy + w.consistency + w.uniqueness;
        if total <= 0.0 {
            return 0.0;
        }
        let weighted = scores.completeness * w.completeness
            + scores.accuracy * w.accuracy
            + scores.consistency * w.consistency
            + scores.uniqueness * w.uniqueness;
        (weighted / total).clamp(0.0, 100.0)
    }

    /// Scores explicit sub-scores. `pending_duplicates` counts unresolved
    /// candidates; any of them blocks production readiness.
    pub fn score(
        &self,
        batch_id: &BatchId,
        scores: SubScores,
        pending_duplicates: usize,
        computed_at: DateTime<Utc>,
    ) -> QualityScore {
        let overall = self.overall(&scores);
        let ready = overall >= self.settings.production_threshold && pending_duplicates == 0;
        let score = QualityScore {
            batch_id: batch_id.clone(),
            overall_score: overall,
            completeness_score: scores.completeness,
            accuracy_score: scores.accuracy,
            consistency_score: scores.consistency,
            uniqueness_score: scores.uniqueness,
            grade: Grade::from_score(overall),
            recommendations: recommendations(&scores, pending_duplicates),
            ready_for_production: ready,
            computed_at,
        };
        info!(
            %batch_id,
            overall = score.overall_score,
            grade = %score.grade,
            ready_for_production = score.ready_for_production,
            "scored batch quality"
        );
        score
    }

    pub fn score_metrics(
        &self,
        batch_id: &BatchId,
        metrics: &QualityMetrics,
        pending_duplicates: usize,
        computed_at: DateTime<Utc>,
    ) -> QualityScore {
        self.score(
            batch_id,
            SubScores::from_metrics(metrics),
            pending_duplicates,
            computed_at,
        )
    }
}

/// Advice for the weakest sub-score, plus the duplicate backlog if any.
fn recommendations(scores: &SubScores, pending_duplicates: usize) -> Vec<String> {
    let ranked = [
        ("completeness", scores.completeness),
        ("accuracy", scores.accuracy),
        ("consistency", scores.consistency),
        ("uniqueness", scores.uniqueness),
    ];
    let mut advice = Vec::new();
    if let Some((name, value)) = ranked
        .iter()
        .copied()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, value)| *value < 100.0)
    {
        let text = match name {
            "completeness" => "Fill in missing required fields at the source before re-running",
            "accuracy" => "Review the failed rows and correct values that break validation rules",
            "consistency" => "Normalize source formats (dates, phones, emails) ahead of migration",
            _ => "Resolve flagged duplicate records",
        };
        advice.push(format!("{text} ({name} {value:.1}%)"));
    }
    if pending_duplicates > 0 {
        advice.push(format!(
            "{pending_duplicates} duplicate candidate(s) await review before production use"
        ));
    }
    advice
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: f64) -> SubScores {
        SubScores {
            completeness: value,
            accuracy: value,
            consistency: value,
            uniqueness: value,
        }
    }

    #[test]
    fn production_threshold_is_inclusive() {
        let scorer = QualityScorer::default();
        let batch = BatchId::new("batch-q").expect("id");
        let at_threshold = scorer.score(&batch, uniform(85.0), 0, Utc::now());
        assert!(at_threshold.ready_for_production);
        assert_eq!(at_threshold.grade, Grade::BPlus);

        let below = scorer.score(&batch, uniform(84.99), 0, Utc::now());
        assert!(!below.ready_for_production);
        assert_eq!(below.grade, Grade::B);
    }

    #[test]
    fn pending_duplicates_block_production() {
        let scorer = QualityScorer::default();
        let score = scorer.score(&BatchId::new("b").expect("id"), uniform(99.0), 1, Utc::now());
        assert!(!score.ready_for_production);
        assert_eq!(score.grade.as_str(), "A+");
    }

    #[test]
    fn metrics_map_onto_sub_scores() {
        let metrics = QualityMetrics {
            required_cells: 100,
            required_missing: 10,
            rows_valid: 49,
            rows_failed: 1,
            cells_checked: 200,
            cells_canonical: 200,
            records_written: 49,
            pending_duplicate_records: 0,
        };
        let scores = SubScores::from_metrics(&metrics);
        assert_eq!(scores.completeness, 90.0);
        assert_eq!(scores.accuracy, 98.0);
        assert_eq!(scores.consistency, 100.0);
        assert_eq!(scores.uniqueness, 100.0);
    }

    #[test]
    fn recommendation_targets_weakest_score() {
        let scores = SubScores {
            completeness: 92.0,
            accuracy: 70.0,
            consistency: 99.0,
            uniqueness: 100.0,
        };
        insta::assert_debug_snapshot!(recommendations(&scores, 0), @r#"
        [
            "Review the failed rows and correct values that break validation rules (accuracy 70.0%)",
        ]
        "#);
    }
}
