//! Identity deduplication over target tables.
//!
//! Records are compared on the identity fields declared by the target table:
//! name parts (normalized edit distance), date of birth (exact after ISO-8601
//! normalization), phone (digit-level) and email (domain-aware). The overall
//! similarity is the weighted mean over the fields present on both sides.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use edm_model::{
    BatchId, CandidateId, CellValue, DedupCandidate, DedupSettings, EngineError, FieldSimilarities,
    IdentityFields, MatchMethod, Record, Resolution, Result, TableData, TargetTable,
};
use edm_transform::{datetime, email, phone, text};
use tracing::{debug, info};

use crate::store::TargetStore;

/// Resolver recorded on candidates merged without review.
pub const AUTO_MERGE_RESOLVER: &str = "system:auto-merge";

/// Fraction of the total field weight that must be comparable on both records
/// before a pair is scored at all.
const MIN_COMPARED_WEIGHT_SHARE: f64 = 0.5;

fn poisoned() -> EngineError {
    EngineError::Storage {
        message: "dedup candidate lock poisoned".to_string(),
    }
}

fn cell_text<'a>(record: &'a Record, column: Option<&str>) -> Option<std::borrow::Cow<'a, str>> {
    record.get(column?).and_then(CellValue::as_text)
}

fn full_name(record: &Record, parts: &[String]) -> Option<String> {
    let joined = parts
        .iter()
        .filter_map(|part| cell_text(record, Some(part.as_str())))
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.trim().is_empty()).then_some(joined)
}

fn same_date(a: &str, b: &str) -> bool {
    match (datetime::to_iso8601_date(a), datetime::to_iso8601_date(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Per-field similarities of two records.
pub fn field_similarities(identity: &IdentityFields, a: &Record, b: &Record) -> FieldSimilarities {
    let name_similarity = match (full_name(a, &identity.name), full_name(b, &identity.name)) {
        (Some(x), Some(y)) => text::name_similarity(&x, &y),
        _ => None,
    };
    let dob = identity.dob.as_deref();
    let dob_match = match (cell_text(a, dob), cell_text(b, dob)) {
        (Some(x), Some(y)) => Some(same_date(&x, &y)),
        _ => None,
    };
    let phone_column = identity.phone.as_deref();
    let phone_similarity = match (cell_text(a, phone_column), cell_text(b, phone_column)) {
        (Some(x), Some(y)) => phone::similarity(&x, &y),
        _ => None,
    };
    let email_column = identity.email.as_deref();
    let email_similarity = match (cell_text(a, email_column), cell_text(b, email_column)) {
        (Some(x), Some(y)) => email::similarity(&x, &y),
        _ => None,
    };
    FieldSimilarities {
        name_similarity,
        dob_match,
        phone_similarity,
        email_similarity,
    }
}

/// Weighted mean of the present fields, or `None` when too little was
/// comparable.
pub fn overall_similarity(settings: &DedupSettings, fields: &FieldSimilarities) -> Option<f64> {
    let w = settings.weights;
    let signals = [
        (w.name, fields.name_similarity),
        (w.dob, fields.dob_match.map(|m| if m { 1.0 } else { 0.0 })),
        (w.phone, fields.phone_similarity),
        (w.email, fields.email_similarity),
    ];
    let total_weight: f64 = signals.iter().map(|(weight, _)| weight).sum();
    let (weighted, compared) = signals
        .iter()
        .filter_map(|(weight, value)| value.map(|v| (weight * v, *weight)))
        .fold((0.0, 0.0), |(sum, seen), (v, weight)| (sum + v, seen + weight));
    if total_weight <= 0.0 || compared < total_weight * MIN_COMPARED_WEIGHT_SHARE {
        return None;
    }
    Some((weighted / compared).clamp(0.0, 1.0))
}

/// What makes two records of a table the same entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupRules {
    pub identity: Option<IdentityFields>,
    /// Columns declared unique; equal values on two records are a conflict.
    pub unique_columns: Vec<String>,
}

impl DedupRules {
    pub fn for_table(table: &TargetTable) -> Self {
        Self {
            identity: table.identity.clone(),
            unique_columns: table
                .columns
                .iter()
                .filter(|(_, column)| column.unique)
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_none() && self.unique_columns.is_empty()
    }

    /// First unique column on which both records carry the same value.
    fn unique_conflict<'a>(&'a self, a: &Record, b: &Record) -> Option<&'a str> {
        self.unique_columns
            .iter()
            .find(|column| {
                match (cell_text(a, Some(column.as_str())), cell_text(b, Some(column.as_str()))) {
                    (Some(x), Some(y)) => x.eq_ignore_ascii_case(&y),
                    _ => false,
                }
            })
            .map(String::as_str)
    }
}

/// Records of one table flagged during a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSummary {
    pub compared_pairs: usize,
    pub flagged: Vec<DedupCandidate>,
    pub auto_merged: usize,
}

#[derive(Debug, Clone)]
pub struct DedupEngine {
    settings: DedupSettings,
    candidates: Arc<RwLock<Vec<DedupCandidate>>>,
}

impl DedupEngine {
    pub fn new(settings: DedupSettings) -> Self {
        Self::from_candidates(settings, Vec::new())
    }

    pub fn from_candidates(settings: DedupSettings, candidates: Vec<DedupCandidate>) -> Self {
        Self {
            settings,
            candidates: Arc::new(RwLock::new(candidates)),
        }
    }

    pub fn settings(&self) -> &DedupSettings {
        &self.settings
    }

    /// Compares each record in `incoming` against every other record of
    /// `table` and records a candidate for each pair at or above the review
    /// threshold. A shared value in a unique column is an identity conflict
    /// and always becomes a candidate with similarity 1.0.
    ///
    /// Record A of a pair is the one already in the table; when both arrived
    /// in this batch, A is the lower record id. Pairs that already have a
    /// candidate are not flagged again.
    pub fn scan(
        &self,
        batch_id: &BatchId,
        table: &str,
        rules: &DedupRules,
        incoming: &BTreeSet<String>,
        store: &dyn TargetStore,
        now: DateTime<Utc>,
    ) -> Result<ScanSummary> {
        let rows: TableData = store.read_table(table)?;
        let mut summary = ScanSummary::default();
        let mut seen: BTreeSet<(String, String)> = self
            .candidates
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|c| c.target_table == table)
            .map(|c| ordered_pair(&c.record_a_id, &c.record_b_id))
            .collect();
        let mut merged_away: BTreeSet<String> = BTreeSet::new();

        for new_id in incoming {
            let Some(new_record) = rows.get(new_id) else {
                continue;
            };
            for (other_id, other_record) in &rows {
                if merged_away.contains(new_id) {
                    break;
                }
                if other_id == new_id
                    || merged_away.contains(other_id)
                    || !seen.insert(ordered_pair(new_id, other_id))
                {
                    continue;
                }
                summary.compared_pairs += 1;
                let fields = rules
                    .identity
                    .as_ref()
                    .map(|identity| field_similarities(identity, new_record, other_record))
                    .unwrap_or_default();
                let conflict = rules.unique_conflict(new_record, other_record);
                let overall = if conflict.is_some() {
                    1.0
                } else {
                    match overall_similarity(&self.settings, &fields) {
                        Some(overall) if overall >= self.settings.review_threshold => overall,
                        _ => continue,
                    }
                };

                let new_is_a = incoming.contains(other_id) && new_id < other_id;
                let (a_id, a, b_id, b) = if new_is_a {
                    (new_id, new_record, other_id, other_record)
                } else {
                    (other_id, other_record, new_id, new_record)
                };
                let mut candidate = DedupCandidate {
                    candidate_id: CandidateId::generate(),
                    batch_id: batch_id.clone(),
                    target_table: table.to_string(),
                    record_a_id: a_id.clone(),
                    record_a_data: a.clone(),
                    record_b_id: b_id.clone(),
                    record_b_data: b.clone(),
                    overall_similarity: overall,
                    match_method: if overall >= 1.0 {
                        MatchMethod::Exact
                    } else {
                        MatchMethod::WeightedFuzzy
                    },
                    field_similarities: fields,
                    resolution: Resolution::Pending,
                    requires_human_review: true,
                    resolved_by: None,
                    resolved_at: None,
                    created_at: now,
                };

                let auto_merge = self
                    .settings
                    .auto_merge_threshold
                    .is_some_and(|threshold| overall >= threshold);
                if auto_merge {
                    candidate.requires_human_review = false;
                    apply_resolution(&candidate, Resolution::MergeA, store)?;
                    candidate.resolve(Resolution::MergeA, AUTO_MERGE_RESOLVER, now)?;
                    merged_away.insert(b_id.clone());
                    summary.auto_merged += 1;
                }
                debug!(
                    candidate_id = %candidate.candidate_id,
                    table,
                    overall,
                    unique_conflict = conflict.unwrap_or_default(),
                    auto_merge,
                    "flagged possible duplicate"
                );
                summary.flagged.push(candidate);
            }
        }

        if !summary.flagged.is_empty() {
            self.candidates
                .write()
                .map_err(|_| poisoned())?
                .extend(summary.flagged.iter().cloned());
        }
        info!(
            %batch_id,
            table,
            pairs = summary.compared_pairs,
            flagged = summary.flagged.len(),
            auto_merged = summary.auto_merged,
            "dedup scan finished"
        );
        Ok(summary)
    }

    /// Resolves a pending candidate and applies the merge to the target table.
    ///
    /// Only the first call succeeds; later calls fail with
    /// [`EngineError::AlreadyResolved`] and change nothing.
    pub fn resolve(
        &self,
        candidate_id: &str,
        resolution: Resolution,
        resolved_by: &str,
        store: &dyn TargetStore,
        now: DateTime<Utc>,
    ) -> Result<DedupCandidate> {
        let mut candidates = self.candidates.write().map_err(|_| poisoned())?;
        let slot = candidates
            .iter_mut()
            .find(|c| c.candidate_id.as_str() == candidate_id)
            .ok_or_else(|| EngineError::not_found("dedup candidate", candidate_id))?;

        let mut updated = slot.clone();
        updated.resolve(resolution, resolved_by, now)?;
        apply_resolution(&updated, resolution, store)?;
        *slot = updated.clone();

        info!(
            candidate_id,
            %resolution,
            resolved_by = updated.resolved_by.as_deref().unwrap_or_default(),
            "resolved duplicate candidate"
        );
        Ok(updated)
    }

    pub fn get(&self, candidate_id: &str) -> Option<DedupCandidate> {
        self.candidates
            .read()
            .ok()?
            .iter()
            .find(|c| c.candidate_id.as_str() == candidate_id)
            .cloned()
    }

    pub fn candidates(&self) -> Vec<DedupCandidate> {
        self.candidates.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn for_batch(&self, batch_id: &BatchId) -> Vec<DedupCandidate> {
        self.candidates()
            .into_iter()
            .filter(|c| &c.batch_id == batch_id)
            .collect()
    }

    pub fn pending_for_batch(&self, batch_id: &BatchId) -> Vec<DedupCandidate> {
        self.for_batch(batch_id)
            .into_iter()
            .filter(|c| c.resolution.is_pending())
            .collect()
    }

    /// Distinct records still flagged by an unresolved candidate of the batch.
    pub fn pending_record_count(&self, batch_id: &BatchId) -> usize {
        self.pending_for_batch(batch_id)
            .iter()
            .flat_map(|c| {
                [
                    (c.target_table.clone(), c.record_a_id.clone()),
                    (c.target_table.clone(), c.record_b_id.clone()),
                ]
            })
            .collect::<BTreeSet<_>>()
            .len()
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Folds the discarded record into the kept one: the kept record's missing
/// fields are filled from the other, then the other is removed.
fn apply_resolution(
    candidate: &DedupCandidate,
    resolution: Resolution,
    store: &dyn TargetStore,
) -> Result<()> {
    let table = candidate.target_table.as_str();
    let (keep_id, drop_id) = match resolution {
        Resolution::MergeA => (&candidate.record_a_id, &candidate.record_b_id),
        Resolution::MergeB => (&candidate.record_b_id, &candidate.record_a_id),
        Resolution::KeepBoth | Resolution::Pending => return Ok(()),
    };
    let kept = store
        .get(table, keep_id)?
        .ok_or_else(|| EngineError::not_found("record", format!("{table}/{keep_id}")))?;
    let dropped = store.get(table, drop_id)?.unwrap_or_default();

    let mut merged = kept;
    for (column, value) in dropped {
        let missing = merged.get(&column).is_none_or(CellValue::is_null);
        if missing && !value.is_null() {
            merged.insert(column, value);
        }
    }
    store.upsert(table, keep_id, merged)?;
    store.remove(table, drop_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn patient_rules() -> DedupRules {
        DedupRules {
            identity: Some(IdentityFields {
                name: vec!["first_name".to_string(), "last_name".to_string()],
                dob: Some("birth_date".to_string()),
                phone: Some("phone".to_string()),
                email: Some("email".to_string()),
            }),
            unique_columns: Vec::new(),
        }
    }

    fn patient(first: &str, last: &str, dob: &str, phone: &str) -> Record {
        Record::from([
            ("first_name".to_string(), CellValue::from_raw(first)),
            ("last_name".to_string(), CellValue::from_raw(last)),
            ("birth_date".to_string(), CellValue::from_raw(dob)),
            ("phone".to_string(), CellValue::from_raw(phone)),
            ("email".to_string(), CellValue::Null),
        ])
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .upsert("patients", "b:1", patient("Ana", "Silva", "1980-04-02", "+15551234567"))
            .expect("seed");
        store
            .upsert("patients", "b:2", patient("Ana", "Silva", "1980-04-02", "+15551234568"))
            .expect("seed");
        store
    }

    fn incoming() -> BTreeSet<String> {
        BTreeSet::from(["b:1".to_string(), "b:2".to_string()])
    }

    #[test]
    fn one_digit_phone_difference_goes_to_review() {
        let store = seeded();
        let engine = DedupEngine::new(DedupSettings::default());
        let batch = BatchId::new("b").expect("id");
        let summary = engine
            .scan(&batch, "patients", &patient_rules(), &incoming(), &store, Utc::now())
            .expect("scan");

        assert_eq!(summary.flagged.len(), 1);
        let candidate = &summary.flagged[0];
        assert_eq!(candidate.field_similarities.name_similarity, Some(1.0));
        assert_eq!(candidate.field_similarities.dob_match, Some(true));
        assert!(candidate.field_similarities.phone_similarity.expect("phone") < 1.0);
        assert!(candidate.overall_similarity < 1.0);
        assert!(candidate.requires_human_review);
        assert_eq!(candidate.resolution, Resolution::Pending);
        assert_eq!(candidate.record_a_id, "b:1");
        assert_eq!(engine.pending_record_count(&batch), 2);
    }

    #[test]
    fn second_resolution_is_rejected_and_changes_nothing() {
        let store = seeded();
        let engine = DedupEngine::new(DedupSettings::default());
        let batch = BatchId::new("b").expect("id");
        let summary = engine
            .scan(&batch, "patients", &patient_rules(), &incoming(), &store, Utc::now())
            .expect("scan");
        let id = summary.flagged[0].candidate_id.to_string();

        let resolved = engine
            .resolve(&id, Resolution::MergeA, "steward@clinic", &store, Utc::now())
            .expect("first resolve");
        assert_eq!(resolved.resolution, Resolution::MergeA);
        assert_eq!(store.row_count("patients"), 1);

        let error = engine
            .resolve(&id, Resolution::KeepBoth, "other@clinic", &store, Utc::now())
            .unwrap_err();
        assert!(matches!(error, EngineError::AlreadyResolved { .. }));
        let after = engine.get(&id).expect("candidate");
        assert_eq!(after.resolution, Resolution::MergeA);
        assert_eq!(after.resolved_by.as_deref(), Some("steward@clinic"));
    }

    #[test]
    fn auto_merge_only_when_threshold_is_set() {
        let store = seeded();
        let settings = DedupSettings {
            auto_merge_threshold: Some(0.95),
            ..DedupSettings::default()
        };
        let engine = DedupEngine::new(settings);
        let summary = engine
            .scan(
                &BatchId::new("b").expect("id"),
                "patients",
                &patient_rules(),
                &incoming(),
                &store,
                Utc::now(),
            )
            .expect("scan");
        assert_eq!(summary.auto_merged, 1);
        assert!(!summary.flagged[0].requires_human_review);
        assert_eq!(summary.flagged[0].resolved_by.as_deref(), Some(AUTO_MERGE_RESOLVER));
        assert_eq!(store.row_count("patients"), 1);
    }

    #[test]
    fn shared_unique_value_is_a_conflict() {
        let store = InMemoryStore::new();
        for (id, name) in [("old", "Dr. Ana Silva"), ("b:1", "Carlos Mendes")] {
            store
                .upsert(
                    "hc_staff",
                    id,
                    Record::from([
                        ("npi".to_string(), CellValue::text("1234567893")),
                        ("full_name".to_string(), CellValue::text(name)),
                    ]),
                )
                .expect("seed");
        }
        let rules = DedupRules {
            identity: None,
            unique_columns: vec!["npi".to_string()],
        };
        let engine = DedupEngine::new(DedupSettings::default());
        let summary = engine
            .scan(
                &BatchId::new("b").expect("id"),
                "hc_staff",
                &rules,
                &BTreeSet::from(["b:1".to_string()]),
                &store,
                Utc::now(),
            )
            .expect("scan");
        assert_eq!(summary.flagged.len(), 1);
        let candidate = &summary.flagged[0];
        assert_eq!(candidate.record_a_id, "old");
        assert_eq!(candidate.match_method, MatchMethod::Exact);
        assert!(candidate.requires_human_review);
    }

    #[test]
    fn too_few_comparable_fields_are_not_scored() {
        let fields = FieldSimilarities {
            email_similarity: Some(1.0),
            ..FieldSimilarities::default()
        };
        assert_eq!(overall_similarity(&DedupSettings::default(), &fields), None);
    }
}
