//! Review session state machine.
//!
//! ```text
//! Draft -> SuggestionsGenerated -> UnderReview -> Confirmed -> Executing -> Completed
//! ```
//!
//! Suggestions may be regenerated until review starts. Edits are only accepted
//! while under review, and the executor only accepts the [`ConfirmedMappings`]
//! returned by [`ReviewSession::confirm`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::ids::SessionId;
use crate::mapping::{
    AlternativeMapping, Confirmation, ConfirmedMapping, ConfirmedMappings, MappingSuggestion,
    check_confirmable,
};
use crate::schema::TargetSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Draft,
    SuggestionsGenerated,
    UnderReview,
    Confirmed,
    Executing,
    Completed,
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::SuggestionsGenerated => "suggestions generated",
            Self::UnderReview => "under review",
            Self::Confirmed => "confirmed",
            Self::Executing => "executing",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ReviewAction {
    Override {
        target_table: String,
        target_column: String,
    },
    AcceptAlternative {
        target_table: String,
        target_column: String,
    },
    Skip,
    Reset,
}

/// Audit entry for a single reviewer edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub source_column: String,
    #[serde(flatten)]
    pub action: ReviewAction,
    pub reviewer: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSession {
    session_id: SessionId,
    state: ReviewState,
    schema_version: String,
    source_file: String,
    mappings: Vec<ConfirmedMapping>,
    events: Vec<ReviewEvent>,
}

fn require_identity(identity: &str, action: &'static str) -> Result<String> {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        return Err(EngineError::MissingApprover { action });
    }
    Ok(trimmed.to_string())
}

impl ReviewSession {
    pub fn new(schema: &TargetSchema, source_file: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::generate(),
            state: ReviewState::Draft,
            schema_version: schema.version_key(),
            source_file: source_file.into(),
            mappings: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> ReviewState {
        self.state
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn mappings(&self) -> &[ConfirmedMapping] {
        &self.mappings
    }

    pub fn events(&self) -> &[ReviewEvent] {
        &self.events
    }

    fn expect_state(&self, allowed: &[ReviewState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                from: self.state.to_string(),
                action,
            })
        }
    }

    /// Loads (or replaces) the engine's suggestions.
    pub fn attach_suggestions(&mut self, suggestions: Vec<MappingSuggestion>) -> Result<()> {
        self.expect_state(
            &[ReviewState::Draft, ReviewState::SuggestionsGenerated],
            "attach suggestions",
        )?;
        self.mappings = suggestions
            .into_iter()
            .map(ConfirmedMapping::accepted)
            .collect();
        self.events.clear();
        self.state = ReviewState::SuggestionsGenerated;
        Ok(())
    }

    pub fn begin_review(&mut self) -> Result<()> {
        self.expect_state(&[ReviewState::SuggestionsGenerated], "begin review")?;
        self.state = ReviewState::UnderReview;
        Ok(())
    }

    fn mapping_mut(&mut self, source_column: &str) -> Result<&mut ConfirmedMapping> {
        self.mappings
            .iter_mut()
            .find(|m| m.source_column() == source_column)
            .ok_or_else(|| EngineError::not_found("source column", source_column))
    }

    fn record(&mut self, source_column: &str, action: ReviewAction, reviewer: String) {
        self.events.push(ReviewEvent {
            source_column: source_column.to_string(),
            action,
            reviewer,
            at: Utc::now(),
        });
    }

    /// Points a column at a different target. The target must exist in `schema`.
    pub fn override_mapping(
        &mut self,
        schema: &TargetSchema,
        source_column: &str,
        target_table: &str,
        target_column: &str,
        reviewer: &str,
    ) -> Result<()> {
        self.expect_state(&[ReviewState::UnderReview], "override a mapping")?;
        let reviewer = require_identity(reviewer, "override")?;
        if schema.version_key() != self.schema_version {
            return Err(EngineError::InvalidInput(format!(
                "schema {} does not match session schema {}",
                schema.version_key(),
                self.schema_version
            )));
        }
        if schema.column(target_table, target_column).is_none() {
            return Err(EngineError::not_found(
                "target column",
                format!("{target_table}.{target_column}"),
            ));
        }

        let mapping = self.mapping_mut(source_column)?;
        retarget(
            mapping,
            AlternativeMapping {
                target_table: target_table.to_string(),
                target_column: target_column.to_string(),
                confidence: 1.0,
                reasons: vec![format!("Manually mapped by {reviewer}")],
            },
        );
        self.record(
            source_column,
            ReviewAction::Override {
                target_table: target_table.to_string(),
                target_column: target_column.to_string(),
            },
            reviewer,
        );
        Ok(())
    }

    /// Promotes the `index`-th alternative of the engine's suggestion.
    pub fn accept_alternative(
        &mut self,
        source_column: &str,
        index: usize,
        reviewer: &str,
    ) -> Result<()> {
        self.expect_state(&[ReviewState::UnderReview], "accept an alternative")?;
        let reviewer = require_identity(reviewer, "accept alternative")?;
        let mapping = self.mapping_mut(source_column)?;
        let original = mapping
            .original_suggestion
            .as_deref()
            .unwrap_or(&mapping.suggestion);
        let alternative = original
            .alternative_mappings
            .get(index)
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found("alternative", format!("{source_column}#{index}"))
            })?;
        let action = ReviewAction::AcceptAlternative {
            target_table: alternative.target_table.clone(),
            target_column: alternative.target_column.clone(),
        };
        retarget(mapping, alternative);
        self.record(source_column, action, reviewer);
        Ok(())
    }

    /// Excludes a column from execution.
    pub fn skip(&mut self, source_column: &str, reviewer: &str) -> Result<()> {
        self.expect_state(&[ReviewState::UnderReview], "skip a column")?;
        let reviewer = require_identity(reviewer, "skip")?;
        self.mapping_mut(source_column)?.user_skipped = true;
        self.record(source_column, ReviewAction::Skip, reviewer);
        Ok(())
    }

    /// Restores the engine's original suggestion for a column.
    pub fn reset(&mut self, source_column: &str, reviewer: &str) -> Result<()> {
        self.expect_state(&[ReviewState::UnderReview], "reset a column")?;
        let reviewer = require_identity(reviewer, "reset")?;
        let mapping = self.mapping_mut(source_column)?;
        if let Some(original) = mapping.original_suggestion.take() {
            mapping.suggestion = *original;
        }
        mapping.user_modified = false;
        mapping.user_skipped = false;
        self.record(source_column, ReviewAction::Reset, reviewer);
        Ok(())
    }

    /// Columns still marked UNMAPPED and not skipped.
    pub fn pending_columns(&self) -> Vec<&str> {
        self.mappings
            .iter()
            .filter(|m| !m.user_skipped && m.suggestion.is_unmapped())
            .map(ConfirmedMapping::source_column)
            .collect()
    }

    /// Explicit confirm action. Emits the executor input.
    pub fn confirm(&mut self, approver: &str) -> Result<ConfirmedMappings> {
        self.expect_state(&[ReviewState::UnderReview], "confirm mappings")?;
        let approver = require_identity(approver, "confirm")?;

        check_confirmable(&self.mappings)?;

        self.state = ReviewState::Confirmed;
        Ok(ConfirmedMappings::new(
            self.schema_version.clone(),
            self.source_file.clone(),
            Confirmation {
                confirmed_by: approver,
                confirmed_at: Utc::now(),
                session_id: self.session_id.clone(),
            },
            self.mappings.clone(),
        ))
    }

    pub fn mark_executing(&mut self) -> Result<()> {
        self.expect_state(&[ReviewState::Confirmed], "start execution")?;
        self.state = ReviewState::Executing;
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.expect_state(&[ReviewState::Executing], "complete execution")?;
        self.state = ReviewState::Completed;
        Ok(())
    }
}

fn retarget(mapping: &mut ConfirmedMapping, target: AlternativeMapping) {
    if mapping.original_suggestion.is_none() {
        mapping.original_suggestion = Some(Box::new(mapping.suggestion.clone()));
    }
    let suggestion = &mut mapping.suggestion;
    suggestion.target_table = target.target_table;
    suggestion.target_column = target.target_column;
    suggestion.confidence = target.confidence;
    suggestion.reasons = target.reasons;
    suggestion.alternative_mappings.clear();
    mapping.user_modified = true;
    mapping.user_skipped = false;
}
