//! Semantic-type coercion of source cells into target cells.
//!
//! [`transform_value`] is the single entry point the executor uses per mapped
//! cell. It either returns the canonical target value together with the steps
//! applied, or the rule the value violated.

use edm_model::{CellValue, SemanticType, TargetColumn, TransformStep};
use thiserror::Error;

use crate::{boolean, datetime, email, identifiers, numeric, phone, text};

/// A value rejected by a declared rule. Permanent: never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{rule}: {message}")]
pub struct ValidationFailure {
    pub rule: &'static str,
    pub message: String,
}

impl ValidationFailure {
    fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    pub value: CellValue,
    pub steps: Vec<TransformStep>,
}

impl TransformOutcome {
    fn unchanged(value: CellValue) -> Self {
        Self {
            value,
            steps: Vec::new(),
        }
    }

    fn with_step(value: CellValue, rule_id: &str, detail: &str) -> Self {
        Self {
            value,
            steps: vec![TransformStep::new(rule_id, detail)],
        }
    }
}

/// Rejects missing values for required columns.
pub fn check_required(
    column: &TargetColumn,
    value: &CellValue,
) -> Result<(), ValidationFailure> {
    if column.required && value.is_null() {
        return Err(ValidationFailure::new(
            "required",
            "value is required but missing",
        ));
    }
    Ok(())
}

/// Coerces a source cell to the canonical form of `semantic`.
///
/// Missing values pass through as null; use [`check_required`] for presence.
pub fn transform_value(
    semantic: SemanticType,
    value: &CellValue,
) -> Result<TransformOutcome, ValidationFailure> {
    if value.is_null() {
        return Ok(TransformOutcome::unchanged(CellValue::Null));
    }

    match (semantic, value) {
        (SemanticType::Integer, CellValue::Number(n)) if numeric::is_exact_integer(*n) => {
            return Ok(TransformOutcome::unchanged(value.clone()));
        }
        (SemanticType::Decimal, CellValue::Number(_)) | (SemanticType::Boolean, CellValue::Bool(_)) => {
            return Ok(TransformOutcome::unchanged(value.clone()));
        }
        (SemanticType::Boolean, CellValue::Number(n)) if *n == 0.0 || *n == 1.0 => {
            return Ok(TransformOutcome::with_step(
                CellValue::Bool(*n == 1.0),
                "boolean.parse",
                "numeric flag converted to boolean",
            ));
        }
        _ => {}
    }

    let raw = value.as_text().unwrap_or_default();
    let raw = raw.as_ref();
    match semantic {
        SemanticType::Npi => {
            if identifiers::is_valid_npi(raw) {
                Ok(TransformOutcome::with_step(
                    CellValue::text(raw),
                    "npi.checksum",
                    "validated NPI Luhn checksum",
                ))
            } else {
                Err(ValidationFailure::new(
                    "npi.checksum",
                    "not a 10-digit NPI with a valid check digit",
                ))
            }
        }
        SemanticType::Ssn => identifiers::normalize_ssn(raw)
            .map(|ssn| {
                TransformOutcome::with_step(CellValue::Text(ssn), "ssn.format", "formatted as AAA-GG-SSSS")
            })
            .ok_or_else(|| ValidationFailure::new("ssn.format", "not a valid SSN")),
        SemanticType::Email => email::normalize_email(raw)
            .map(|address| {
                TransformOutcome::with_step(CellValue::Text(address), "email.normalize", "trimmed and lowercased")
            })
            .ok_or_else(|| ValidationFailure::new("email.format", "not a valid email address")),
        SemanticType::Phone => phone::to_e164(raw)
            .map(|number| {
                TransformOutcome::with_step(CellValue::Text(number), "phone.e164", "normalized to E.164")
            })
            .ok_or_else(|| {
                ValidationFailure::new("phone.e164", "cannot be normalized to E.164")
            }),
        SemanticType::Date => datetime::to_iso8601_date(raw)
            .map(|date| {
                TransformOutcome::with_step(CellValue::Text(date), "date.iso8601", "formatted as ISO 8601 date")
            })
            .ok_or_else(|| ValidationFailure::new("date.format", "unrecognized date")),
        SemanticType::DateTime => datetime::to_iso8601_datetime(raw)
            .map(|dt| {
                TransformOutcome::with_step(
                    CellValue::Text(dt),
                    "datetime.iso8601",
                    "formatted as ISO 8601 date-time",
                )
            })
            .ok_or_else(|| ValidationFailure::new("datetime.format", "unrecognized date-time")),
        SemanticType::Integer => {
            let n = numeric::parse_i64(raw)
                .ok_or_else(|| ValidationFailure::new("integer.format", "not an integer"))?;
            numeric::exact_f64(n)
                .map(|n| {
                    TransformOutcome::with_step(CellValue::Number(n), "integer.parse", "parsed as integer")
                })
                .ok_or_else(|| {
                    ValidationFailure::new("integer.range", "integer is too large to store exactly")
                })
        }
        SemanticType::Decimal => numeric::parse_f64(raw)
            .map(|n| {
                TransformOutcome::with_step(CellValue::Number(n), "decimal.parse", "parsed as decimal")
            })
            .ok_or_else(|| ValidationFailure::new("decimal.format", "not a number")),
        SemanticType::Boolean => boolean::parse_bool(raw)
            .map(|b| TransformOutcome::with_step(CellValue::Bool(b), "boolean.parse", "parsed as boolean"))
            .ok_or_else(|| ValidationFailure::new("boolean.format", "not a boolean")),
        SemanticType::Name => Ok(text_outcome(
            value,
            text::collapse_whitespace(raw),
            "name.whitespace",
        )),
        SemanticType::Code => Ok(text_outcome(value, raw.to_uppercase(), "code.uppercase")),
        SemanticType::Text | SemanticType::Identifier => {
            Ok(text_outcome(value, raw.to_string(), "text.trim"))
        }
    }
}

fn text_outcome(original: &CellValue, canonical: String, rule_id: &str) -> TransformOutcome {
    if matches!(original, CellValue::Text(text) if *text == canonical) {
        TransformOutcome::unchanged(CellValue::Text(canonical))
    } else {
        TransformOutcome::with_step(CellValue::Text(canonical), rule_id, "normalized text")
    }
}

/// True when a written value already has the canonical form of `semantic`.
///
/// Nulls count as canonical; completeness is measured separately.
pub fn is_canonical(semantic: SemanticType, value: &CellValue) -> bool {
    match value {
        CellValue::Null => true,
        CellValue::Number(n) => match semantic {
            SemanticType::Integer => numeric::is_exact_integer(*n),
            SemanticType::Decimal => n.is_finite(),
            _ => false,
        },
        CellValue::Bool(_) => semantic == SemanticType::Boolean,
        CellValue::Text(text) => match semantic {
            SemanticType::Npi => identifiers::is_valid_npi(text) && text.trim() == text,
            SemanticType::Ssn => identifiers::is_formatted_ssn(text) && text.trim() == text,
            SemanticType::Email => {
                email::normalize_email(text).is_some_and(|normalized| normalized == *text)
            }
            SemanticType::Phone => phone::is_e164(text),
            SemanticType::Date => datetime::is_iso8601_date(text),
            SemanticType::DateTime => datetime::is_iso8601_datetime(text),
            SemanticType::Integer | SemanticType::Decimal | SemanticType::Boolean => false,
            SemanticType::Name => text::collapse_whitespace(text) == *text,
            SemanticType::Code => text.trim() == text && text.to_uppercase() == *text,
            SemanticType::Text | SemanticType::Identifier => text.trim() == text,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_is_normalized_with_step() {
        let outcome = transform_value(SemanticType::Phone, &CellValue::text("(555) 123-4567"))
            .expect("phone");
        assert_eq!(outcome.value, CellValue::text("+15551234567"));
        assert_eq!(outcome.steps[0].rule_id, "phone.e164");
    }

    #[test]
    fn bad_email_fails_with_rule() {
        let failure = transform_value(SemanticType::Email, &CellValue::text("jane.at.example"))
            .unwrap_err();
        assert_eq!(failure.rule, "email.format");
    }

    #[test]
    fn nulls_pass_through_and_required_rejects() {
        let outcome = transform_value(SemanticType::Date, &CellValue::Null).expect("null");
        assert_eq!(outcome.value, CellValue::Null);
        let column = TargetColumn::new(SemanticType::Date).required();
        assert_eq!(
            check_required(&column, &CellValue::text("  ")).unwrap_err().rule,
            "required"
        );
    }

    #[test]
    fn integers_from_text_and_numbers() {
        let from_text = transform_value(SemanticType::Integer, &CellValue::text("1,200")).expect("int");
        assert_eq!(from_text.value, CellValue::Number(1200.0));
        let from_number = transform_value(SemanticType::Integer, &CellValue::Number(7.0)).expect("int");
        assert!(from_number.steps.is_empty());
        assert!(transform_value(SemanticType::Integer, &CellValue::Number(7.5)).is_err());
    }

    #[test]
    fn transformed_values_are_canonical() {
        for (semantic, raw) in [
            (SemanticType::Date, "03/07/1980"),
            (SemanticType::DateTime, "2024-01-01 10:00"),
            (SemanticType::Email, " Jane@Example.ORG "),
            (SemanticType::Ssn, "123456789"),
            (SemanticType::Name, " Mary   Smith "),
            (SemanticType::Code, "abc"),
            (SemanticType::Boolean, "Yes"),
        ] {
            let outcome = transform_value(semantic, &CellValue::text(raw)).expect(raw);
            assert!(is_canonical(semantic, &outcome.value), "{semantic} {raw}");
        }
        assert!(!is_canonical(SemanticType::Phone, &CellValue::text("555-123-4567")));
    }
}
