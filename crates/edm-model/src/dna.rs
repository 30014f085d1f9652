//! Source profile ("DNA") types produced by the profiler.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Pattern recognised in a column's sampled values.
///
/// Variants are declared in matcher priority order: when several matchers
/// clear the confidence floor, the earlier one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    /// National Provider Identifier (10 digits, Luhn-checked with the 80840 prefix).
    Npi,
    /// US Social Security Number (AAA-GG-SSSS).
    Ssn,
    Email,
    Phone,
    DateTime,
    Date,
    Integer,
    Decimal,
    Boolean,
    Text,
    /// Every sampled value was null.
    Empty,
}

impl PatternKind {
    pub const ALL: [PatternKind; 11] = [
        Self::Npi,
        Self::Ssn,
        Self::Email,
        Self::Phone,
        Self::DateTime,
        Self::Date,
        Self::Integer,
        Self::Decimal,
        Self::Boolean,
        Self::Text,
        Self::Empty,
    ];

    pub fn data_type(self) -> DataType {
        match self {
            Self::Npi | Self::Ssn => DataType::Identifier,
            Self::Email | Self::Phone | Self::Text => DataType::String,
            Self::DateTime => DataType::DateTime,
            Self::Date => DataType::Date,
            Self::Integer => DataType::Integer,
            Self::Decimal => DataType::Decimal,
            Self::Boolean => DataType::Boolean,
            Self::Empty => DataType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Npi => "NPI",
            Self::Ssn => "SSN",
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::DateTime => "DATE_TIME",
            Self::Date => "DATE",
            Self::Integer => "INTEGER",
            Self::Decimal => "DECIMAL",
            Self::Boolean => "BOOLEAN",
            Self::Text => "TEXT",
            Self::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage type derived from the winning pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Identifier,
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Unknown,
}

/// Statistical and pattern profile of one source column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDna {
    pub original_name: String,
    pub primary_pattern: PatternKind,
    /// Fraction of sampled values accepted by the winning matcher.
    pub pattern_confidence: f64,
    pub sample_values: Vec<String>,
    /// Fraction of rows with a missing value, in [0, 1].
    pub null_percentage: f64,
    /// Distinct non-null values over total rows, in [0, 1].
    pub unique_percentage: f64,
    /// Mean character length of non-null values.
    pub avg_length: f64,
    pub data_type_inferred: DataType,
}

/// Profile of an uploaded dataset. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDna {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,
    pub source_type: String,
    pub source_file: String,
    /// Version of the matcher table that produced the patterns.
    pub matcher_version: String,
    pub column_count: usize,
    pub row_count: usize,
    pub columns: Vec<ColumnDna>,
}

impl SourceDna {
    pub fn column(&self, name: &str) -> Option<&ColumnDna> {
        self.columns.iter().find(|c| c.original_name == name)
    }

    /// Counts columns per primary pattern.
    pub fn pattern_vector(&self) -> BTreeMap<PatternKind, usize> {
        let mut counts = BTreeMap::new();
        for column in &self.columns {
            *counts.entry(column.primary_pattern).or_insert(0) += 1;
        }
        counts
    }
}
