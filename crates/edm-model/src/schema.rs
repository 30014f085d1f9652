//! Target schema declaration.
//!
//! The schema is injected configuration: the engine never carries a built-in
//! table list. Several versions may be loaded side by side, one per tenant or
//! migration, and every confirmed mapping records the version it targets.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dna::PatternKind;
use crate::error::{EngineError, Result};

/// Semantic type of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Npi,
    Ssn,
    Email,
    Phone,
    Date,
    DateTime,
    Integer,
    Decimal,
    Boolean,
    Text,
    Name,
    Identifier,
    Code,
}

/// How well a source pattern fits a target semantic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PatternCompatibility {
    Incompatible,
    Compatible,
    Exact,
}

impl SemanticType {
    /// Compatibility of a profiled pattern with this type.
    ///
    /// An all-null column carries no evidence and is compatible with everything.
    pub fn compatibility(self, pattern: PatternKind) -> PatternCompatibility {
        use PatternCompatibility::{Compatible, Exact, Incompatible};
        use PatternKind as P;

        if pattern == P::Empty {
            return Compatible;
        }
        match (self, pattern) {
            (Self::Npi, P::Npi)
            | (Self::Ssn, P::Ssn)
            | (Self::Email, P::Email)
            | (Self::Phone, P::Phone)
            | (Self::Date, P::Date)
            | (Self::DateTime, P::DateTime)
            | (Self::Integer, P::Integer)
            | (Self::Decimal, P::Decimal)
            | (Self::Boolean, P::Boolean)
            | (Self::Text | Self::Name | Self::Code, P::Text)
            | (Self::Identifier, P::Text | P::Integer) => Exact,
            (Self::Npi | Self::Ssn | Self::Phone, P::Integer)
            | (Self::Date, P::DateTime)
            | (Self::DateTime, P::Date)
            | (Self::Decimal, P::Integer)
            | (Self::Boolean, P::Integer)
            | (Self::Code, P::Integer | P::Boolean)
            | (Self::Identifier, P::Npi | P::Ssn) => Compatible,
            (Self::Text, _) => Compatible,
            _ => Incompatible,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Npi => "npi",
            Self::Ssn => "ssn",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Date => "date",
            Self::DateTime => "date_time",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Name => "name",
            Self::Identifier => "identifier",
            Self::Code => "code",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub label: Option<String>,
    /// Alternative source names known to mean this column.
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl TargetColumn {
    pub fn new(semantic_type: SemanticType) -> Self {
        Self {
            semantic_type,
            required: false,
            unique: false,
            label: None,
            synonyms: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// Columns used to compare person-like records for deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
    /// Name parts, concatenated in order before comparison.
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl IdentityFields {
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.name
            .iter()
            .map(String::as_str)
            .chain(self.dob.as_deref())
            .chain(self.phone.as_deref())
            .chain(self.email.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetTable {
    #[serde(default)]
    pub label: Option<String>,
    pub columns: BTreeMap<String, TargetColumn>,
    /// Present when the table holds identities that can be deduplicated.
    #[serde(default)]
    pub identity: Option<IdentityFields>,
}

impl TargetTable {
    pub fn with_column(mut self, name: &str, column: TargetColumn) -> Self {
        self.columns.insert(name.to_string(), column);
        self
    }

    pub fn with_identity(mut self, identity: IdentityFields) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn required_columns(&self) -> impl Iterator<Item = (&String, &TargetColumn)> {
        self.columns.iter().filter(|(_, c)| c.required)
    }
}

/// Versioned `{table -> {column -> semantic type}}` declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub name: String,
    pub version: String,
    pub tables: BTreeMap<String, TargetTable>,
    /// SHA-256 of the declaration file, set by the loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl TargetSchema {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tables: BTreeMap::new(),
            fingerprint: None,
        }
    }

    pub fn with_table(mut self, name: &str, table: TargetTable) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    /// `name@version`, recorded on confirmed mappings.
    pub fn version_key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn table(&self, table: &str) -> Option<&TargetTable> {
        self.tables.get(table)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&TargetColumn> {
        self.tables.get(table)?.columns.get(column)
    }

    /// Iterates every `(table, column, definition)` triple.
    pub fn all_columns(&self) -> impl Iterator<Item = (&str, &str, &TargetColumn)> {
        self.tables.iter().flat_map(|(table, def)| {
            def.columns
                .iter()
                .map(move |(column, col)| (table.as_str(), column.as_str(), col))
        })
    }

    /// Checks structural consistency of the declaration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.version.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "target schema needs a name and a version".to_string(),
            ));
        }
        if self.tables.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "target schema {} declares no tables",
                self.version_key()
            )));
        }
        for (table_name, table) in &self.tables {
            if table.columns.is_empty() {
                return Err(EngineError::InvalidInput(format!(
                    "table '{table_name}' declares no columns"
                )));
            }
            if let Some(identity) = &table.identity {
                for column in identity.columns() {
                    if !table.columns.contains_key(column) {
                        return Err(EngineError::InvalidInput(format!(
                            "identity column '{column}' is not declared on table '{table_name}'"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_only_accepts_email_pattern() {
        assert_eq!(
            SemanticType::Email.compatibility(PatternKind::Email),
            PatternCompatibility::Exact
        );
        assert_eq!(
            SemanticType::Email.compatibility(PatternKind::Phone),
            PatternCompatibility::Incompatible
        );
    }

    #[test]
    fn text_accepts_anything() {
        for pattern in PatternKind::ALL {
            assert_ne!(
                SemanticType::Text.compatibility(pattern),
                PatternCompatibility::Incompatible
            );
        }
    }

    #[test]
    fn identity_columns_must_be_declared() {
        let schema = TargetSchema::new("clinic", "1").with_table(
            "patients",
            TargetTable::default()
                .with_column("last_name", TargetColumn::new(SemanticType::Name))
                .with_identity(IdentityFields {
                    name: vec!["last_name".into()],
                    dob: Some("birth_date".into()),
                    ..IdentityFields::default()
                }),
        );
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("birth_date"));
    }
}
