//! Synonym groups for source and target column names.
//!
//! Built-in groups cover names that legacy exports commonly use for identity
//! and contact fields. Schema-declared synonyms extend them per target column.

use std::collections::{BTreeMap, BTreeSet};

use edm_model::TargetSchema;

use crate::utils::normalize_text;

const BUILTIN_GROUPS: &[&[&str]] = &[
    &["dob", "date of birth", "birth date", "birthdate", "birth dt", "bday"],
    &["phone", "phone number", "telephone", "tel", "mobile", "cell", "contact number"],
    &["email", "e mail", "email address", "mail"],
    &["first name", "given name", "fname", "forename"],
    &["last name", "surname", "family name", "lname"],
    &["npi", "npi number", "provider npi", "national provider identifier"],
    &["ssn", "social security number", "social security", "ss number"],
    &["mrn", "medical record number", "chart number", "patient number"],
    &["sex", "gender"],
    &["zip", "zip code", "postal code", "postcode"],
    &["address", "street address", "address line 1", "addr1"],
];

/// Normalized names known to mean each `table.column` target.
#[derive(Debug, Clone, Default)]
pub struct SynonymMap {
    targets: BTreeMap<String, BTreeSet<String>>,
}

fn target_key(table: &str, column: &str) -> String {
    format!("{table}.{column}")
}

fn builtin_group(name: &str) -> Option<&'static [&'static str]> {
    BUILTIN_GROUPS
        .iter()
        .copied()
        .find(|group| group.contains(&name))
}

impl SynonymMap {
    pub fn build(schema: &TargetSchema) -> Self {
        let mut targets = BTreeMap::new();
        for (table, column, def) in schema.all_columns() {
            let mut names = BTreeSet::new();
            let mut seeds = vec![normalize_text(column)];
            if let Some(label) = &def.label {
                seeds.push(normalize_text(label));
            }
            seeds.extend(def.synonyms.iter().map(|s| normalize_text(s)));
            for seed in seeds {
                if let Some(group) = builtin_group(&seed) {
                    names.extend(group.iter().map(|s| (*s).to_string()));
                }
                names.insert(seed);
            }
            targets.insert(target_key(table, column), names);
        }
        Self { targets }
    }

    /// True when `source_column` is a known name for the target.
    pub fn matches(&self, source_column: &str, table: &str, column: &str) -> bool {
        let normalized = normalize_text(source_column);
        let compact = normalized.replace(' ', "");
        self.targets
            .get(&target_key(table, column))
            .is_some_and(|names| {
                names.contains(&normalized)
                    || names.iter().any(|name| name.replace(' ', "") == compact)
            })
    }
}
