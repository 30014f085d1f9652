//! Text normalization and tokenization for name matching.

use std::collections::BTreeSet;

/// Normalizes text for comparison by lowercasing and replacing separators with spaces.
pub fn normalize_text(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['_', '-', '.', '/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a name into normalized tokens.
///
/// camelCase boundaries and separators split tokens; common abbreviations fold
/// onto one spelling (`nbr` and `num` become `number`, `dt` becomes `date`).
pub fn token_set(raw: &str) -> BTreeSet<String> {
    let mut spaced = String::new();
    let mut prev_lower = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if prev_lower && ch.is_ascii_uppercase() {
                spaced.push(' ');
            }
            spaced.push(ch);
            prev_lower = ch.is_ascii_lowercase();
        } else {
            spaced.push(' ');
            prev_lower = false;
        }
    }

    let mut tokens = BTreeSet::new();
    for raw_token in spaced.split_whitespace() {
        let token = raw_token.to_ascii_lowercase();
        for part in split_suffixes(&token) {
            if let Some(normalized) = normalize_token(&part) {
                tokens.insert(normalized);
            }
        }
    }
    tokens
}

/// Tokens that carry meaning on their own.
pub fn core_tokens(tokens: &BTreeSet<String>) -> BTreeSet<String> {
    tokens
        .iter()
        .filter(|t| !is_generic_token(t))
        .cloned()
        .collect()
}

fn split_suffixes(token: &str) -> Vec<String> {
    const SUFFIXES: [&str; 6] = ["number", "date", "name", "code", "id", "num"];
    for suffix in SUFFIXES {
        if token.len() > suffix.len() + 1 && token.ends_with(suffix) {
            let base = &token[..token.len() - suffix.len()];
            return vec![base.to_string(), suffix.to_string()];
        }
    }
    vec![token.to_string()]
}

fn normalize_token(token: &str) -> Option<String> {
    if token.is_empty() || token.chars().all(|ch| ch.is_ascii_digit()) || is_stopword(token) {
        return None;
    }
    let mapped = match token {
        "num" | "nbr" | "no" | "nr" => "number",
        "dt" | "dte" => "date",
        "identifier" | "ident" => "id",
        "cd" => "code",
        "nm" => "name",
        "tel" | "telephone" => "phone",
        "addr" => "address",
        "fname" => "first",
        "lname" => "last",
        _ => token,
    };
    Some(mapped.to_string())
}

pub fn is_generic_token(token: &str) -> bool {
    matches!(
        token,
        "id" | "number" | "date" | "name" | "code" | "value" | "field" | "type"
    )
}

fn is_stopword(token: &str) -> bool {
    matches!(
        token,
        "of" | "and" | "the" | "to" | "for" | "in" | "on" | "at" | "by" | "a" | "an"
    )
}

/// Jaccard overlap of two token sets, in [0, 1].
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.union(b).count();
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_case_and_suffixes() {
        let tokens = token_set("patientDOB");
        assert!(tokens.contains("patient"));
        assert!(tokens.contains("dob"));
        assert_eq!(
            token_set("npi_number"),
            BTreeSet::from(["npi".to_string(), "number".to_string()])
        );
        assert_eq!(
            token_set("PhoneNbr"),
            BTreeSet::from(["phone".to_string(), "number".to_string()])
        );
    }

    #[test]
    fn generic_tokens_are_not_core() {
        let core = core_tokens(&token_set("npi_number"));
        assert_eq!(core, BTreeSet::from(["npi".to_string()]));
    }
}
