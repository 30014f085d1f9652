//! Free-text and personal-name helpers.

use rapidfuzz::distance::levenshtein;

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercases a name and drops punctuation, keeping single spaces.
pub fn normalize_name(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&cleaned)
}

/// Normalized edit-distance similarity of two names, in [0, 1].
pub fn name_similarity(a: &str, b: &str) -> Option<f64> {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let longest = a.chars().count().max(b.chars().count());
    let distance = levenshtein::distance(a.chars(), b.chars());
    Some(1.0 - distance as f64 / longest as f64)
}
