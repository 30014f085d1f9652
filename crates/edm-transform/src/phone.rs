//! Phone number normalization to E.164.

use rapidfuzz::distance::levenshtein;

/// Extracts the ASCII digits of a value.
pub fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

fn has_only_phone_characters(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '.' | '(' | ')' | '+'))
}

/// Normalizes a phone number to E.164.
///
/// Accepted inputs:
/// - a leading `+` followed by 8 to 15 digits (international, kept as is);
/// - 10 digits with a 2-9 area code (North American, `+1` prefixed);
/// - 11 digits starting with `1` (North American with trunk prefix).
pub fn to_e164(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !has_only_phone_characters(trimmed) {
        return None;
    }
    if trimmed[1..].contains('+') {
        return None;
    }
    let digits = digits(trimmed);
    if trimmed.starts_with('+') {
        return ((8..=15).contains(&digits.len()) && !digits.starts_with('0'))
            .then(|| format!("+{digits}"));
    }
    match digits.len() {
        10 if !digits.starts_with(['0', '1']) => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') && !digits[1..].starts_with(['0', '1']) => {
            Some(format!("+{digits}"))
        }
        _ => None,
    }
}

pub fn is_e164(value: &str) -> bool {
    let Some(rest) = value.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&rest.len())
        && rest.chars().all(|c| c.is_ascii_digit())
        && !rest.starts_with('0')
}

/// Digit-level similarity in [0, 1] between two phone numbers.
///
/// Numbers are compared on their national significant digits, so `+1` and
/// trunk prefixes do not count as differences.
pub fn similarity(a: &str, b: &str) -> Option<f64> {
    let a = national_digits(a)?;
    let b = national_digits(b)?;
    let longest = a.len().max(b.len());
    if longest == 0 {
        return None;
    }
    let distance = levenshtein::distance(a.chars(), b.chars());
    Some(1.0 - distance as f64 / longest as f64)
}

fn national_digits(value: &str) -> Option<String> {
    let all = digits(value);
    if all.is_empty() {
        return None;
    }
    if all.len() == 11 && all.starts_with('1') {
        return Some(all[1..].to_string());
    }
    Some(all)
}
