//! Numeric parsing.

/// Parses a string as f64, returning None for invalid, empty or non-finite values.
///
/// Thousands separators are accepted: "1,234.5" parses as 1234.5.
pub fn parse_f64(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned = strip_thousands(trimmed)?;
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a string as i64, returning None for invalid or empty strings.
pub fn parse_i64(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    strip_thousands(trimmed)?.parse::<i64>().ok()
}

/// Largest magnitude an integer cell can hold without losing precision.
pub const MAX_EXACT_INTEGER: i64 = (1 << 53) - 1;

/// Converts to f64 only when the value round-trips exactly.
pub fn exact_f64(n: i64) -> Option<f64> {
    (n.unsigned_abs() <= MAX_EXACT_INTEGER as u64).then_some(n as f64)
}

/// True when `n` is a whole number inside the exact integer range.
pub fn is_exact_integer(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_EXACT_INTEGER as f64
}

/// Accepts well-placed thousands separators only ("1,234" but not "1,2,3").
fn strip_thousands(value: &str) -> Option<String> {
    if !value.contains(',') {
        return Some(value.to_string());
    }
    let (integer, fraction) = match value.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (value, None),
    };
    let unsigned = integer.trim_start_matches(['-', '+']);
    let mut groups = unsigned.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 {
        return None;
    }
    if !groups.all(|g| g.len() == 3) {
        return None;
    }
    let mut cleaned = integer.replace(',', "");
    if let Some(fraction) = fraction {
        cleaned.push('.');
        cleaned.push_str(fraction);
    }
    Some(cleaned)
}

pub fn is_integer(value: &str) -> bool {
    parse_i64(value).is_some()
}

pub fn is_decimal(value: &str) -> bool {
    parse_f64(value).is_some()
}

/// Formats a floating-point number as a string without trailing zeros.
pub fn format_numeric(v: f64) -> String {
    let s = format!("{v}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}
