const TRUE_VALUES: &[&str] = &["true", "t", "yes", "y", "1"];
const FALSE_VALUES: &[&str] = &["false", "f", "no", "n", "0"];

/// Parses common boolean spellings, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
    let lowered = value.trim().to_ascii_lowercase();
    if TRUE_VALUES.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSE_VALUES.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

pub fn is_bool(value: &str) -> bool {
    parse_bool(value).is_some()
}
