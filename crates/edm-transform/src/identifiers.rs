//! Checksum-validated and structured identifiers.

use std::sync::LazyLock;

use regex::Regex;

/// AAA-GG-SSSS, with or without dashes.
static SSN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{3})-?(\d{2})-?(\d{4})$").expect("Invalid SSN regex")
});

static SSN_DASHED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}-\d{2}-\d{4}$").expect("Invalid SSN regex"));

/// Card-issuer prefix prepended to an NPI before the Luhn check.
const NPI_PREFIX: &str = "80840";

fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (index, c) in digits.chars().rev().enumerate() {
        let Some(mut digit) = c.to_digit(10) else {
            return false;
        };
        if index % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    sum % 10 == 0
}

/// National Provider Identifier: 10 digits, first digit 1 or 2, Luhn-valid
/// with the `80840` prefix.
pub fn is_valid_npi(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.len() == 10
        && trimmed.chars().all(|c| c.is_ascii_digit())
        && trimmed.starts_with(['1', '2'])
        && luhn_valid(&format!("{NPI_PREFIX}{trimmed}"))
}

/// Computes the check digit for the first nine digits of an NPI.
pub fn npi_check_digit(first_nine: &str) -> Option<u32> {
    if first_nine.len() != 9 || !first_nine.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    (0..10).find(|d| luhn_valid(&format!("{NPI_PREFIX}{first_nine}{d}")))
}

/// Normalizes an SSN to AAA-GG-SSSS, rejecting numbers never issued
/// (area 000, 666 or 9xx; group 00; serial 0000).
pub fn normalize_ssn(value: &str) -> Option<String> {
    let caps = SSN_REGEX.captures(value.trim())?;
    let (area, group, serial) = (&caps[1], &caps[2], &caps[3]);
    if area == "000" || area == "666" || area.starts_with('9') {
        return None;
    }
    if group == "00" || serial == "0000" {
        return None;
    }
    Some(format!("{area}-{group}-{serial}"))
}

/// True for the dashed layout used when sniffing SSN columns.
pub fn is_formatted_ssn(value: &str) -> bool {
    let trimmed = value.trim();
    SSN_DASHED_REGEX.is_match(trimmed) && normalize_ssn(trimmed).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_npis_validate() {
        assert!(is_valid_npi("1234567893"));
        assert!(!is_valid_npi("1234567890"));
        assert!(!is_valid_npi("123456789"));
        assert!(!is_valid_npi("3234567893"));
    }

    #[test]
    fn check_digit_matches_validation() {
        assert_eq!(npi_check_digit("123456789"), Some(3));
    }

    #[test]
    fn ssn_normalizes_and_rejects_unissued() {
        assert_eq!(normalize_ssn("123456789").as_deref(), Some("123-45-6789"));
        assert_eq!(normalize_ssn("123-45-6789").as_deref(), Some("123-45-6789"));
        assert!(normalize_ssn("666-12-3456").is_none());
        assert!(normalize_ssn("123-00-4567").is_none());
        assert!(is_formatted_ssn("123-45-6789"));
        assert!(!is_formatted_ssn("123456789"));
    }
}
