//! Pattern matcher table.
//!
//! Matchers run in declaration order. Bump [`MATCHER_VERSION`] whenever the
//! table or any predicate changes, since profiles are only reproducible for
//! the same version.

use edm_model::PatternKind;
use edm_transform::{boolean, datetime, email, identifiers, numeric, phone};

pub const MATCHER_VERSION: &str = "1.0.0";

pub struct PatternMatcher {
    pub kind: PatternKind,
    matches: fn(&str) -> bool,
}

impl PatternMatcher {
    pub fn matches(&self, value: &str) -> bool {
        (self.matches)(value)
    }
}

fn is_phone(value: &str) -> bool {
    phone::to_e164(value).is_some()
}

fn is_datetime(value: &str) -> bool {
    datetime::parse_datetime(value).is_some()
}

fn is_date(value: &str) -> bool {
    datetime::parse_date(value).is_some()
}

fn is_text(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Checksum-validated identifiers first, generic text last.
pub static MATCHERS: &[PatternMatcher] = &[
    PatternMatcher {
        kind: PatternKind::Npi,
        matches: identifiers::is_valid_npi,
    },
    PatternMatcher {
        kind: PatternKind::Ssn,
        matches: identifiers::is_formatted_ssn,
    },
    PatternMatcher {
        kind: PatternKind::Email,
        matches: email::is_email,
    },
    PatternMatcher {
        kind: PatternKind::Phone,
        matches: is_phone,
    },
    PatternMatcher {
        kind: PatternKind::DateTime,
        matches: is_datetime,
    },
    PatternMatcher {
        kind: PatternKind::Date,
        matches: is_date,
    },
    PatternMatcher {
        kind: PatternKind::Integer,
        matches: numeric::is_integer,
    },
    PatternMatcher {
        kind: PatternKind::Decimal,
        matches: numeric::is_decimal,
    },
    PatternMatcher {
        kind: PatternKind::Boolean,
        matches: boolean::is_bool,
    },
    PatternMatcher {
        kind: PatternKind::Text,
        matches: is_text,
    },
];

/// Picks the first matcher whose match rate reaches `floor`.
///
/// Returns the pattern and its match rate over `samples`. An empty sample
/// yields [`PatternKind::Empty`] with zero confidence.
pub fn classify<S: AsRef<str>>(samples: &[S], floor: f64) -> (PatternKind, f64) {
    if samples.is_empty() {
        return (PatternKind::Empty, 0.0);
    }
    let total = samples.len() as f64;
    for matcher in MATCHERS {
        let matched = samples
            .iter()
            .filter(|value| matcher.matches(value.as_ref()))
            .count();
        let confidence = matched as f64 / total;
        if confidence >= floor {
            return (matcher.kind, confidence);
        }
    }
    (PatternKind::Text, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_breaks_ties() {
        // Valid NPIs are also 10-digit integers; the NPI matcher runs first.
        assert_eq!(classify(&["1234567893"], 0.8).0, PatternKind::Npi);
        assert_eq!(classify(&["0", "1", "1"], 0.8).0, PatternKind::Integer);
        assert_eq!(classify(&["yes", "no", "Y"], 0.8).0, PatternKind::Boolean);
    }

    #[test]
    fn floor_is_inclusive() {
        let samples = ["a@b.org", "c@d.org", "e@f.org", "g@h.org", "nope"];
        assert_eq!(classify(&samples, 0.8), (PatternKind::Email, 0.8));
        assert_eq!(classify(&samples, 0.81).0, PatternKind::Text);
    }

    #[test]
    fn empty_samples_are_empty() {
        let samples: [&str; 0] = [];
        assert_eq!(classify(&samples, 0.8), (PatternKind::Empty, 0.0));
    }
}
