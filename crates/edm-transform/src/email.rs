//! Email address validation and comparison.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("Invalid email regex")
});

/// Mailbox providers that ignore dots and `+tag` suffixes in the local part.
const DOT_INSENSITIVE_DOMAINS: &[&str] = &["gmail.com", "googlemail.com"];

pub fn is_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value.trim())
}

/// Trims and lowercases a valid address.
pub fn normalize_email(value: &str) -> Option<String> {
    let trimmed = value.trim();
    is_email(trimmed).then(|| trimmed.to_lowercase())
}

/// Canonical mailbox used to compare two addresses for identity.
///
/// Case is ignored everywhere; for providers that ignore dots and plus tags
/// those are dropped as well, and `googlemail.com` folds into `gmail.com`.
pub fn canonical_mailbox(value: &str) -> Option<String> {
    let normalized = normalize_email(value)?;
    let (local, domain) = normalized.rsplit_once('@')?;
    if DOT_INSENSITIVE_DOMAINS.contains(&domain) {
        let local = local.split('+').next().unwrap_or(local).replace('.', "");
        return Some(format!("{local}@gmail.com"));
    }
    Some(normalized)
}

/// Domain-aware similarity of two addresses in [0, 1].
///
/// Identical mailboxes score 1.0, the same local part at a different domain
/// scores 0.5, anything else 0.0.
pub fn similarity(a: &str, b: &str) -> Option<f64> {
    let a = canonical_mailbox(a)?;
    let b = canonical_mailbox(b)?;
    if a == b {
        return Some(1.0);
    }
    let local_a = a.split('@').next();
    let local_b = b.split('@').next();
    Some(if local_a == local_b { 0.5 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_addresses() {
        assert!(is_email("jane.doe@example.org"));
        assert!(is_email(" JANE@EXAMPLE.ORG "));
        assert!(!is_email("jane.doe@example"));
        assert!(!is_email("jane doe@example.org"));
        assert!(!is_email("@example.org"));
    }

    #[test]
    fn gmail_aliases_compare_equal() {
        assert_eq!(similarity("Jane.Doe+clinic@gmail.com", "janedoe@googlemail.com"), Some(1.0));
        assert_eq!(similarity("jane@work.org", "JANE@work.org"), Some(1.0));
        assert_eq!(similarity("jane@work.org", "jane@home.org"), Some(0.5));
        assert_eq!(similarity("jane@work.org", "not-an-email"), None);
    }
}
