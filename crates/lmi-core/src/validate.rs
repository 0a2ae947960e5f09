//! Registration input checks with user-facing messages.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{LmiError, LmiResult};

pub const MIN_PASSWORD_LEN: usize = 8;

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,4}$").ok())
        .as_ref()
}

/// Validate a registration request. The first failing check wins.
///
/// Presence checks run before the email shape check, so a short password
/// is reported ahead of a malformed address. Password length is counted in
/// bytes.
pub fn validate_registration(display_name: &str, email: &str, password: &str) -> LmiResult<()> {
    if display_name.is_empty() {
        return Err(LmiError::Validation("Display name cannot be empty".into()));
    }
    if email.is_empty() {
        return Err(LmiError::Validation("Invalid email format".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(LmiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    if !is_valid_email(email) {
        return Err(LmiError::Validation("Invalid email format".into()));
    }
    Ok(())
}

/// Lower-case addresses only, one `@`, dotted domain with a 2-4 letter TLD.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || !email_regex().is_some_and(|re| re.is_match(email)) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && !domain.starts_with('.')
        && !domain.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+tag@mail.example.io"));
    }

    #[test]
    fn rejects_bad_addresses() {
        for bad in [
            "",
            "alice",
            "alice@",
            "@example.com",
            "Alice@Example.com",
            "alice@example.technology",
            "alice..b@example.com",
            "alice@@example.com",
            ".alice@example.com",
        ] {
            assert!(!is_valid_email(bad), "accepted {bad:?}");
        }
    }

    #[test]
    fn registration_messages() {
        let err = validate_registration("", "a@b.com", "longenough").unwrap_err();
        assert_eq!(err.to_string(), "Display name cannot be empty");

        let err = validate_registration("bob", "nope", "longenough").unwrap_err();
        assert_eq!(err.to_string(), "Invalid email format");

        let err = validate_registration("bob", "bob@example.com", "short").unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 8 characters long");

        assert!(validate_registration("bob", "bob@example.com", "12345678").is_ok());
    }

    #[test]
    fn short_password_reported_before_bad_email() {
        let err = validate_registration("bob", "nope", "short").unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 8 characters long");

        let err = validate_registration("bob", "", "short").unwrap_err();
        assert_eq!(err.to_string(), "Invalid email format");
    }

    #[test]
    fn names_are_not_trimmed_and_passwords_count_bytes() {
        assert!(validate_registration("   ", "bob@example.com", "12345678").is_ok());

        // Four two-byte characters make eight bytes.
        assert!(validate_registration("bob", "bob@example.com", "éééé").is_ok());
        let err = validate_registration("bob", "bob@example.com", "ééé").unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 8 characters long");
    }
}
