//! Email address normalisation shared by members, senders and subscribers.

use thiserror::Error;

const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmailAddressError {
    #[error("email address is empty")]
    Empty,
    #[error("email address `{0}` is too long")]
    TooLong(String),
    #[error("email address `{0}` is malformed")]
    Malformed(String),
}

/// Trim and lowercase an address, rejecting anything without exactly one `@`
/// separating non-empty local and domain parts.
pub fn normalize_email(input: &str) -> Result<String, EmailAddressError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(EmailAddressError::Empty);
    }
    if trimmed.len() > MAX_EMAIL_LEN {
        return Err(EmailAddressError::TooLong(trimmed.to_string()));
    }

    let lowered = trimmed.to_lowercase();
    let mut parts = lowered.split('@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();

    if parts.next().is_some()
        || local.is_empty()
        || domain.is_empty()
        || lowered.chars().any(char::is_whitespace)
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(EmailAddressError::Malformed(trimmed.to_string()));
    }

    Ok(lowered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_trims() {
        assert_eq!(
            normalize_email("  Reader@Example.COM ").expect("valid"),
            "reader@example.com"
        );
    }

    #[test]
    fn rejects_missing_parts() {
        for input in ["@example.com", "reader@", "reader", "a@b@c", "a b@c.d", "a@.com"] {
            assert!(
                matches!(normalize_email(input), Err(EmailAddressError::Malformed(_))),
                "{input} should be rejected"
            );
        }
        assert_eq!(normalize_email("   "), Err(EmailAddressError::Empty));
    }
}
