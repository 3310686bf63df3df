//! Shared-secret check for the `X-API-Key` header.

use crate::common::error::{ServeError, ServeResult};

/// Compare two secrets without short-circuiting on the first differing byte.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accept the request only when `provided` matches the configured key.
pub fn check_api_key(provided: Option<&str>, expected: &str) -> ServeResult<()> {
    match provided {
        Some(key) if !expected.is_empty() && constant_time_compare(key, expected) => Ok(()),
        _ => Err(ServeError::Auth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_requires_equal_length_and_bytes() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secret2"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn missing_or_wrong_keys_are_rejected() {
        assert!(check_api_key(Some("k1"), "k1").is_ok());
        assert!(matches!(check_api_key(Some("k2"), "k1"), Err(ServeError::Auth)));
        assert!(matches!(check_api_key(None, "k1"), Err(ServeError::Auth)));
        assert!(check_api_key(Some(""), "").is_err());
    }
}
