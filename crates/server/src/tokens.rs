//! Credential generation and comparison.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Generates a URL-safe access token from 32 bytes of OS randomness.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a random password of `length` URL-safe characters.
pub fn generate_password(length: usize) -> String {
    // base64 yields 4 characters per 3 bytes; round up.
    let num_bytes = (length * 3) / 4 + 1;
    let mut bytes = vec![0u8; num_bytes];
    OsRng.fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
    encoded.truncate(length);
    encoded
}

/// Constant-time token comparison. Empty strings never match.
pub fn validate(expected: &str, provided: &str) -> bool {
    if expected.is_empty() || provided.is_empty() {
        return false;
    }
    bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        // 32 bytes -> 43 unpadded base64 characters.
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn password_has_requested_length() {
        for length in [1, 8, 18, 64] {
            assert_eq!(generate_password(length).len(), length);
        }
    }

    #[test]
    fn validate_accepts_equal_values() {
        let token = generate_token();
        assert!(validate(&token, &token.clone()));
    }

    #[test]
    fn validate_rejects_mismatch_and_empty() {
        assert!(!validate("abc", "abd"));
        assert!(!validate("abc", "abcd"));
        assert!(!validate("", ""));
        assert!(!validate("abc", ""));
        assert!(!validate("", "abc"));
    }
}
