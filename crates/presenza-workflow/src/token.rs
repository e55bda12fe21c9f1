//! Signing-token generation.
//!
//! Tokens are unguessable single-use identifiers that recipients present to
//! resolve a request. The format is `att-<base36 millis>-<seg>-<seg>`: the
//! timestamp prefix keeps tokens roughly sortable while the two random
//! alphanumeric segments carry the entropy. The unique index on
//! `signing_requests.token` remains the authoritative uniqueness backstop.

use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};

/// Generates a fresh signing token for a request issued at `issued_at`.
pub fn generate(issued_at: DateTime<Utc>) -> String {
    let millis = u64::try_from(issued_at.timestamp_millis()).unwrap_or(0);
    format!("att-{}-{}-{}", base36(millis), random_segment(), random_segment())
}

fn random_segment() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(crate::TOKEN_SEGMENT_LEN)
        .map(char::from)
        .collect()
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn token_has_expected_shape() {
        let issued = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let token = generate(issued);
        let parts: Vec<&str> = token.split('-').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "att");
        assert!(!parts[1].is_empty());
        assert!(parts[1].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(parts[2].len(), crate::TOKEN_SEGMENT_LEN);
        assert_eq!(parts[3].len(), crate::TOKEN_SEGMENT_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(parts[3].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn timestamp_prefix_is_base36_of_millis() {
        let issued = DateTime::from_timestamp_millis(35).unwrap();
        let token = generate(issued);
        assert_eq!(token.split('-').nth(1), Some("z"));

        let epoch = DateTime::from_timestamp_millis(0).unwrap();
        let token = generate(epoch);
        assert_eq!(token.split('-').nth(1), Some("0"));
    }

    #[test]
    fn tokens_are_unique_across_a_large_batch() {
        let issued = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let tokens: HashSet<String> = (0..1000).map(|_| generate(issued)).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
