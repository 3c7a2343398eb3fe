//! Token secrets, token hashes, and the timestamp format they are built from.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;

use super::amount::Amount;
use super::TokenError;
use crate::config::{HASH_FIELD_SEPARATOR, HASH_HEX_LENGTH, HASH_LENGTH, SECRET_HEX_LENGTH, SECRET_LENGTH};
use crate::crypto::sha512_multi;

// ---------------------------------------------------------------------------
// TokenSecret
// ---------------------------------------------------------------------------

/// The bearer part of a token. Whoever knows it can spend the token.
///
/// There is deliberately no `Display` impl, and `Debug` prints nothing
/// useful, so a secret cannot end up in a log line by accident. Use
/// [`TokenSecret::expose_hex`] where the secret genuinely has to leave the
/// process (the wire format, escrow encryption).
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret([u8; SECRET_LENGTH]);

impl TokenSecret {
    /// 32 fresh bytes from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SECRET_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse 64 lowercase hex characters.
    ///
    /// The hash is taken over the lowercase rendering, so any other spelling
    /// of the same bytes would name a different ledger row.
    pub fn from_hex(s: &str) -> Result<Self, TokenError> {
        if s.len() != SECRET_HEX_LENGTH {
            return Err(TokenError::BadFormat(format!(
                "secret must be {} hex characters, got {}",
                SECRET_HEX_LENGTH,
                s.len()
            )));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(TokenError::BadFormat("secret must be lowercase hex".into()));
        }
        let mut bytes = [0u8; SECRET_LENGTH];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| TokenError::BadFormat(format!("secret is not hex: {e}")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LENGTH] {
        &self.0
    }

    /// Lowercase hex rendering of the secret.
    pub fn expose_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// TokenHash
// ---------------------------------------------------------------------------

/// SHA-512 over `value % secret % created`. Names a token without revealing
/// its secret, and is the primary key of the ledger.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenHash([u8; HASH_LENGTH]);

impl TokenHash {
    /// Derive the hash from the three canonical token fields.
    pub fn compute(value: Amount, secret: &TokenSecret, created: &DateTime<Utc>) -> Self {
        let value = value.to_canonical();
        let secret = secret.expose_hex();
        let created = format_created(created);
        let mut buf = [0u8; 4];
        let sep = HASH_FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes();

        Self(sha512_multi(&[
            value.as_bytes(),
            sep,
            secret.as_bytes(),
            sep,
            created.as_bytes(),
        ]))
    }

    pub fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// 128 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    pub fn from_hex(s: &str) -> Result<Self, TokenError> {
        if s.len() != HASH_HEX_LENGTH {
            return Err(TokenError::BadFormat(format!(
                "hash must be {} hex characters, got {}",
                HASH_HEX_LENGTH,
                s.len()
            )));
        }
        let mut bytes = [0u8; HASH_LENGTH];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| TokenError::BadFormat(format!("hash is not hex: {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({}...)", self.short())
    }
}

impl FromStr for TokenHash {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenHash::from_hex(s)
    }
}

// ---------------------------------------------------------------------------
// Creation timestamps
// ---------------------------------------------------------------------------

/// Current time truncated to whole seconds.
pub fn now_created() -> DateTime<Utc> {
    truncate_to_seconds(Utc::now())
}

/// Drop sub-second precision. Token timestamps only carry whole seconds.
pub fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0).single().unwrap_or(t)
}

/// Canonical rendering: `2024-01-01T00:00:00Z`.
pub fn format_created(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a creation timestamp.
///
/// Accepts RFC 3339 with any offset, or a naive `YYYY-MM-DDTHH:MM:SS`
/// taken as UTC. Fractional seconds are rejected: they would not survive
/// the canonical rendering and the hash would no longer match.
pub fn parse_created(s: &str) -> Result<DateTime<Utc>, TokenError> {
    let parsed = match DateTime::parse_from_rfc3339(s) {
        Ok(t) => t.with_timezone(&Utc),
        Err(_) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|e| TokenError::BadFormat(format!("bad created timestamp {s:?}: {e}")))?,
    };

    if parsed.timestamp_subsec_nanos() != 0 {
        return Err(TokenError::BadFormat(format!(
            "created timestamp {s:?} has fractional seconds"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_created() -> DateTime<Utc> {
        parse_created("2024-01-01T00:00:00Z").unwrap()
    }

    #[test]
    fn hash_matches_manual_preimage() {
        let secret = TokenSecret::from_bytes([7u8; SECRET_LENGTH]);
        let value = Amount::from_cents(1000);
        let hash = TokenHash::compute(value, &secret, &fixed_created());

        let preimage = format!("010.00%{}%2024-01-01T00:00:00Z", "07".repeat(32));
        assert_eq!(hash.as_bytes(), &crate::crypto::sha512(preimage.as_bytes()));
        assert_eq!(hash.to_hex().len(), HASH_HEX_LENGTH);
    }

    #[test]
    fn hash_depends_on_every_field() {
        let secret = TokenSecret::from_bytes([1u8; SECRET_LENGTH]);
        let base = TokenHash::compute(Amount::from_cents(100), &secret, &fixed_created());

        let other_value = TokenHash::compute(Amount::from_cents(101), &secret, &fixed_created());
        let other_secret = TokenHash::compute(
            Amount::from_cents(100),
            &TokenSecret::from_bytes([2u8; SECRET_LENGTH]),
            &fixed_created(),
        );
        let other_time = TokenHash::compute(
            Amount::from_cents(100),
            &secret,
            &parse_created("2024-01-01T00:00:01Z").unwrap(),
        );

        assert_ne!(base, other_value);
        assert_ne!(base, other_secret);
        assert_ne!(base, other_time);
    }

    #[test]
    fn secret_hex_roundtrip_and_validation() {
        let secret = TokenSecret::generate();
        let restored = TokenSecret::from_hex(&secret.expose_hex()).unwrap();
        assert_eq!(secret, restored);

        let upper = secret.expose_hex().to_uppercase();
        assert!(TokenSecret::from_hex(&upper).is_err());

        assert!(TokenSecret::from_hex("abc").is_err());
        assert!(TokenSecret::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = TokenSecret::generate();
        assert!(!format!("{:?}", secret).contains(&secret.expose_hex()));
    }

    #[test]
    fn hash_hex_roundtrip() {
        let hash = TokenHash::from_bytes([0xAB; HASH_LENGTH]);
        assert_eq!(hash.to_hex().parse::<TokenHash>().unwrap(), hash);
        assert!(TokenHash::from_hex("ab").is_err());
    }

    #[test]
    fn created_formats() {
        assert_eq!(format_created(&fixed_created()), "2024-01-01T00:00:00Z");
        assert_eq!(parse_created("2024-01-01T00:00:00").unwrap(), fixed_created());
        assert_eq!(parse_created("2024-01-01T01:00:00+01:00").unwrap(), fixed_created());
        assert!(parse_created("2024-01-01T00:00:00.5Z").is_err());
        assert!(parse_created("2024-01-01T00:00:00.250").is_err());
        assert!(parse_created("yesterday").is_err());
    }

    #[test]
    fn now_created_has_no_subseconds() {
        assert_eq!(now_created().timestamp_subsec_nanos(), 0);
    }
}
