//! # Protocol Configuration & Constants
//!
//! Every magic number in upay lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong.
//!
//! Some of these values are part of the wire format (value pattern, secret
//! and hash lengths). Changing them after tokens are in circulation orphans
//! every token already printed on a stick, so choose wisely.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string of the token protocol.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Path prefix of every token authority endpoint.
pub const API_PREFIX: &str = "/api/v1.0";

// ---------------------------------------------------------------------------
// Token Values
// ---------------------------------------------------------------------------

/// Number of implied fraction digits in a token value. Amounts are counted
/// in cents; the decimal point only exists on the wire.
pub const VALUE_DECIMALS: u32 = 2;

/// Cents per whole currency unit.
pub const CENTS_PER_UNIT: u64 = 100;

/// Smallest value a single token may carry: 0.01.
pub const MIN_TOKEN_VALUE_CENTS: u64 = 1;

/// Largest value a single token may carry: 999.99. Three integer digits is
/// all the canonical `NNN.NN` form has room for.
pub const MAX_TOKEN_VALUE_CENTS: u64 = 99_999;

// ---------------------------------------------------------------------------
// Token Material
// ---------------------------------------------------------------------------

/// Bytes of CSPRNG output in a token secret.
pub const SECRET_LENGTH: usize = 32;

/// Hex characters in a rendered token secret.
pub const SECRET_HEX_LENGTH: usize = SECRET_LENGTH * 2;

/// SHA-512 digest length in bytes.
pub const HASH_LENGTH: usize = 64;

/// Hex characters in a rendered token hash. Also the width of the ledger's
/// primary key.
pub const HASH_HEX_LENGTH: usize = HASH_LENGTH * 2;

/// Separator between the fields of the hash preimage.
pub const HASH_FIELD_SEPARATOR: char = '%';

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits, the only length you should use.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// X25519 public key length in bytes.
pub const X25519_KEY_LENGTH: usize = 32;

/// BLAKE3 `derive_key` context for escrow encryption keys. Domain separation
/// keeps these keys from ever colliding with keys derived for anything else.
pub const ESCROW_KDF_CONTEXT: &str = "upay 2014-03-30 token escrow v1";

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// How far a token's creation time may drift from the authority clock.
/// Older tokens are stale and cannot be registered; this bounds how long a
/// client can sit on an unregistered token and with it the replay window.
pub const CLOCK_SKEW_TOLERANCE: Duration = Duration::from_secs(60);

/// Default timeout for a single call to the token authority.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Session Parameters
// ---------------------------------------------------------------------------

/// Attempts made to transform locked tokens back during a rollback.
pub const ROLLBACK_ATTEMPTS: u32 = 5;

/// Base backoff between rollback attempts. Grows linearly per attempt.
pub const ROLLBACK_BACKOFF: Duration = Duration::from_millis(200);

/// Attempts made to push a cash transform through when the authority's
/// answer is lost in transit. Each retry is preceded by a reconciliation read.
pub const CASH_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Request Limits
// ---------------------------------------------------------------------------

/// Maximum number of tokens per validate/transform list.
pub const MAX_TOKENS_PER_REQUEST: usize = 256;

/// Maximum number of values per create request.
pub const MAX_CREATE_VALUES: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_lengths_match_byte_lengths() {
        assert_eq!(SECRET_HEX_LENGTH, 64);
        assert_eq!(HASH_HEX_LENGTH, 128);
    }

    #[test]
    fn value_bounds_fit_canonical_form() {
        // NNN.NN holds at most 999.99.
        assert_eq!(MAX_TOKEN_VALUE_CENTS, 999 * CENTS_PER_UNIT + 99);
        assert!(MIN_TOKEN_VALUE_CENTS < MAX_TOKEN_VALUE_CENTS);
    }
}
