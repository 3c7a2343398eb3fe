//! # Hashing Utilities
//!
//! Two hash functions, two jobs:
//!
//! - **SHA-512** binds a token's value, secret and creation time into the
//!   128-hex identifier the ledger stores. The width is part of the wire
//!   format and the ledger schema, so it is not up for debate.
//!
//! - **BLAKE3** in `derive_key` mode turns raw Diffie-Hellman output into
//!   AES keys for secret escrow. Domain separated, so no output of it can
//!   ever be confused with a token hash.

use sha2::{Digest, Sha512};

use crate::config::{AES_KEY_LENGTH, HASH_LENGTH};

/// Compute the SHA-512 digest of the input as a fixed-size array.
///
/// # Example
///
/// ```
/// use upay_protocol::crypto::sha512;
///
/// let digest = sha512(b"upay");
/// assert_eq!(digest.len(), 64);
/// ```
pub fn sha512(data: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; HASH_LENGTH];
    output.copy_from_slice(&result);
    output
}

/// SHA-512 over several parts without building a temporary buffer.
pub fn sha512_multi(parts: &[&[u8]]) -> [u8; HASH_LENGTH] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; HASH_LENGTH];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Derive a 256-bit symmetric key from key material under a context string.
///
/// BLAKE3's `derive_key` mode uses an IV derived from the context, which
/// makes cross-context collisions impossible by construction.
pub fn derive_key(context: &str, parts: &[&[u8]]) -> [u8; AES_KEY_LENGTH] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_known_vector() {
        // SHA-512 of "abc" from FIPS 180-2.
        let hash = sha512(b"abc");
        assert_eq!(
            hex::encode(hash),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn multi_part_matches_concatenation() {
        let whole = sha512(b"002.00%abc%2024");
        let parts = sha512_multi(&[b"002.00", b"%", b"abc", b"%", b"2024"]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn derive_key_is_context_separated() {
        let a = derive_key("context a", &[b"material"]);
        let b = derive_key("context b", &[b"material"]);
        assert_ne!(a, b);
        assert_eq!(a, derive_key("context a", &[b"material"]));
    }
}
