//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for escrowed token secrets.
//!
//! GCM is unforgiving about nonce reuse, so nonces are 96 random bits from
//! the OS CSPRNG. Escrow keys are single-use anyway (every sealing derives a
//! fresh key from an ephemeral X25519 exchange), which makes a collision
//! irrelevant in practice.
//!
//! ## Wire format
//!
//! [`seal`] returns `nonce || ciphertext` as a single `Vec<u8>`: the first
//! 12 bytes are the nonce, the rest is ciphertext plus the 16-byte tag.
//! [`open`] expects the same layout.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// Deliberately vague: "wrong key" and "corrupted ciphertext" look the same
/// from the outside.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("ciphertext too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
///
/// The AAD is not encrypted and not part of the output; the caller must
/// present the same bytes to [`open`].
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`seal`] with the same key and AAD.
pub fn open(key: &[u8; AES_KEY_LENGTH], data: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key();
        let sealed = seal(&key, b"token secret", b"hash").unwrap();
        assert_eq!(sealed.len(), AES_NONCE_LENGTH + 12 + AES_TAG_LENGTH);
        assert_eq!(open(&key, &sealed, b"hash").unwrap(), b"token secret");
    }

    #[test]
    fn wrong_aad_fails() {
        let key = test_key();
        let sealed = seal(&key, b"secret", b"correct").unwrap();
        assert_eq!(
            open(&key, &sealed, b"wrong"),
            Err(EncryptionError::DecryptFailed)
        );
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_key();
        let sealed = seal(&key, b"secret", b"").unwrap();
        let mut wrong = test_key();
        wrong[0] ^= 0xFF;
        assert!(open(&wrong, &sealed, b"").is_err());
    }

    #[test]
    fn modified_ciphertext_fails() {
        let key = test_key();
        let mut sealed = seal(&key, b"secret", b"").unwrap();
        sealed[AES_NONCE_LENGTH] ^= 0xFF;
        assert!(open(&key, &sealed, b"").is_err());
    }

    #[test]
    fn too_short_is_rejected() {
        assert_eq!(
            open(&test_key(), &[0u8; 4], b""),
            Err(EncryptionError::CiphertextTooShort)
        );
    }

    #[test]
    fn nonces_are_unique() {
        let key = test_key();
        let a = seal(&key, b"m", b"").unwrap();
        let b = seal(&key, b"m", b"").unwrap();
        assert_ne!(&a[..AES_NONCE_LENGTH], &b[..AES_NONCE_LENGTH]);
    }
}
