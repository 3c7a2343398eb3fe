//! # Secret Escrow
//!
//! Seals small payloads (token secrets) to a long-term X25519 public key so
//! they can travel through untrusted channels such as a collector queue or a
//! log, and only the holder of the matching private key can recover them.
//!
//! ## Construction
//!
//! 1. Generate an ephemeral X25519 keypair.
//! 2. Diffie-Hellman against the recipient's public key.
//! 3. Derive the AES key with BLAKE3 over `shared || ephemeral_pub || recipient_pub`.
//! 4. AES-256-GCM seal with caller supplied associated data.
//!
//! Output layout: `ephemeral_pub(32) || nonce(12) || ciphertext || tag(16)`.

use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::encryption::{self, EncryptionError};
use super::hash::derive_key;
use crate::config::{ESCROW_KDF_CONTEXT, X25519_KEY_LENGTH};

/// Long-term private key of an escrow recipient.
#[derive(Clone)]
pub struct EscrowSecretKey(StaticSecret);

/// Public half of an [`EscrowSecretKey`]. Safe to publish.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EscrowPublicKey(PublicKey);

impl EscrowSecretKey {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild a key from its raw 32 bytes.
    pub fn from_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Raw key bytes. Handle with care.
    pub fn to_bytes(&self) -> [u8; X25519_KEY_LENGTH] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> EscrowPublicKey {
        EscrowPublicKey(PublicKey::from(&self.0))
    }
}

impl fmt::Debug for EscrowSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EscrowSecretKey(<redacted>)")
    }
}

impl EscrowPublicKey {
    pub fn from_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Self {
        Self(PublicKey::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; X25519_KEY_LENGTH] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl fmt::Debug for EscrowPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EscrowPublicKey({}...)", &self.to_hex()[..12])
    }
}

/// Seal `plaintext` to `recipient`, binding `aad` into the authentication tag.
pub fn seal_to(
    recipient: &EscrowPublicKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient.0);

    let key = derive_key(
        ESCROW_KDF_CONTEXT,
        &[
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            recipient.0.as_bytes(),
        ],
    );
    let sealed = encryption::seal(&key, plaintext, aad)?;

    let mut out = Vec::with_capacity(X25519_KEY_LENGTH + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a payload produced by [`seal_to`].
pub fn open_with(
    secret: &EscrowSecretKey,
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < X25519_KEY_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }
    let (ephemeral_bytes, sealed) = data.split_at(X25519_KEY_LENGTH);
    let mut ephemeral = [0u8; X25519_KEY_LENGTH];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = PublicKey::from(ephemeral);

    let shared = secret.0.diffie_hellman(&ephemeral_public);
    let recipient_public = PublicKey::from(&secret.0);
    let key = derive_key(
        ESCROW_KDF_CONTEXT,
        &[
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            recipient_public.as_bytes(),
        ],
    );
    encryption::open(&key, sealed, aad)
}
