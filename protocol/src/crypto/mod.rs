//! # Cryptographic Primitives for upay
//!
//! Everything security related flows through here: the hash that names a
//! token, and the sealing used to escrow a token secret.
//!
//! - **SHA-512** for token hashes: wide, boring, everywhere.
//! - **X25519** for escrow key agreement.
//! - **AES-256-GCM** for sealing secrets: AEAD done right.
//! - **BLAKE3** `derive_key` as the KDF between the two.
//!
//! We don't roll our own. Everything here is a thin, typed wrapper around
//! audited implementations.

pub mod encryption;
pub mod escrow;
pub mod hash;

pub use encryption::EncryptionError;
pub use escrow::{EscrowPublicKey, EscrowSecretKey};
pub use hash::{derive_key, sha512, sha512_multi};
