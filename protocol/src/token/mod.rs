//! # Tokens
//!
//! A token is a fixed amount of money that belongs to whoever knows its
//! secret. The authority never learns secrets it does not need: the ledger
//! is keyed by a SHA-512 hash that binds value, secret and creation time
//! together, and that hash is all anyone needs to *talk* about a token.
//!
//! ## Representations
//!
//! | Variant              | Knows                            | Can spend |
//! |----------------------|----------------------------------|-----------|
//! | `Bearer`             | value, secret, created           | yes       |
//! | `Reference`          | value, hash, created             | no        |
//! | `EncryptedReference` | reference + secret sealed to key | with key  |
//!
//! Two tokens are equal when their hashes are equal, whatever their
//! representation. A bearer token and its reference compare equal.
//!
//! ## Wire form
//!
//! ```json
//! {"value": "010.00", "token": "<64 hex>", "created": "2024-01-01T00:00:00Z"}
//! {"value": "010.00", "hash": "<128 hex>", "created": "2024-01-01T00:00:00Z"}
//! {"value": "010.00", "hash": "<128 hex>", "created": "...", "encrypted_token": "<base64>"}
//! ```

pub mod amount;
pub mod hash;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

pub use amount::{Amount, AmountError};
pub use hash::{format_created, now_created, parse_created, TokenHash, TokenSecret};

use crate::config::{CLOCK_SKEW_TOLERANCE, SECRET_LENGTH};
use crate::crypto::escrow::{self, EscrowPublicKey, EscrowSecretKey};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything that can be wrong with a token before it reaches the ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Malformed input: bad JSON, wrong field combination, bad hex, bad
    /// timestamp, a clock-skewed creation time, or a failed decryption.
    #[error("bad token format: {0}")]
    BadFormat(String),

    /// The value is outside what a single token may carry.
    #[error("token value {0} outside [0.01, 999.99]")]
    OutOfRange(Amount),
}

impl From<AmountError> for TokenError {
    fn from(e: AmountError) -> Self {
        TokenError::BadFormat(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// A spendable token. The hash is computed on first use and cached.
#[derive(Clone)]
pub struct BearerToken {
    value: Amount,
    secret: TokenSecret,
    created: DateTime<Utc>,
    hash: OnceLock<TokenHash>,
}

impl BearerToken {
    pub fn value(&self) -> Amount {
        self.value
    }

    pub fn secret(&self) -> &TokenSecret {
        &self.secret
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn hash(&self) -> TokenHash {
        *self
            .hash
            .get_or_init(|| TokenHash::compute(self.value, &self.secret, &self.created))
    }
}

/// A token named by its hash. Safe to show to anyone.
#[derive(Clone)]
pub struct ReferenceToken {
    value: Amount,
    hash: TokenHash,
    created: DateTime<Utc>,
}

/// A reference that also carries its secret, sealed to an escrow key.
#[derive(Clone)]
pub struct EncryptedReferenceToken {
    reference: ReferenceToken,
    encrypted_secret: Vec<u8>,
}

impl EncryptedReferenceToken {
    pub fn encrypted_secret(&self) -> &[u8] {
        &self.encrypted_secret
    }
}

/// One token in any of its three representations.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "TokenWire", into = "TokenWire")]
pub enum Token {
    Bearer(BearerToken),
    Reference(ReferenceToken),
    EncryptedReference(EncryptedReferenceToken),
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl Token {
    /// Mint a fresh bearer token worth `value`, created now.
    pub fn create(value: Amount) -> Result<Token, TokenError> {
        Self::create_at(value, now_created())
    }

    /// Mint a fresh bearer token with an explicit creation time. Sub-second
    /// precision is dropped.
    pub fn create_at(value: Amount, created: DateTime<Utc>) -> Result<Token, TokenError> {
        Self::bearer(value, TokenSecret::generate(), hash::truncate_to_seconds(created))
    }

    /// Assemble a bearer token from known parts.
    ///
    /// Rejects values out of range and creation times further in the future
    /// than the clock skew tolerance allows.
    pub fn bearer(
        value: Amount,
        secret: TokenSecret,
        created: DateTime<Utc>,
    ) -> Result<Token, TokenError> {
        check_value(value)?;
        check_not_future(&created)?;
        Ok(Token::Bearer(BearerToken {
            value,
            secret,
            created,
            hash: OnceLock::new(),
        }))
    }

    /// Assemble a reference token.
    pub fn reference(
        value: Amount,
        hash: TokenHash,
        created: DateTime<Utc>,
    ) -> Result<Token, TokenError> {
        check_value(value)?;
        Ok(Token::Reference(ReferenceToken {
            value,
            hash,
            created,
        }))
    }

    /// Parse the canonical JSON form.
    pub fn parse(json: &str) -> Result<Token, TokenError> {
        serde_json::from_str(json).map_err(|e| TokenError::BadFormat(e.to_string()))
    }

    /// Render the canonical JSON form. For a bearer token this contains the
    /// secret.
    pub fn to_json(&self) -> Result<String, TokenError> {
        serde_json::to_string(&TokenWire::from(self.clone()))
            .map_err(|e| TokenError::BadFormat(e.to_string()))
    }
}

fn check_value(value: Amount) -> Result<(), TokenError> {
    if value.is_token_value() {
        Ok(())
    } else {
        Err(TokenError::OutOfRange(value))
    }
}

fn check_not_future(created: &DateTime<Utc>) -> Result<(), TokenError> {
    let tolerance = ChronoDuration::from_std(CLOCK_SKEW_TOLERANCE)
        .map_err(|e| TokenError::BadFormat(e.to_string()))?;
    if *created > Utc::now() + tolerance {
        return Err(TokenError::BadFormat(format!(
            "created {} lies in the future",
            format_created(created)
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl Token {
    pub fn value(&self) -> Amount {
        match self {
            Token::Bearer(t) => t.value,
            Token::Reference(t) => t.value,
            Token::EncryptedReference(t) => t.reference.value,
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        match self {
            Token::Bearer(t) => t.created,
            Token::Reference(t) => t.created,
            Token::EncryptedReference(t) => t.reference.created,
        }
    }

    /// The ledger key of this token. Memoized for bearer tokens.
    pub fn hash(&self) -> TokenHash {
        match self {
            Token::Bearer(t) => t.hash(),
            Token::Reference(t) => t.hash,
            Token::EncryptedReference(t) => t.reference.hash,
        }
    }

    pub fn secret(&self) -> Option<&TokenSecret> {
        match self {
            Token::Bearer(t) => Some(&t.secret),
            _ => None,
        }
    }

    pub fn encrypted_secret(&self) -> Option<&[u8]> {
        match self {
            Token::EncryptedReference(t) => Some(&t.encrypted_secret),
            _ => None,
        }
    }

    pub fn is_bearer(&self) -> bool {
        matches!(self, Token::Bearer(_))
    }

    /// Forget the secret (or its ciphertext), keeping only what identifies
    /// the token.
    pub fn to_reference(&self) -> Token {
        let reference = match self {
            Token::Bearer(t) => ReferenceToken {
                value: t.value,
                hash: t.hash(),
                created: t.created,
            },
            Token::Reference(t) => t.clone(),
            Token::EncryptedReference(t) => t.reference.clone(),
        };
        Token::Reference(reference)
    }
}

// ---------------------------------------------------------------------------
// Escrow
// ---------------------------------------------------------------------------

impl Token {
    /// Seal the secret to `key`, producing an encrypted reference.
    ///
    /// The token hash is bound in as associated data, so a ciphertext cannot
    /// be moved onto another token.
    pub fn encrypt_with(&self, key: &EscrowPublicKey) -> Result<Token, TokenError> {
        let Token::Bearer(bearer) = self else {
            return Err(TokenError::BadFormat(
                "token has no secret to encrypt".to_string(),
            ));
        };

        let hash = bearer.hash();
        let encrypted_secret = escrow::seal_to(key, bearer.secret.as_bytes(), hash.as_bytes())
            .map_err(|e| TokenError::BadFormat(e.to_string()))?;

        Ok(Token::EncryptedReference(EncryptedReferenceToken {
            reference: ReferenceToken {
                value: bearer.value,
                hash,
                created: bearer.created,
            },
            encrypted_secret,
        }))
    }

    /// Recover the secret of an encrypted reference, upgrading it to a bearer
    /// token. The recovered secret must reproduce the hash.
    pub fn decrypt_with(&self, key: &EscrowSecretKey) -> Result<Token, TokenError> {
        let Token::EncryptedReference(encrypted) = self else {
            return Err(TokenError::BadFormat(
                "token carries no encrypted secret".to_string(),
            ));
        };
        let reference = &encrypted.reference;

        let plaintext = escrow::open_with(
            key,
            &encrypted.encrypted_secret,
            reference.hash.as_bytes(),
        )
        .map_err(|e| TokenError::BadFormat(e.to_string()))?;

        let bytes: [u8; SECRET_LENGTH] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| TokenError::BadFormat("decrypted secret has wrong length".to_string()))?;
        let secret = TokenSecret::from_bytes(bytes);

        if TokenHash::compute(reference.value, &secret, &reference.created) != reference.hash {
            return Err(TokenError::BadFormat(
                "decrypted secret does not match token hash".to_string(),
            ));
        }

        Ok(Token::Bearer(BearerToken {
            value: reference.value,
            secret,
            created: reference.created,
            hash: OnceLock::from(reference.hash),
        }))
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Token {}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash().hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Token::Bearer(_) => "Bearer",
            Token::Reference(_) => "Reference",
            Token::EncryptedReference(_) => "EncryptedReference",
        };
        f.debug_struct(kind)
            .field("value", &self.value().to_canonical())
            .field("created", &format_created(&self.created()))
            .field("hash", &self.hash().short())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// The JSON object as it travels. Exactly one of `token` / `hash`;
/// `encrypted_token` only next to `hash`.
#[derive(Serialize, Deserialize)]
struct TokenWire {
    value: String,
    #[serde(default, alias = "secret", skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    created: String,
    #[serde(
        default,
        alias = "encrypted_secret",
        skip_serializing_if = "Option::is_none"
    )]
    encrypted_token: Option<String>,
}

impl TryFrom<TokenWire> for Token {
    type Error = TokenError;

    fn try_from(wire: TokenWire) -> Result<Self, Self::Error> {
        let value = Amount::parse_canonical(&wire.value)?;
        let created = parse_created(&wire.created)?;

        match (wire.token, wire.hash, wire.encrypted_token) {
            (Some(secret), None, None) => {
                Token::bearer(value, TokenSecret::from_hex(&secret)?, created)
            }
            (None, Some(hash), None) => Token::reference(value, TokenHash::from_hex(&hash)?, created),
            (None, Some(hash), Some(ciphertext)) => {
                check_value(value)?;
                let reference = ReferenceToken {
                    value,
                    hash: TokenHash::from_hex(&hash)?,
                    created,
                };
                let encrypted_secret = BASE64
                    .decode(ciphertext.as_bytes())
                    .map_err(|e| TokenError::BadFormat(format!("encrypted_token: {e}")))?;
                Ok(Token::EncryptedReference(EncryptedReferenceToken {
                    reference,
                    encrypted_secret,
                }))
            }
            (Some(_), Some(_), _) => Err(TokenError::BadFormat(
                "token and hash are mutually exclusive".to_string(),
            )),
            (None, None, _) => Err(TokenError::BadFormat(
                "one of token or hash is required".to_string(),
            )),
            (Some(_), None, Some(_)) => Err(TokenError::BadFormat(
                "encrypted_token requires hash".to_string(),
            )),
        }
    }
}

impl From<Token> for TokenWire {
    fn from(token: Token) -> Self {
        let value = token.value().to_canonical();
        let created = format_created(&token.created());
        match token {
            Token::Bearer(t) => TokenWire {
                value,
                token: Some(t.secret.expose_hex()),
                hash: None,
                created,
                encrypted_token: None,
            },
            Token::Reference(t) => TokenWire {
                value,
                token: None,
                hash: Some(t.hash.to_hex()),
                created,
                encrypted_token: None,
            },
            Token::EncryptedReference(t) => TokenWire {
                value,
                token: None,
                hash: Some(t.reference.hash.to_hex()),
                created,
                encrypted_token: Some(BASE64.encode(&t.encrypted_secret)),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
