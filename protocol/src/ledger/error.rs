//! Error types for the token ledger.
//!
//! Every ledger operation that can fail returns a [`LedgerError`]. The
//! variants line up with what a caller can actually do about a failure:
//! `NotFound` means "somebody spent it first", `Conflict` means "pick a new
//! secret", everything under `Storage` means "page the operator".

use thiserror::Error;

use crate::token::{Amount, TokenError, TokenHash};

/// Errors that can occur while reading or changing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No unused row with this hash. Also the answer when a concurrent
    /// transaction spent the token first.
    #[error("token {0:?} not found or already used")]
    NotFound(TokenHash),

    /// A row with this hash already exists.
    #[error("token {0:?} already exists")]
    Conflict(TokenHash),

    /// The token's creation time is too far from the authority clock.
    #[error("token {hash:?} is stale: created {created}, authority time {now}")]
    StaleToken {
        hash: TokenHash,
        created: String,
        now: String,
    },

    /// Split outputs do not add up to the input.
    #[error("value mismatch: input is {input}, outputs add up to {outputs}")]
    ValueMismatch { input: Amount, outputs: Amount },

    /// The token itself is unusable (out of range, or not spendable).
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Wiping the ledger was requested but is not enabled.
    #[error("bootstrap is disabled for this ledger")]
    BootstrapDisabled,

    /// The underlying sled database failed.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A ledger row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// `NotFound` and `Conflict` are the expected outcomes of racing
    /// clients; everything else is worth a warning.
    pub fn is_contention(&self) -> bool {
        matches!(self, LedgerError::NotFound(_) | LedgerError::Conflict(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
