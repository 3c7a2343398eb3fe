use thiserror::Error;

use crate::client::ClientError;
use crate::collector::CollectorError;
use crate::token::{Amount, Token, TokenError};

/// Errors surfaced by a cashing session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The held tokens cannot pay `requested` under the selection rules.
    #[error("insufficient credit: requested {requested}, credit {credit}")]
    InsufficientCredit { requested: Amount, credit: Amount },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// An earlier transform has an unknown outcome. Call `reconcile()`.
    #[error("a transform is awaiting reconciliation")]
    PendingTransform,

    #[error("nothing to roll back")]
    NothingToRollBack,

    /// Cashed tokens could be neither confirmed nor restored. Somebody has
    /// to look at the ledger by hand.
    #[error("fatal reconciliation failure: {0}")]
    FatalReconciliation(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Token(#[from] TokenError),

    /// Collection failed. The cashed tokens are spent; `uncollected` still
    /// has to reach the collectors.
    #[error("collection failed for {} tokens: {source}", uncollected.len())]
    CollectFailed {
        #[source]
        source: CollectorError,
        uncollected: Vec<Token>,
    },

    /// The session body failed and rolling back its cashes failed too.
    #[error("{cause}; rollback failed: {rollback}")]
    RollbackFailed {
        cause: Box<SessionError>,
        rollback: Box<SessionError>,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;
