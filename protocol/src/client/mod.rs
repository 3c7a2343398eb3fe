//! # Token Service Clients
//!
//! The session never talks to a ledger directly. It talks to a
//! [`TokenService`], which is either a token authority across the network
//! ([`TokenClient`]) or one embedded in the same process
//! ([`LocalTokenService`]). Tests plug in their own.
//!
//! Errors are shaped around one question the caller has to answer after a
//! failed call: *did anything happen on the ledger?* Most errors say "no".
//! [`ClientError::is_ambiguous`] flags the ones that mean "maybe".

pub mod http;
pub mod local;

use std::sync::Arc;
use thiserror::Error;

use crate::schema::DatabaseStatus;
use crate::token::{Amount, Token};

pub use http::{ClientConfig, TokenClient};
pub use local::LocalTokenService;

/// Failures talking to a token authority.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// We could not build the request, or could not read the answer.
    #[error("bad format: {0}")]
    BadFormat(String),

    /// An input token is unknown or already spent.
    #[error("no valid token")]
    NoValidToken,

    /// The outputs asked for are worth more than the inputs offered.
    #[error("insufficient credit: {amount} missing")]
    InsufficientCredit { amount: Amount },

    /// The authority refused the request as malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No answer within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection failed or broke mid-request.
    #[error("connection error: {0}")]
    Connection(String),

    /// The authority is up but its ledger is not.
    #[error("token authority unavailable")]
    Unavailable,

    /// Any other non-success answer.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The client itself could not be set up.
    #[error("client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// The request may or may not have been applied. A mutating call that
    /// fails this way must be followed by a read before anything else.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout
                | ClientError::Connection(_)
                | ClientError::Unavailable
                | ClientError::Server { .. }
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// The operations a token authority offers its clients.
pub trait TokenService {
    /// The subset of `tokens` that is currently registered and unused.
    fn validate_tokens(&self, tokens: &[Token]) -> ClientResult<Vec<Token>>;

    /// Atomically void `inputs` and register `outputs`. Returns the outputs.
    fn transform_tokens(&self, inputs: &[Token], outputs: &[Token]) -> ClientResult<Vec<Token>>;

    /// Generate fresh, unregistered tokens of the given values.
    fn create_tokens(&self, values: &[Amount]) -> ClientResult<Vec<Token>>;

    /// Health of the authority's ledger.
    fn status(&self) -> ClientResult<DatabaseStatus>;
}

impl<S: TokenService + ?Sized> TokenService for Arc<S> {
    fn validate_tokens(&self, tokens: &[Token]) -> ClientResult<Vec<Token>> {
        (**self).validate_tokens(tokens)
    }

    fn transform_tokens(&self, inputs: &[Token], outputs: &[Token]) -> ClientResult<Vec<Token>> {
        (**self).transform_tokens(inputs, outputs)
    }

    fn create_tokens(&self, values: &[Amount]) -> ClientResult<Vec<Token>> {
        (**self).create_tokens(values)
    }

    fn status(&self) -> ClientResult<DatabaseStatus> {
        (**self).status()
    }
}

impl<S: TokenService + ?Sized> TokenService for &S {
    fn validate_tokens(&self, tokens: &[Token]) -> ClientResult<Vec<Token>> {
        (**self).validate_tokens(tokens)
    }

    fn transform_tokens(&self, inputs: &[Token], outputs: &[Token]) -> ClientResult<Vec<Token>> {
        (**self).transform_tokens(inputs, outputs)
    }

    fn create_tokens(&self, values: &[Amount]) -> ClientResult<Vec<Token>> {
        (**self).create_tokens(values)
    }

    fn status(&self) -> ClientResult<DatabaseStatus> {
        (**self).status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_ambiguous() {
        assert!(ClientError::Timeout.is_ambiguous());
        assert!(ClientError::Connection("reset".into()).is_ambiguous());
        assert!(ClientError::Unavailable.is_ambiguous());
        assert!(!ClientError::NoValidToken.is_ambiguous());
        assert!(!ClientError::InsufficientCredit {
            amount: Amount::from_cents(1)
        }
        .is_ambiguous());
        assert!(!ClientError::BadRequest("dup".into()).is_ambiguous());
    }
}
