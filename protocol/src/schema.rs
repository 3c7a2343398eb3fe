//! # Wire Schemas
//!
//! Request and response bodies of the token authority API, plus the checks
//! a request has to pass before it is allowed anywhere near the ledger.
//!
//! | Endpoint          | Request            | Response                        |
//! |-------------------|--------------------|---------------------------------|
//! | `POST /validate`  | `ValidateRequest`  | `ValidateResponse`              |
//! | `POST /transform` | `TransformRequest` | `TransformResponse`, 402, 404   |
//! | `POST /create`    | `CreateRequest`    | `CreateResponse`                |
//! | `GET /status`     |                    | `StatusResponse`, 503 when down |
//!
//! Individual tokens are already well-formed once deserialized (see
//! [`Token`]'s serde impl); the checks here are about the request as a whole.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::config::{MAX_CREATE_VALUES, MAX_TOKENS_PER_REQUEST};
use crate::token::{Amount, Token, TokenHash};

/// Why a request was refused before reaching the ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} holds more than {max} entries")]
    TooMany { field: &'static str, max: usize },

    #[error("duplicate token {hash:?} in {field}")]
    Duplicate {
        field: &'static str,
        hash: TokenHash,
    },

    #[error("input_tokens and output_tokens must both be empty or both be non-empty")]
    Lopsided,

    #[error("input token {0:?} carries no secret")]
    NotSpendable(TokenHash),

    /// Outputs are worth more than inputs.
    #[error("insufficient credit: {missing} missing")]
    InsufficientCredit { missing: Amount },

    /// Inputs are worth more than outputs.
    #[error("unbalanced transform: inputs {inputs}, outputs {outputs}")]
    Unbalanced { inputs: Amount, outputs: Amount },

    #[error("value {0} cannot be carried by a single token")]
    OutOfRange(Amount),
}

fn check_list(field: &'static str, tokens: &[Token]) -> Result<(), RequestError> {
    if tokens.len() > MAX_TOKENS_PER_REQUEST {
        return Err(RequestError::TooMany {
            field,
            max: MAX_TOKENS_PER_REQUEST,
        });
    }
    let mut seen = HashSet::with_capacity(tokens.len());
    for token in tokens {
        let hash = token.hash();
        if !seen.insert(hash) {
            return Err(RequestError::Duplicate { field, hash });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub tokens: Vec<Token>,
}

impl ValidateRequest {
    pub fn check(&self) -> Result<(), RequestError> {
        if self.tokens.is_empty() {
            return Err(RequestError::Empty("tokens"));
        }
        check_list("tokens", &self.tokens)
    }

    /// Split `tokens` into requests the authority accepts. Nothing to
    /// validate yields no request at all.
    pub fn batches(tokens: &[Token]) -> impl Iterator<Item = ValidateRequest> + '_ {
        tokens.chunks(MAX_TOKENS_PER_REQUEST).map(|chunk| ValidateRequest {
            tokens: chunk.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid_tokens: Vec<Token>,
}

// ---------------------------------------------------------------------------
// transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub input_tokens: Vec<Token>,
    pub output_tokens: Vec<Token>,
}

impl TransformRequest {
    pub fn new(input_tokens: Vec<Token>, output_tokens: Vec<Token>) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Both lists empty or both non-empty, no duplicates, every input
    /// spendable, and equal value on both sides.
    pub fn check(&self) -> Result<(), RequestError> {
        if self.input_tokens.is_empty() != self.output_tokens.is_empty() {
            return Err(RequestError::Lopsided);
        }
        check_list("input_tokens", &self.input_tokens)?;
        check_list("output_tokens", &self.output_tokens)?;

        if let Some(reference) = self.input_tokens.iter().find(|t| !t.is_bearer()) {
            return Err(RequestError::NotSpendable(reference.hash()));
        }

        let inputs: Amount = self.input_tokens.iter().map(Token::value).sum();
        let outputs: Amount = self.output_tokens.iter().map(Token::value).sum();
        if outputs > inputs {
            return Err(RequestError::InsufficientCredit {
                missing: Amount::from_cents(outputs.cents() - inputs.cents()),
            });
        }
        if inputs > outputs {
            return Err(RequestError::Unbalanced { inputs, outputs });
        }
        Ok(())
    }

    pub fn total(&self) -> Amount {
        self.input_tokens.iter().map(Token::value).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformResponse {
    pub transformed_tokens: Vec<Token>,
}

// ---------------------------------------------------------------------------
// create
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub values: Vec<Amount>,
}

impl CreateRequest {
    pub fn check(&self) -> Result<(), RequestError> {
        if self.values.is_empty() {
            return Err(RequestError::Empty("values"));
        }
        if self.values.len() > MAX_CREATE_VALUES {
            return Err(RequestError::TooMany {
                field: "values",
                max: MAX_CREATE_VALUES,
            });
        }
        match self.values.iter().find(|v| !v.is_token_value()) {
            Some(v) => Err(RequestError::OutOfRange(*v)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub created_tokens: Vec<Token>,
}

// ---------------------------------------------------------------------------
// status and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "DOWN")]
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub database: DatabaseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientCreditDetail {
    pub amount: Amount,
}

/// Body of a 402 answer: `{"error": {"amount": "001.50"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientCreditResponse {
    pub error: InsufficientCreditDetail,
}

impl InsufficientCreditResponse {
    pub fn new(amount: Amount) -> Self {
        Self {
            error: InsufficientCreditDetail { amount },
        }
    }
}

/// Body of every other error answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
