//! Blocking HTTP client for a remote token authority.
//!
//! Every call is synchronous and bounded by the configured timeout. A
//! timeout is reported as [`ClientError::Timeout`], never as a failure:
//! the request may well have been applied.

use reqwest::blocking::{Client, Response};
use reqwest::{Certificate, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::{ClientError, ClientResult, TokenService};
use crate::config::{API_PREFIX, CLIENT_TIMEOUT};
use crate::schema::{
    CreateRequest, CreateResponse, DatabaseStatus, ErrorResponse, InsufficientCreditResponse,
    StatusResponse, TransformRequest, TransformResponse, ValidateRequest, ValidateResponse,
};
use crate::token::{Amount, Token};

/// Where the authority lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme, host and port, e.g. `https://authority.example:8443`.
    pub base_url: String,
    pub timeout: Duration,
    /// PEM file with an extra root certificate to trust, for authorities
    /// running on a private CA.
    pub ca_certificate: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: CLIENT_TIMEOUT,
            ca_certificate: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenClient {
    client: Client,
    base_url: String,
}

impl TokenClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let mut builder = Client::builder().timeout(config.timeout);

        if let Some(path) = &config.ca_certificate {
            let pem = std::fs::read(path)
                .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<R> {
        let url = self.url(path);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(transport_error)?;
        read_response(response)
    }
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else if e.is_decode() {
        ClientError::BadFormat(e.to_string())
    } else if e.is_builder() {
        ClientError::Config(e.to_string())
    } else {
        ClientError::Connection(e.to_string())
    }
}

fn error_message(response: Response) -> String {
    let text = response.text().unwrap_or_default();
    serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.error)
        .unwrap_or(text)
}

fn read_response<R: DeserializeOwned>(response: Response) -> ClientResult<R> {
    let status = response.status();
    if status.is_success() {
        return response.json::<R>().map_err(transport_error);
    }

    match status {
        StatusCode::PAYMENT_REQUIRED => {
            let body: InsufficientCreditResponse = response.json().map_err(transport_error)?;
            Err(ClientError::InsufficientCredit {
                amount: body.error.amount,
            })
        }
        StatusCode::NOT_FOUND => Err(ClientError::NoValidToken),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(ClientError::BadRequest(error_message(response)))
        }
        StatusCode::SERVICE_UNAVAILABLE => Err(ClientError::Unavailable),
        other => Err(ClientError::Server {
            status: other.as_u16(),
            message: error_message(response),
        }),
    }
}

impl TokenService for TokenClient {
    fn validate_tokens(&self, tokens: &[Token]) -> ClientResult<Vec<Token>> {
        let mut valid = Vec::new();
        for request in ValidateRequest::batches(tokens) {
            let response: ValidateResponse = self.post("/validate", &request)?;
            valid.extend(response.valid_tokens);
        }
        Ok(valid)
    }

    fn transform_tokens(&self, inputs: &[Token], outputs: &[Token]) -> ClientResult<Vec<Token>> {
        let request = TransformRequest::new(inputs.to_vec(), outputs.to_vec());
        let response: TransformResponse = self.post("/transform", &request)?;
        Ok(response.transformed_tokens)
    }

    fn create_tokens(&self, values: &[Amount]) -> ClientResult<Vec<Token>> {
        let request = CreateRequest {
            values: values.to_vec(),
        };
        let response: CreateResponse = self.post("/create", &request)?;
        Ok(response.created_tokens)
    }

    fn status(&self) -> ClientResult<DatabaseStatus> {
        let url = self.url("/status");
        let response = self.client.get(&url).send().map_err(transport_error)?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(DatabaseStatus::Down);
        }
        let body: StatusResponse = read_response(response)?;
        Ok(body.database)
    }
}
