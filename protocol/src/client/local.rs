//! A token service backed by an in-process [`TokenAuthority`].
//!
//! Same contract, same request checks and the same error mapping as the
//! HTTP server, minus the network. Useful for embedding the authority and
//! for exercising sessions in tests.

use tracing::warn;

use super::{ClientError, ClientResult, TokenService};
use crate::ledger::{LedgerError, TokenAuthority};
use crate::schema::{
    CreateRequest, DatabaseStatus, RequestError, TransformRequest, ValidateRequest,
};
use crate::token::{Amount, Token};

#[derive(Debug, Clone)]
pub struct LocalTokenService {
    authority: TokenAuthority,
}

impl LocalTokenService {
    pub fn new(authority: TokenAuthority) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }
}

impl From<RequestError> for ClientError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::InsufficientCredit { missing } => {
                ClientError::InsufficientCredit { amount: missing }
            }
            other => ClientError::BadRequest(other.to_string()),
        }
    }
}

impl From<LedgerError> for ClientError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(_) => ClientError::NoValidToken,
            LedgerError::Conflict(_)
            | LedgerError::StaleToken { .. }
            | LedgerError::ValueMismatch { .. }
            | LedgerError::Token(_)
            | LedgerError::BootstrapDisabled => ClientError::BadRequest(e.to_string()),
            LedgerError::Storage(_) | LedgerError::Serialization(_) => {
                warn!(error = %e, "ledger failure");
                ClientError::Unavailable
            }
        }
    }
}

impl TokenService for LocalTokenService {
    fn validate_tokens(&self, tokens: &[Token]) -> ClientResult<Vec<Token>> {
        let mut valid = Vec::new();
        for request in ValidateRequest::batches(tokens) {
            request.check()?;
            valid.extend(self.authority.validate_tokens(&request.tokens)?);
        }
        Ok(valid)
    }

    fn transform_tokens(&self, inputs: &[Token], outputs: &[Token]) -> ClientResult<Vec<Token>> {
        TransformRequest::new(inputs.to_vec(), outputs.to_vec()).check()?;
        Ok(self.authority.transform(inputs, outputs)?)
    }

    fn create_tokens(&self, values: &[Amount]) -> ClientResult<Vec<Token>> {
        CreateRequest {
            values: values.to_vec(),
        }
        .check()?;
        values
            .iter()
            .map(|v| Token::create(*v).map_err(|e| ClientError::BadRequest(e.to_string())))
            .collect()
    }

    fn status(&self) -> ClientResult<DatabaseStatus> {
        Ok(match self.authority.ping() {
            Ok(()) => DatabaseStatus::Ok,
            Err(e) => {
                warn!(error = %e, "ledger ping failed");
                DatabaseStatus::Down
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(c: u64) -> Amount {
        Amount::from_cents(c)
    }

    fn service() -> LocalTokenService {
        LocalTokenService::new(TokenAuthority::open_temporary().unwrap())
    }

    #[test]
    fn transform_maps_ledger_outcomes() {
        let service = service();
        let inputs = service.authority().issue_tokens(cents(100), 2).unwrap();
        let outputs = vec![Token::create(cents(200)).unwrap()];

        assert_eq!(service.transform_tokens(&inputs, &outputs).unwrap(), outputs);
        assert_eq!(
            service.transform_tokens(&inputs, &[Token::create(cents(200)).unwrap()]),
            Err(ClientError::NoValidToken)
        );
    }

    #[test]
    fn transform_reports_missing_credit() {
        let service = service();
        let inputs = service.authority().issue_tokens(cents(100), 1).unwrap();
        let outputs = vec![Token::create(cents(250)).unwrap()];
        assert_eq!(
            service.transform_tokens(&inputs, &outputs),
            Err(ClientError::InsufficientCredit { amount: cents(150) })
        );
    }

    #[test]
    fn create_does_not_register() {
        let service = service();
        let created = service.create_tokens(&[cents(100), cents(250)]).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].value(), cents(250));
        assert!(service.validate_tokens(&created).unwrap().is_empty());
    }

    #[test]
    fn status_is_ok_for_healthy_ledger() {
        assert_eq!(service().status().unwrap(), DatabaseStatus::Ok);
    }

    #[test]
    fn validating_nothing_is_free() {
        assert!(service().validate_tokens(&[]).unwrap().is_empty());
    }

    #[test]
    fn purse_larger_than_one_request_validates() {
        let service = service();
        let purse = service.authority().issue_tokens(cents(50), 300).unwrap();
        assert_eq!(service.validate_tokens(&purse).unwrap().len(), 300);
    }

    #[test]
    fn duplicate_validation_is_refused_like_the_server() {
        let service = service();
        let token = service.authority().issue_tokens(cents(100), 1).unwrap().remove(0);
        assert!(matches!(
            service.validate_tokens(&[token.clone(), token]),
            Err(ClientError::BadRequest(_))
        ));
    }
}
