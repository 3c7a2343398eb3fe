//! # Cashing Sessions
//!
//! A [`Session`] holds a purse of bearer tokens and pays amounts out of it
//! through a [`TokenService`]. Paying is a transform: the selected tokens
//! are voided and one fresh token worth the charge is registered in their
//! place. That fresh token is *locked*: spent from the purse, but not yet
//! handed to the collectors.
//!
//! ```text
//!   tokens ──cash──► locked ──collect──► collectors
//!     ▲                │
//!     └────rollback────┘
//! ```
//!
//! ## When the network lies
//!
//! A timeout around a transform says nothing about whether the authority
//! applied it. The session never guesses and never retries blindly. It
//! reads back first:
//!
//! - an output token is valid: the transform committed, carry on;
//! - every input is still valid: nothing happened, retrying is safe;
//! - anything else: the transform is *pending* and [`Session::reconcile`]
//!   has to settle it before the purse can be used again.
//!
//! Retries always resend the *same* output tokens, so a late-arriving
//! original and its retry can never both apply: the second one finds its
//! inputs spent and its outputs taken. A retry refused that way is read
//! back too, since the refusal may mean the original got through.
//!
//! ## Scoped sessions
//!
//! [`SessionManager::with_session`] runs a closure against a fresh session
//! and settles it exactly once: collect on `Ok`, roll back on `Err`. If the
//! closure panics, dropping the session rolls back. A pending transform is
//! reconciled before collecting.

pub mod error;
pub mod selection;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::client::{ClientError, TokenService};
use crate::collector::Collector;
use crate::config::{CASH_ATTEMPTS, ROLLBACK_ATTEMPTS, ROLLBACK_BACKOFF};
use crate::token::{Amount, Token, TokenError, TokenHash};

pub use error::{SessionError, SessionResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transform attempts per `cash`, each after a read-back that proved
    /// the previous one did not apply.
    pub cash_attempts: u32,
    /// Transform attempts per rollback.
    pub rollback_attempts: u32,
    /// Sleep before rollback attempt `n + 1` is `n * rollback_backoff`.
    pub rollback_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cash_attempts: CASH_ATTEMPTS,
            rollback_attempts: ROLLBACK_ATTEMPTS,
            rollback_backoff: ROLLBACK_BACKOFF,
        }
    }
}

// ---------------------------------------------------------------------------
// Bookkeeping types
// ---------------------------------------------------------------------------

/// One successful cash that has not been collected yet.
#[derive(Debug, Clone)]
struct CashRecord {
    /// Values of the purse tokens that paid for it. Rollback restores these
    /// denominations.
    input_values: Vec<Amount>,
    /// The locked token.
    output: Token,
}

/// A transform whose outcome is not known.
#[derive(Debug, Clone)]
struct PendingTransform {
    inputs: Vec<Token>,
    output: Token,
}

/// What a read-back says about a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Committed,
    NotApplied,
    Unknown,
}

/// Result of [`Session::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// There was nothing to reconcile.
    Clean,
    /// The transform had committed; the charge is now locked.
    Committed(Amount),
    /// The transform never applied; the purse is unchanged.
    NotApplied,
    /// The inputs were spent by someone else. They are gone from the purse.
    InputsLost,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A purse of tokens and the cashes made from it.
///
/// One session belongs to one thread of control; nothing here is shared.
pub struct Session<S: TokenService> {
    service: S,
    collectors: Vec<Arc<dyn Collector>>,
    config: SessionConfig,
    tokens: Vec<Token>,
    cashes: Vec<CashRecord>,
    total: Amount,
    pending: Option<PendingTransform>,
    rollback_on_drop: bool,
}

impl<S: TokenService> Session<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            collectors: Vec::new(),
            config: SessionConfig::default(),
            tokens: Vec::new(),
            cashes: Vec::new(),
            total: Amount::ZERO,
            pending: None,
            rollback_on_drop: true,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    // -- Accessors ----------------------------------------------------------

    /// Tokens currently held and believed valid.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Tokens produced by cashing and not yet collected.
    pub fn locked_tokens(&self) -> Vec<Token> {
        self.cashes.iter().map(|c| c.output.clone()).collect()
    }

    /// Sum of held token values.
    pub fn credit(&self) -> Amount {
        self.tokens.iter().map(Token::value).sum()
    }

    /// Everything cashed over the lifetime of the session, minus rollbacks.
    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn ensure_no_pending(&self) -> SessionResult<()> {
        if self.pending.is_some() {
            return Err(SessionError::PendingTransform);
        }
        Ok(())
    }

    // -- Validation ---------------------------------------------------------

    /// Add `new_tokens` to the purse, then keep only what the authority
    /// says is valid. Returns the resulting credit.
    ///
    /// Tokens without a secret cannot be spent and are ignored.
    pub fn validate_tokens<I>(&mut self, new_tokens: I) -> SessionResult<Amount>
    where
        I: IntoIterator<Item = Token>,
    {
        self.ensure_no_pending()?;
        for token in new_tokens {
            if !token.is_bearer() {
                warn!(hash = %token.hash().short(), "ignoring token without secret");
                continue;
            }
            if !self.tokens.contains(&token) {
                self.tokens.push(token);
            }
        }
        self.refresh()?;
        Ok(self.credit())
    }

    fn refresh(&mut self) -> SessionResult<()> {
        let valid: HashSet<TokenHash> = self
            .service
            .validate_tokens(&self.tokens)?
            .iter()
            .map(Token::hash)
            .collect();
        let before = self.tokens.len();
        self.tokens.retain(|t| valid.contains(&t.hash()));
        let dropped = before - self.tokens.len();
        if dropped > 0 {
            info!(dropped, "dropped spent or unknown tokens from purse");
        }
        Ok(())
    }

    // -- Selection ----------------------------------------------------------

    /// Held tokens adding up to exactly `amount`.
    pub fn select_tokens(&self, amount: Amount) -> SessionResult<Vec<Token>> {
        selection::select_exact(&self.tokens, amount).ok_or(SessionError::InsufficientCredit {
            requested: amount,
            credit: self.credit(),
        })
    }

    /// What `cash(amount)` would charge.
    pub fn quote(&self, amount: Amount) -> SessionResult<Amount> {
        if amount.is_zero() {
            return Err(SessionError::ZeroAmount);
        }
        selection::quote(&self.tokens, amount).ok_or(SessionError::InsufficientCredit {
            requested: amount,
            credit: self.credit(),
        })
    }

    // -- Cashing ------------------------------------------------------------

    /// Pay at least `amount` out of the purse. Returns the actual charge
    /// (see [`quote`](Self::quote)).
    pub fn cash(&mut self, amount: Amount) -> SessionResult<Amount> {
        self.ensure_no_pending()?;

        let charge = self.quote(amount)?;
        if !charge.is_token_value() {
            return Err(TokenError::OutOfRange(charge).into());
        }
        let inputs = self.select_tokens(charge)?;
        let output = Token::create(charge)?;
        let outputs = [output.clone()];

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.service.transform_tokens(&inputs, &outputs) {
                Ok(_) => {
                    self.apply_cash(&inputs, output);
                    return Ok(charge);
                }
                Err(e) if e.is_ambiguous() => {
                    warn!(attempt, error = %e, "transform outcome unknown, reading back");
                    match self.probe(&inputs, &output) {
                        Ok(Probe::Committed) => {
                            info!(attempt, "read-back shows transform committed");
                            self.apply_cash(&inputs, output);
                            return Ok(charge);
                        }
                        Ok(Probe::NotApplied) if attempt < self.config.cash_attempts => continue,
                        Ok(Probe::NotApplied) => return Err(e.into()),
                        Ok(Probe::Unknown) | Err(_) => {
                            return Err(self.leave_pending(inputs, output, e));
                        }
                    }
                }
                // A retry refused outright may be refused because an earlier
                // attempt landed in the meantime.
                Err(e) if attempt > 1 => match self.probe(&inputs, &output) {
                    Ok(Probe::Committed) => {
                        info!(attempt, "earlier attempt committed, retry was redundant");
                        self.apply_cash(&inputs, output);
                        return Ok(charge);
                    }
                    Ok(Probe::NotApplied) => return Err(e.into()),
                    Ok(Probe::Unknown) | Err(_) => {
                        return Err(self.leave_pending(inputs, output, e));
                    }
                },
                Err(ClientError::NoValidToken) => {
                    if let Err(e) = self.refresh() {
                        warn!(error = %e, "could not refresh purse");
                    }
                    return Err(ClientError::NoValidToken.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn leave_pending(
        &mut self,
        inputs: Vec<Token>,
        output: Token,
        cause: ClientError,
    ) -> SessionError {
        warn!(
            output = %output.hash().short(),
            "transform left pending, reconcile before cashing again"
        );
        self.pending = Some(PendingTransform { inputs, output });
        cause.into()
    }

    /// Ask the authority which of `inputs` and `output` are valid.
    fn probe(&self, inputs: &[Token], output: &Token) -> Result<Probe, ClientError> {
        let mut query = inputs.to_vec();
        query.push(output.clone());
        let valid: HashSet<TokenHash> = self
            .service
            .validate_tokens(&query)?
            .iter()
            .map(Token::hash)
            .collect();

        Ok(if valid.contains(&output.hash()) {
            Probe::Committed
        } else if inputs.iter().all(|t| valid.contains(&t.hash())) {
            Probe::NotApplied
        } else {
            Probe::Unknown
        })
    }

    fn apply_cash(&mut self, inputs: &[Token], output: Token) {
        let spent: HashSet<TokenHash> = inputs.iter().map(Token::hash).collect();
        self.tokens.retain(|t| !spent.contains(&t.hash()));

        let charge = output.value();
        self.total = [self.total, charge].into_iter().sum();
        info!(
            charge = %charge,
            inputs = inputs.len(),
            locked = %output.hash().short(),
            "cashed"
        );
        self.cashes.push(CashRecord {
            input_values: inputs.iter().map(Token::value).collect(),
            output,
        });

        if let Err(e) = self.refresh() {
            warn!(error = %e, "could not revalidate purse after cashing");
        }
    }

    /// Settle a pending transform.
    pub fn reconcile(&mut self) -> SessionResult<Reconciliation> {
        let Some(pending) = self.pending.take() else {
            return Ok(Reconciliation::Clean);
        };

        let probe = match self.probe(&pending.inputs, &pending.output) {
            Ok(p) => p,
            Err(e) => {
                self.pending = Some(pending);
                return Err(e.into());
            }
        };

        match probe {
            Probe::Committed => {
                let charge = pending.output.value();
                self.apply_cash(&pending.inputs, pending.output);
                Ok(Reconciliation::Committed(charge))
            }
            Probe::NotApplied => {
                info!("pending transform never applied");
                Ok(Reconciliation::NotApplied)
            }
            Probe::Unknown => {
                // Resending the identical transform either applies it or
                // proves the inputs went elsewhere.
                let outputs = [pending.output.clone()];
                match self.service.transform_tokens(&pending.inputs, &outputs) {
                    Ok(_) => {
                        let charge = pending.output.value();
                        self.apply_cash(&pending.inputs, pending.output);
                        Ok(Reconciliation::Committed(charge))
                    }
                    Err(e) if e.is_ambiguous() => {
                        self.pending = Some(pending);
                        Err(e.into())
                    }
                    Err(_) => match self.probe(&pending.inputs, &pending.output) {
                        Ok(Probe::Committed) => {
                            let charge = pending.output.value();
                            self.apply_cash(&pending.inputs, pending.output);
                            Ok(Reconciliation::Committed(charge))
                        }
                        Ok(_) => {
                            warn!(inputs = pending.inputs.len(), "inputs were spent elsewhere");
                            self.refresh()?;
                            Ok(Reconciliation::InputsLost)
                        }
                        Err(e) => {
                            self.pending = Some(pending);
                            Err(e.into())
                        }
                    },
                }
            }
        }
    }

    // -- Settling -----------------------------------------------------------

    /// Hand every locked token to every collector. Locked tokens are only
    /// released once all collectors accepted them. Returns how many tokens
    /// were collected.
    pub fn collect(&mut self) -> SessionResult<usize> {
        let locked = self.locked_tokens();
        if locked.is_empty() {
            return Ok(0);
        }

        for collector in &self.collectors {
            if let Err(source) = collector.collect_tokens(&locked) {
                warn!(collector = collector.name(), error = %source, "collection failed");
                return Err(SessionError::CollectFailed {
                    source,
                    uncollected: locked,
                });
            }
        }

        self.cashes.clear();
        info!(
            collected = locked.len(),
            collectors = self.collectors.len(),
            "collected locked tokens"
        );
        Ok(locked.len())
    }

    /// Turn every locked token back into purse tokens of the denominations
    /// that were cashed. Returns the restored tokens.
    pub fn rollback(&mut self) -> SessionResult<Vec<Token>> {
        if self.pending.is_some() {
            if let Err(e) = self.reconcile() {
                return Err(SessionError::FatalReconciliation(format!(
                    "pending transform unresolved: {e}"
                )));
            }
        }
        if self.cashes.is_empty() {
            return Err(SessionError::NothingToRollBack);
        }

        let mut restored = Vec::new();
        while let Some(record) = self.cashes.last().cloned() {
            let replacements: Vec<Token> = record
                .input_values
                .iter()
                .map(|v| Token::create(*v))
                .collect::<Result<_, _>>()?;

            self.rollback_one(&record, &replacements)?;

            self.cashes.pop();
            self.total = self
                .total
                .checked_sub(record.output.value())
                .unwrap_or(Amount::ZERO);
            self.tokens.extend(replacements.iter().cloned());
            info!(
                restored = %record.output.value(),
                tokens = replacements.len(),
                "rolled back cash"
            );
            restored.extend(replacements);
        }
        Ok(restored)
    }

    fn rollback_one(&self, record: &CashRecord, replacements: &[Token]) -> SessionResult<()> {
        let locked = [record.output.clone()];
        let mut last_error = None;

        for attempt in 1..=self.config.rollback_attempts {
            match self.service.transform_tokens(&locked, replacements) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "rollback attempt failed");
                    if self.replacements_registered(replacements) {
                        return Ok(());
                    }
                    last_error = Some(e);
                }
            }
            if attempt < self.config.rollback_attempts {
                thread::sleep(self.config.rollback_backoff * attempt);
            }
        }

        error!(
            locked = %record.output.hash().short(),
            value = %record.output.value(),
            "rollback could not be confirmed"
        );
        Err(SessionError::FatalReconciliation(format!(
            "rollback of {} failed after {} attempts: {}",
            record.output.value(),
            self.config.rollback_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn replacements_registered(&self, replacements: &[Token]) -> bool {
        match self.service.validate_tokens(replacements) {
            Ok(valid) => valid.len() == replacements.len(),
            Err(_) => false,
        }
    }
}

impl<S: TokenService> Drop for Session<S> {
    fn drop(&mut self) {
        if !self.rollback_on_drop || (self.cashes.is_empty() && self.pending.is_none()) {
            return;
        }
        warn!(
            locked = self.cashes.len(),
            "session dropped with uncollected cashes, rolling back"
        );
        match self.rollback() {
            Ok(_) | Err(SessionError::NothingToRollBack) => {}
            Err(e) => error!(error = %e, "rollback on drop failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Hands out sessions that share a token service and collectors.
pub struct SessionManager<S: TokenService + Clone> {
    service: S,
    collectors: Vec<Arc<dyn Collector>>,
    config: SessionConfig,
}

impl<S: TokenService + Clone> SessionManager<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            collectors: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// A fresh, empty session.
    pub fn session(&self) -> Session<S> {
        let mut session = Session::new(self.service.clone()).with_config(self.config.clone());
        session.collectors = self.collectors.clone();
        session
    }

    /// Run `body` in a fresh session, then collect if it succeeded or roll
    /// back if it failed. Exactly one of the two runs.
    ///
    /// A failed collection is reported with the tokens still to collect;
    /// they are spent and are never rolled back. A transform still pending
    /// when `body` returns `Ok` is reconciled first, so a cash that did
    /// commit gets collected too.
    pub fn with_session<T, F>(&self, body: F) -> SessionResult<T>
    where
        F: FnOnce(&mut Session<S>) -> SessionResult<T>,
    {
        let mut session = self.session();
        match body(&mut session) {
            Ok(value) => {
                session.rollback_on_drop = false;
                // A cash the body gave up on may still have committed.
                let unresolved = session.reconcile().err();
                session.collect()?;
                match unresolved {
                    None => Ok(value),
                    Some(e) => {
                        error!(error = %e, "session ended with an unresolved transform");
                        Err(SessionError::FatalReconciliation(format!(
                            "pending transform unresolved: {e}"
                        )))
                    }
                }
            }
            Err(cause) => match session.rollback() {
                Ok(_) | Err(SessionError::NothingToRollBack) => Err(cause),
                Err(rollback) => {
                    session.rollback_on_drop = false;
                    Err(SessionError::RollbackFailed {
                        cause: Box::new(cause),
                        rollback: Box::new(rollback),
                    })
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
