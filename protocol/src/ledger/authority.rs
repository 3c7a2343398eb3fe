//! # Token Authority
//!
//! The one place that decides whether a token has been spent.
//!
//! ## Transactions
//!
//! Callers open an [`AuthorityConnection`], stage any number of creates,
//! voids and validations, then `commit()`. The connection keeps a private
//! view of every row it touched: the committed value it *observed* and the
//! value it *wants*. Commit runs one sled transaction that re-reads every
//! observed row and applies all wanted rows only if none of them moved in
//! the meantime. That is optimistic concurrency with serializable outcome:
//!
//! ```text
//!   conn A: observe T unused ──► want T used ──► commit ✓ (T still unused)
//!   conn B: observe T unused ──► want T used ──► commit ✗ (T changed → NotFound)
//! ```
//!
//! Whatever a connection validated stays valid until its commit, or the
//! commit fails. No global lock, no per-request mutex; the storage engine's
//! conflict detection is the only serialization point, which also keeps
//! several authority processes on one sled file honest.
//!
//! Dropping a connection without committing throws the view away. A crash
//! mid-commit leaves the ledger as it was: sled transactions are atomic.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::db::{row_key, LedgerDb, LedgerRow};
use super::error::{LedgerError, LedgerResult};
use crate::config::CLOCK_SKEW_TOLERANCE;
use crate::token::{format_created, Amount, Token, TokenError, TokenHash};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs of a token authority.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// How far a token's creation time may sit from the authority clock,
    /// in either direction, and still be registered.
    pub skew_tolerance: Duration,
    /// Whether [`TokenAuthority::bootstrap`] may wipe the ledger.
    pub allow_bootstrap: bool,
    /// Flush sled to disk after every commit.
    pub flush_on_commit: bool,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            skew_tolerance: CLOCK_SKEW_TOLERANCE,
            allow_bootstrap: false,
            flush_on_commit: true,
        }
    }
}

// ---------------------------------------------------------------------------
// TokenAuthority
// ---------------------------------------------------------------------------

/// The ledger of record. Cheap to clone; clones share the same database.
#[derive(Debug, Clone)]
pub struct TokenAuthority {
    db: LedgerDb,
    clock: Arc<dyn Clock>,
    config: AuthorityConfig,
}

/// What a commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub created: usize,
    pub voided: usize,
}

impl TokenAuthority {
    /// Open (or create) the ledger stored at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: AuthorityConfig) -> LedgerResult<Self> {
        Ok(Self::from_db(LedgerDb::open(path)?, config))
    }

    /// An in-memory ledger with default configuration.
    pub fn open_temporary() -> LedgerResult<Self> {
        Ok(Self::from_db(
            LedgerDb::open_temporary()?,
            AuthorityConfig::default(),
        ))
    }

    pub fn from_db(db: LedgerDb, config: AuthorityConfig) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: AuthorityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn db(&self) -> &LedgerDb {
        &self.db
    }

    /// Open a transaction context.
    pub fn connect(&self) -> AuthorityConnection {
        AuthorityConnection {
            authority: self.clone(),
            view: BTreeMap::new(),
        }
    }

    /// Wipe the ledger. Refused unless `allow_bootstrap` is set.
    pub fn bootstrap(&self) -> LedgerResult<()> {
        if !self.config.allow_bootstrap {
            return Err(LedgerError::BootstrapDisabled);
        }
        warn!(rows = self.db.row_count(), "bootstrapping ledger, all rows dropped");
        self.db.clear()
    }

    /// Storage health check.
    pub fn ping(&self) -> LedgerResult<()> {
        self.db.ping()
    }

    /// Raw committed row for a hash.
    pub fn record(&self, hash: &TokenHash) -> LedgerResult<Option<LedgerRow>> {
        self.db.get(hash)
    }

    /// The subset of `tokens` that is registered and unused right now.
    /// Unknown and spent tokens are dropped silently.
    pub fn validate_tokens(&self, tokens: &[Token]) -> LedgerResult<Vec<Token>> {
        let mut conn = self.connect();
        let mut valid = Vec::with_capacity(tokens.len());
        for token in tokens {
            match conn.validate_token(token) {
                Ok(()) => valid.push(token.clone()),
                Err(LedgerError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        conn.rollback();
        debug!(requested = tokens.len(), valid = valid.len(), "validated tokens");
        Ok(valid)
    }

    /// Merge `inputs` and split the result into `outputs`, as one commit.
    ///
    /// Two empty lists are a no-op.
    pub fn transform(&self, inputs: &[Token], outputs: &[Token]) -> LedgerResult<Vec<Token>> {
        if inputs.is_empty() && outputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connect();
        let merged = conn.merge_tokens(inputs)?;
        conn.split_token(&merged, outputs)?;
        let summary = conn.commit()?;

        info!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            voided = summary.voided,
            created = summary.created,
            value = %merged.value(),
            "transform committed"
        );
        Ok(outputs.to_vec())
    }

    /// Mint `count` fresh tokens of `value` and register them in one commit.
    pub fn issue_tokens(&self, value: Amount, count: usize) -> LedgerResult<Vec<Token>> {
        let mut conn = self.connect();
        let mut issued = Vec::with_capacity(count);
        for _ in 0..count {
            let token = Token::create_at(value, self.clock.now())?;
            conn.create_token(&token)?;
            issued.push(token);
        }
        conn.commit()?;
        info!(count, value = %value, "issued tokens");
        Ok(issued)
    }

    fn check_fresh(&self, token: &Token) -> LedgerResult<()> {
        let now = self.clock.now();
        let created = token.created();
        let drift = now.signed_duration_since(created).num_seconds();
        let tolerance = i64::try_from(self.config.skew_tolerance.as_secs()).unwrap_or(i64::MAX);

        if drift.abs() > tolerance {
            return Err(LedgerError::StaleToken {
                hash: token.hash(),
                created: format_created(&created),
                now: format_created(&now),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AuthorityConnection
// ---------------------------------------------------------------------------

/// One row as a connection sees it.
#[derive(Debug, Clone, Copy)]
struct ViewEntry {
    /// Committed value when first read. Commit re-checks it.
    observed: Option<LedgerRow>,
    /// Value after this connection's staged changes.
    current: Option<LedgerRow>,
    /// This connection staged the row's creation.
    created_here: bool,
}

/// Why a commit transaction gave up.
#[derive(Debug)]
enum CommitAbort {
    Changed(TokenHash),
    Corrupt(String),
}

/// A transaction against the ledger.
///
/// Reads see committed state plus this connection's own staged changes.
/// Nothing is visible to anybody else until [`commit`](Self::commit).
pub struct AuthorityConnection {
    authority: TokenAuthority,
    view: BTreeMap<TokenHash, ViewEntry>,
}

impl AuthorityConnection {
    fn entry(&mut self, hash: TokenHash) -> LedgerResult<&mut ViewEntry> {
        match self.view.entry(hash) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let row = self.authority.db.get(&hash)?;
                Ok(v.insert(ViewEntry {
                    observed: row,
                    current: row,
                    created_here: false,
                }))
            }
        }
    }

    /// Register a new, unused token.
    pub fn create_token(&mut self, token: &Token) -> LedgerResult<()> {
        self.authority.check_fresh(token)?;

        let hash = token.hash();
        let entry = self.entry(hash)?;
        if entry.current.is_some() {
            return Err(LedgerError::Conflict(hash));
        }
        entry.current = Some(LedgerRow::unused(token.created()));
        entry.created_here = true;

        debug!(hash = %hash.short(), value = %token.value(), "staged create");
        Ok(())
    }

    /// Mark an unused token as used. Only bearer tokens can be spent.
    pub fn void_token(&mut self, token: &Token) -> LedgerResult<()> {
        if !token.is_bearer() {
            return Err(TokenError::BadFormat("only bearer tokens can be spent".to_string()).into());
        }

        let hash = token.hash();
        let now = self.authority.clock.now().timestamp();
        let entry = self.entry(hash)?;
        match entry.current.as_mut() {
            Some(row) if !row.is_used() => {
                row.used = Some(now);
                debug!(hash = %hash.short(), value = %token.value(), "staged void");
                Ok(())
            }
            _ => Err(LedgerError::NotFound(hash)),
        }
    }

    /// Succeeds if the token is registered and unused. Read only.
    pub fn validate_token(&mut self, token: &Token) -> LedgerResult<()> {
        let hash = token.hash();
        let entry = self.entry(hash)?;
        match entry.current {
            Some(row) if !row.is_used() => Ok(()),
            _ => Err(LedgerError::NotFound(hash)),
        }
    }

    /// Void every input and create one token worth their sum.
    ///
    /// On failure the whole transaction is rolled back, including anything
    /// staged before this call.
    pub fn merge_tokens(&mut self, inputs: &[Token]) -> LedgerResult<Token> {
        let total: Amount = inputs.iter().map(Token::value).sum();
        let merged = Token::create_at(total, self.authority.clock.now())?;

        if let Err(e) = self.merge_inner(inputs, &merged) {
            self.rollback();
            return Err(e);
        }
        Ok(merged)
    }

    fn merge_inner(&mut self, inputs: &[Token], merged: &Token) -> LedgerResult<()> {
        for input in inputs {
            self.validate_token(input)?;
            self.void_token(input)?;
        }
        self.create_token(merged)
    }

    /// Void `input` and create `outputs`, which must add up to it exactly.
    ///
    /// A value mismatch is reported before the ledger is touched. Any other
    /// failure rolls back the whole transaction.
    pub fn split_token(&mut self, input: &Token, outputs: &[Token]) -> LedgerResult<Vec<Token>> {
        let sum: Amount = outputs.iter().map(Token::value).sum();
        if sum != input.value() {
            return Err(LedgerError::ValueMismatch {
                input: input.value(),
                outputs: sum,
            });
        }

        if let Err(e) = self.split_inner(input, outputs) {
            self.rollback();
            return Err(e);
        }
        Ok(outputs.to_vec())
    }

    fn split_inner(&mut self, input: &Token, outputs: &[Token]) -> LedgerResult<()> {
        self.validate_token(input)?;
        self.void_token(input)?;
        for output in outputs {
            self.create_token(output)?;
        }
        Ok(())
    }

    /// Discard everything staged since the last commit.
    pub fn rollback(&mut self) {
        let staged = self.staged_changes();
        if staged > 0 {
            debug!(staged, "rolled back connection");
        }
        self.view.clear();
    }

    fn staged_changes(&self) -> usize {
        self.view
            .values()
            .filter(|e| e.current != e.observed)
            .count()
    }

    /// Atomically apply everything staged, provided no row this connection
    /// read has changed since. The view is cleared either way.
    pub fn commit(&mut self) -> LedgerResult<CommitSummary> {
        let view = std::mem::take(&mut self.view);
        if view.is_empty() {
            return Ok(CommitSummary::default());
        }

        let outcome = self.authority.db.tokens().transaction(|tx| {
            for (hash, entry) in &view {
                let committed = match tx.get(row_key(hash))? {
                    Some(bytes) => Some(LedgerRow::decode(&bytes).map_err(|e| {
                        ConflictableTransactionError::Abort(CommitAbort::Corrupt(e.to_string()))
                    })?),
                    None => None,
                };
                if committed != entry.observed {
                    return Err(ConflictableTransactionError::Abort(CommitAbort::Changed(*hash)));
                }
            }

            for (hash, entry) in &view {
                if entry.current == entry.observed {
                    continue;
                }
                if let Some(row) = entry.current {
                    let bytes = row.encode().map_err(|e| {
                        ConflictableTransactionError::Abort(CommitAbort::Corrupt(e.to_string()))
                    })?;
                    tx.insert(row_key(hash), bytes)?;
                }
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {}
            Err(TransactionError::Abort(CommitAbort::Changed(hash))) => {
                let created_here = view.get(&hash).map(|e| e.created_here).unwrap_or(false);
                debug!(hash = %hash.short(), created_here, "commit lost a race");
                return Err(if created_here {
                    LedgerError::Conflict(hash)
                } else {
                    LedgerError::NotFound(hash)
                });
            }
            Err(TransactionError::Abort(CommitAbort::Corrupt(msg))) => {
                return Err(LedgerError::Serialization(msg));
            }
            Err(TransactionError::Storage(e)) => return Err(LedgerError::Storage(e)),
        }

        if self.authority.config.flush_on_commit {
            self.authority.db.flush()?;
        }

        let mut summary = CommitSummary::default();
        for (hash, entry) in &view {
            let was_unused = entry.observed.map(|r| !r.is_used()).unwrap_or(false);
            match (entry.observed, entry.current) {
                (None, Some(row)) => {
                    summary.created += 1;
                    if row.is_used() {
                        summary.voided += 1;
                    }
                    info!(hash = %hash.short(), used = row.is_used(), "token registered");
                }
                (Some(_), Some(row)) if was_unused && row.is_used() => {
                    summary.voided += 1;
                    info!(hash = %hash.short(), "token voided");
                }
                _ => {}
            }
        }
        debug!(created = summary.created, voided = summary.voided, "ledger commit");
        Ok(summary)
    }
}

impl Drop for AuthorityConnection {
    fn drop(&mut self) {
        let staged = self.staged_changes();
        if staged > 0 {
            debug!(staged, "connection dropped without commit, changes discarded");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
