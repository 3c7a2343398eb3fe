//! # Collectors
//!
//! Once a session has cashed tokens, somebody has to keep the receipts. A
//! [`Collector`] is a sink for tokens that have left circulation: a log, a
//! journal file, a message queue, a mailbox.
//!
//! Collection is bookkeeping, not settlement. The money moved when the
//! ledger committed; a collector that is down only delays the paperwork.
//! Delivery is at-least-once, so a collector must tolerate seeing the same
//! token twice. Tokens carry their hash, which makes that easy.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::crypto::EscrowPublicKey;
use crate::token::{format_created, now_created, Token, TokenError, TokenHash};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("collector serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collector could not escrow token: {0}")]
    Escrow(#[from] TokenError),

    #[error("collector {name} rejected tokens: {reason}")]
    Rejected { name: String, reason: String },
}

/// A sink for spent tokens.
pub trait Collector: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Durably record `tokens`. Must be safe to call again with tokens it
    /// has already seen.
    fn collect_tokens(&self, tokens: &[Token]) -> Result<(), CollectorError>;
}

// ---------------------------------------------------------------------------
// LogCollector
// ---------------------------------------------------------------------------

/// Writes one `tracing` event per token: hash and value, never the secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCollector;

impl Collector for LogCollector {
    fn name(&self) -> &str {
        "log"
    }

    fn collect_tokens(&self, tokens: &[Token]) -> Result<(), CollectorError> {
        for token in tokens {
            info!(
                hash = %token.hash().short(),
                value = %token.value(),
                created = %format_created(&token.created()),
                "token collected"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCollector
// ---------------------------------------------------------------------------

/// Keeps collected tokens in memory, once per hash.
#[derive(Debug, Default)]
pub struct MemoryCollector {
    seen: Mutex<HashSet<TokenHash>>,
    tokens: Mutex<Vec<Token>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<Token> {
        self.tokens.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect_tokens(&self, tokens: &[Token]) -> Result<(), CollectorError> {
        let mut seen = self.seen.lock();
        let mut stored = self.tokens.lock();
        for token in tokens {
            if seen.insert(token.hash()) {
                stored.push(token.clone());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JournalCollector
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct JournalLine<'a> {
    collected: String,
    token: &'a Token,
}

/// Appends one JSON line per token to a file and fsyncs before returning.
///
/// With an escrow key configured, secrets are sealed to that key before
/// they touch the disk, so the journal alone is not worth stealing.
pub struct JournalCollector {
    path: PathBuf,
    file: Mutex<File>,
    escrow: Option<EscrowPublicKey>,
}

impl JournalCollector {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CollectorError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            escrow: None,
        })
    }

    pub fn with_escrow(mut self, key: EscrowPublicKey) -> Self {
        self.escrow = Some(key);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Collector for JournalCollector {
    fn name(&self) -> &str {
        "journal"
    }

    fn collect_tokens(&self, tokens: &[Token]) -> Result<(), CollectorError> {
        let collected = format_created(&now_created());
        let mut buf = Vec::new();
        for token in tokens {
            let sealed;
            let token = match (&self.escrow, token.is_bearer()) {
                (Some(key), true) => {
                    sealed = token.encrypt_with(key)?;
                    &sealed
                }
                _ => token,
            };
            serde_json::to_writer(
                &mut buf,
                &JournalLine {
                    collected: collected.clone(),
                    token,
                },
            )?;
            buf.push(b'\n');
        }

        let mut file = self.file.lock();
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }
}
