//! # Ledger Storage
//!
//! The persistence layer of the token authority, built on sled's embedded
//! key-value store. The whole ledger is one tree:
//!
//! | Tree     | Key               | Value              |
//! |----------|-------------------|--------------------|
//! | `tokens` | hash (128 hex)    | `bincode(LedgerRow)` |
//!
//! Rows are never deleted. Spending a token stamps `used`; the row stays
//! behind as the audit trail.
//!
//! All mutations go through sled transactions opened by
//! [`AuthorityConnection::commit`](super::authority::AuthorityConnection::commit);
//! this module only knows how to open the tree and read and encode rows.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;

use super::error::{LedgerError, LedgerResult};
use crate::token::TokenHash;

/// Name of the sled tree holding the ledger.
const TOKENS_TREE: &str = "tokens";

// ---------------------------------------------------------------------------
// LedgerRow
// ---------------------------------------------------------------------------

/// What the ledger knows about one token. Timestamps are unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub created: i64,
    pub used: Option<i64>,
}

impl LedgerRow {
    pub fn unused(created: DateTime<Utc>) -> Self {
        Self {
            created: created.timestamp(),
            used: None,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used.is_some()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.created, 0).single()
    }

    pub fn used_at(&self) -> Option<DateTime<Utc>> {
        self.used.and_then(|t| Utc.timestamp_opt(t, 0).single())
    }

    pub fn encode(&self) -> LedgerResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> LedgerResult<Self> {
        bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}

/// Ledger key for a token hash.
pub fn row_key(hash: &TokenHash) -> Vec<u8> {
    hash.to_hex().into_bytes()
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Handle on the sled database backing a token authority.
///
/// Cheap to clone: sled handles are reference counted and safe to share
/// across threads without external locking.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    tokens: Tree,
}

impl LedgerDb {
    /// Open or create a ledger at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A ledger that lives in memory and disappears on drop. For tests and
    /// throwaway dev servers.
    pub fn open_temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        let tokens = db.open_tree(TOKENS_TREE)?;
        Ok(Self { db, tokens })
    }

    pub(crate) fn tokens(&self) -> &Tree {
        &self.tokens
    }

    /// Committed row for `hash`, if any.
    pub fn get(&self, hash: &TokenHash) -> LedgerResult<Option<LedgerRow>> {
        self.tokens
            .get(row_key(hash))?
            .map(|bytes| LedgerRow::decode(&bytes))
            .transpose()
    }

    /// Number of rows, used and unused. Walks the tree.
    pub fn row_count(&self) -> usize {
        self.tokens.len()
    }

    /// Cheap read to prove the database answers.
    pub fn ping(&self) -> LedgerResult<()> {
        self.tokens.first()?;
        Ok(())
    }

    /// Drop every row. Only reachable through an explicitly enabled
    /// bootstrap.
    pub(crate) fn clear(&self) -> LedgerResult<()> {
        self.tokens.clear()?;
        self.flush()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_temporary_ledger_is_empty() {
        let db = LedgerDb::open_temporary().expect("should create temp ledger");
        assert_eq!(db.row_count(), 0);
        db.ping().unwrap();
    }

    #[test]
    fn open_persistent_ledger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hash = TokenHash::from_bytes([3u8; 64]);
        {
            let db = LedgerDb::open(dir.path()).expect("should open ledger");
            db.tokens()
                .insert(row_key(&hash), LedgerRow { created: 10, used: None }.encode().unwrap())
                .unwrap();
            db.flush().unwrap();
        }

        let db = LedgerDb::open(dir.path()).expect("should reopen ledger");
        assert_eq!(db.get(&hash).unwrap(), Some(LedgerRow { created: 10, used: None }));
    }

    #[test]
    fn row_encoding_roundtrip() {
        let row = LedgerRow {
            created: 1_700_000_000,
            used: Some(1_700_000_100),
        };
        assert_eq!(LedgerRow::decode(&row.encode().unwrap()).unwrap(), row);
        assert!(row.is_used());
        assert_eq!(row.used_at().unwrap().timestamp(), 1_700_000_100);
    }

    #[test]
    fn corrupt_row_is_a_serialization_error() {
        assert!(matches!(
            LedgerRow::decode(&[1, 2]),
            Err(LedgerError::Serialization(_))
        ));
    }

    #[test]
    fn keys_are_hex_hashes() {
        let hash = TokenHash::from_bytes([0xAB; 64]);
        assert_eq!(row_key(&hash).len(), 128);
        assert!(row_key(&hash).iter().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn clear_removes_everything() {
        let db = LedgerDb::open_temporary().unwrap();
        let hash = TokenHash::from_bytes([1u8; 64]);
        db.tokens()
            .insert(row_key(&hash), LedgerRow { created: 1, used: None }.encode().unwrap())
            .unwrap();
        assert_eq!(db.row_count(), 1);
        db.clear().unwrap();
        assert_eq!(db.row_count(), 0);
    }
}
