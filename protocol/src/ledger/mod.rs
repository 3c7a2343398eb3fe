//! # Ledger Module
//!
//! The token authority: a durable map from token hash to lifecycle state,
//! and the transactional create/void/validate/merge/split operations on it.
//!
//! ```text
//! authority.rs: TokenAuthority and its AuthorityConnection transactions
//! db.rs       : sled storage, ledger rows
//! clock.rs    : injectable time source for staleness checks
//! error.rs    : LedgerError
//! ```
//!
//! Per token the state machine is as small as it gets:
//!
//! ```text
//!   (absent) ──create──► Unused ──void──► Used
//! ```
//!
//! `Used` is terminal. Only `bootstrap` deletes rows.

pub mod authority;
pub mod clock;
pub mod db;
pub mod error;

pub use authority::{AuthorityConfig, AuthorityConnection, CommitSummary, TokenAuthority};
pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{LedgerDb, LedgerRow};
pub use error::{LedgerError, LedgerResult};
