// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # upay Protocol: Core Library
//!
//! upay is offline-capable digital cash. A token is a value plus a random
//! secret; whoever holds the secret holds the money. A token authority keeps
//! one row per token hash and flips it from *unused* to *used* exactly once.
//! That single conditional update is the whole double-spend defence.
//!
//! ## Architecture
//!
//! - **token**: The token value type: amounts, secrets, hashes, escrow.
//! - **ledger**: The token authority. Create, void, merge, split, in one
//!   serializable transaction at a time.
//! - **schema**: JSON request and response bodies of the wire protocol.
//! - **client**: Talking to an authority, over HTTP or in-process.
//! - **session**: A purse that pays amounts and survives a flaky network.
//! - **collector**: Where spent tokens go for bookkeeping.
//! - **crypto**: SHA-512, X25519, AES-256-GCM. Thin wrappers, nothing clever.
//! - **config**: Protocol constants.
//!
//! ## Ground Rules
//!
//! 1. Money is cents in a `u64`. Never a float.
//! 2. Secrets never reach a log line or a `Debug` impl.
//! 3. A timeout is not a failure. Read back before deciding anything.
//! 4. If it touches money, it has tests. Plural.

pub mod client;
pub mod collector;
pub mod config;
pub mod crypto;
pub mod ledger;
pub mod schema;
pub mod session;
pub mod token;

pub use client::{ClientConfig, ClientError, LocalTokenService, TokenClient, TokenService};
pub use collector::{Collector, CollectorError, JournalCollector, LogCollector, MemoryCollector};
pub use ledger::{AuthorityConfig, LedgerError, TokenAuthority};
pub use session::{Session, SessionConfig, SessionError, SessionManager};
pub use token::{Amount, Token, TokenError, TokenHash};
