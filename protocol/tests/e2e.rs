//! End-to-end integration tests for upay.
//!
//! These tests drive the public API the way an embedding application would:
//! mint tokens on an authority, move value around with transforms, and pay
//! out of a session. They prove the pieces compose: token hashing, the
//! ledger's optimistic transactions, the wire checks in front of it, the
//! session's bookkeeping and the collectors behind it.
//!
//! Each test stands alone with its own temporary ledger. No shared state, no
//! test ordering dependencies.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration as ChronoDuration, Utc};

use upay_protocol::client::{ClientError, LocalTokenService, TokenService};
use upay_protocol::collector::{JournalCollector, MemoryCollector};
use upay_protocol::crypto::EscrowSecretKey;
use upay_protocol::ledger::{LedgerError, ManualClock, TokenAuthority};
use upay_protocol::session::{SessionError, SessionManager};
use upay_protocol::token::{Amount, Token};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn cents(c: u64) -> Amount {
    Amount::from_cents(c)
}

fn units(u: u64) -> Amount {
    Amount::from_cents(u * 100)
}

fn fresh(values: &[Amount]) -> Vec<Token> {
    values.iter().map(|v| Token::create(*v).unwrap()).collect()
}

fn total(tokens: &[Token]) -> Amount {
    tokens.iter().map(Token::value).sum()
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[test]
fn split_then_merge_conserves_value() {
    let authority = TokenAuthority::open_temporary().unwrap();
    let ten = authority.issue_tokens(units(10), 1).unwrap();

    let parts = fresh(&[units(1), units(2), units(3), units(4)]);
    let mut conn = authority.connect();
    let split = conn.split_token(&ten[0], &parts).unwrap();
    conn.commit().unwrap();

    assert_eq!(authority.validate_tokens(&split).unwrap().len(), 4);
    assert!(authority.validate_tokens(&ten).unwrap().is_empty());

    let mut conn = authority.connect();
    let merged = conn.merge_tokens(&split).unwrap();
    conn.commit().unwrap();

    assert_eq!(merged.value(), units(10));
    assert_eq!(authority.validate_tokens(&[merged]).unwrap().len(), 1);
    assert!(authority.validate_tokens(&split).unwrap().is_empty());
}

#[test]
fn unbalanced_split_leaves_ledger_untouched() {
    let authority = TokenAuthority::open_temporary().unwrap();
    let ten = authority.issue_tokens(units(10), 1).unwrap();

    let mut conn = authority.connect();
    let result = conn.split_token(&ten[0], &fresh(&[units(5), units(4)]));
    assert!(matches!(result, Err(LedgerError::ValueMismatch { .. })));
    conn.commit().unwrap();

    assert_eq!(authority.validate_tokens(&ten).unwrap().len(), 1);
}

#[test]
fn stale_token_is_refused() {
    let clock = Arc::new(ManualClock::starting_now());
    let authority = TokenAuthority::open_temporary()
        .unwrap()
        .with_clock(clock.clone());

    let old = Token::create_at(units(1), Utc::now() - ChronoDuration::seconds(120)).unwrap();
    let mut conn = authority.connect();
    assert!(matches!(
        conn.create_token(&old),
        Err(LedgerError::StaleToken { .. })
    ));
}

#[test]
fn one_of_many_concurrent_spenders_wins() {
    const SPENDERS: usize = 8;

    let authority = TokenAuthority::open_temporary().unwrap();
    let coin = authority.issue_tokens(units(5), 1).unwrap();
    let barrier = Arc::new(Barrier::new(SPENDERS));

    let handles: Vec<_> = (0..SPENDERS)
        .map(|_| {
            let authority = authority.clone();
            let coin = coin.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let outputs = fresh(&[units(5)]);
                barrier.wait();
                authority.transform(&coin, &outputs).map(|_| outputs)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(LedgerError::is_contention));

    // Exactly one set of outputs exists; value was not duplicated.
    assert_eq!(authority.validate_tokens(winners[0]).unwrap().len(), 1);
}

#[test]
fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");

    let issued = {
        let authority = TokenAuthority::open(&path, Default::default()).unwrap();
        authority.issue_tokens(units(2), 3).unwrap()
    };

    let authority = TokenAuthority::open(&path, Default::default()).unwrap();
    assert_eq!(authority.validate_tokens(&issued).unwrap(), issued);
}

// ---------------------------------------------------------------------------
// Transform protocol through the service seam
// ---------------------------------------------------------------------------

#[test]
fn service_rejects_overdrawn_and_replayed_transforms() {
    let service = LocalTokenService::new(TokenAuthority::open_temporary().unwrap());
    let inputs = service.authority().issue_tokens(units(1), 2).unwrap();

    assert_eq!(
        service.transform_tokens(&inputs, &fresh(&[units(3)])),
        Err(ClientError::InsufficientCredit { amount: units(1) })
    );

    let outputs = fresh(&[cents(150), cents(50)]);
    assert_eq!(service.transform_tokens(&inputs, &outputs).unwrap(), outputs);

    // Replaying the identical request cannot apply twice.
    assert!(service.transform_tokens(&inputs, &outputs).is_err());
    assert_eq!(total(&service.validate_tokens(&outputs).unwrap()), units(2));
}

#[test]
fn created_tokens_are_not_registered() {
    let service = LocalTokenService::new(TokenAuthority::open_temporary().unwrap());
    let created = service.create_tokens(&[cents(25), units(1)]).unwrap();
    assert_eq!(created.len(), 2);
    assert!(service.validate_tokens(&created).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[test]
fn cashing_with_half_unit_tokens() {
    let authority = TokenAuthority::open_temporary().unwrap();
    let memory = Arc::new(MemoryCollector::new());
    let manager = SessionManager::new(LocalTokenService::new(authority.clone()))
        .with_collector(memory.clone());
    let purse = authority.issue_tokens(cents(50), 4).unwrap();

    let (credit, total_cashed) = manager
        .with_session(|session| {
            assert_eq!(session.validate_tokens(purse.clone())?, units(2));
            assert!(matches!(
                session.cash(cents(210)),
                Err(SessionError::InsufficientCredit { .. })
            ));
            session.cash(units(1))?;
            session.cash(cents(25))?;
            assert!(session.cash(units(1)).is_err());
            Ok((session.credit(), session.total()))
        })
        .unwrap();

    assert_eq!(credit, cents(50));
    assert_eq!(total_cashed, cents(150));
    assert_eq!(total(&memory.collected()), cents(150));
    assert_eq!(authority.validate_tokens(&purse).unwrap().len(), 1);
}

#[test]
fn failed_session_gives_the_money_back() {
    let authority = TokenAuthority::open_temporary().unwrap();
    let memory = Arc::new(MemoryCollector::new());
    let manager = SessionManager::new(LocalTokenService::new(authority.clone()))
        .with_collector(memory.clone());
    let purse = authority.issue_tokens(cents(50), 4).unwrap();

    let mut remaining = Vec::new();
    let result: Result<(), SessionError> = manager.with_session(|session| {
        session.validate_tokens(purse.clone())?;
        session.cash(units(1))?;
        remaining = session.tokens().to_vec();
        Err(SessionError::ZeroAmount)
    });

    assert!(matches!(result, Err(SessionError::ZeroAmount)));
    assert!(memory.is_empty());
    // Two originals untouched, two replaced by fresh tokens: still 2.00.
    assert_eq!(authority.validate_tokens(&purse).unwrap().len(), 2);
    assert_eq!(authority.validate_tokens(&remaining).unwrap().len(), 2);
    assert_eq!(authority.db().row_count(), 4 + 1 + 2);
}

#[test]
fn journal_collector_keeps_escrowed_receipts() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("receipts.jsonl");
    let escrow = EscrowSecretKey::generate();

    let authority = TokenAuthority::open_temporary().unwrap();
    let journal = JournalCollector::open(&journal_path)
        .unwrap()
        .with_escrow(escrow.public_key());
    let manager =
        SessionManager::new(LocalTokenService::new(authority.clone())).with_collector(Arc::new(journal));
    let purse = authority.issue_tokens(units(3), 1).unwrap();

    manager
        .with_session(|session| {
            session.validate_tokens(purse.clone())?;
            session.cash(units(3))
        })
        .unwrap();

    let content = std::fs::read_to_string(&journal_path).unwrap();
    let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
    let sealed: Token = serde_json::from_value(line["token"].clone()).unwrap();
    assert!(!sealed.is_bearer());

    // The operator can recover the receipt and it is live on the ledger.
    let receipt = sealed.decrypt_with(&escrow).unwrap();
    assert_eq!(receipt.value(), units(3));
    assert_eq!(authority.validate_tokens(&[receipt]).unwrap().len(), 1);
}
