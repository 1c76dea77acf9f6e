//! Ledger: conditional debits, idempotent grants, direct purchases.

use crossword_core::{
    clock::ManualClock,
    config::EconomyConfig,
    economy::Economy,
    error::EconError,
    feed::ChangeFeed,
    types::{GrantSet, Points},
};
use std::sync::Arc;
use std::thread;

fn economy() -> Economy {
    let _ = env_logger::builder().is_test(true).try_init();
    Economy::in_memory_with_clock(EconomyConfig::default_test(), Arc::new(ManualClock::new()))
        .expect("in-memory economy")
}

fn funded(eco: &Economy, account_id: &str, balance: Points) {
    eco.register(account_id, account_id).expect("register");
    if balance > 0 {
        eco.ledger().credit(account_id, balance).expect("credit");
    }
}

#[test]
fn registration_starts_at_zero() {
    let eco = economy();
    let account = eco.register("alice", "Alice").expect("register");
    assert_eq!(account.balance, 0);
    assert!(account.hints.is_empty());

    // Registering again keeps the existing account.
    eco.ledger().credit("alice", 5).expect("credit");
    let again = eco.register("alice", "Someone else").expect("register again");
    assert_eq!(again.balance, 5);
    assert_eq!(again.display_name, "Alice");
}

#[test]
fn debit_never_goes_below_zero() {
    let eco = economy();
    funded(&eco, "alice", 9);

    let err = eco.ledger().debit("alice", 10).unwrap_err();
    assert!(matches!(
        err,
        EconError::InsufficientFunds { balance: 9, required: 10, .. }
    ));
    assert_eq!(eco.ledger().balance("alice").unwrap(), 9);
    assert_eq!(eco.store().event_count("debit_refused").unwrap(), 1);

    assert_eq!(eco.ledger().debit("alice", 9).unwrap(), 0);
    assert!(eco.ledger().debit("alice", 1).is_err());
    assert_eq!(eco.ledger().balance("alice").unwrap(), 0);
}

#[test]
fn amounts_must_be_positive() {
    let eco = economy();
    funded(&eco, "alice", 10);
    assert!(matches!(eco.ledger().credit("alice", 0), Err(EconError::Validation(_))));
    assert!(matches!(eco.ledger().debit("alice", -5), Err(EconError::Validation(_))));
    assert_eq!(eco.ledger().balance("alice").unwrap(), 10);
}

#[test]
fn unknown_account_is_not_found() {
    let eco = economy();
    assert!(matches!(eco.ledger().credit("ghost", 5), Err(EconError::NotFound { .. })));
    assert!(matches!(eco.ledger().debit("ghost", 5), Err(EconError::NotFound { .. })));
}

#[test]
fn grant_is_idempotent() {
    let eco = economy();
    funded(&eco, "alice", 0);
    let ledger = eco.ledger();

    assert!(ledger.grant("alice", GrantSet::Hints, "p1:0:h1").unwrap());
    let version = ledger.snapshot("alice").unwrap().version;
    assert!(!ledger.grant("alice", GrantSet::Hints, "p1:0:h1").unwrap());

    let snapshot = ledger.snapshot("alice").unwrap();
    assert_eq!(snapshot.hints.len(), 1);
    assert_eq!(snapshot.version, version, "a no-op grant must not bump the version");
}

#[test]
fn every_mutation_bumps_the_version() {
    let eco = economy();
    funded(&eco, "alice", 0);
    let ledger = eco.ledger();
    let v0 = ledger.snapshot("alice").unwrap().version;
    ledger.credit("alice", 10).unwrap();
    let v1 = ledger.snapshot("alice").unwrap().version;
    ledger.debit("alice", 5).unwrap();
    let v2 = ledger.snapshot("alice").unwrap().version;
    ledger.grant("alice", GrantSet::Images, "img-1").unwrap();
    let v3 = ledger.snapshot("alice").unwrap().version;
    assert!(v0 < v1 && v1 < v2 && v2 < v3);
}

#[test]
fn purchase_debits_and_grants() {
    let eco = economy();
    funded(&eco, "alice", 10);

    let purchase = eco
        .ledger()
        .purchase("alice", GrantSet::Images, "img-1", 6)
        .unwrap();
    assert_eq!(purchase.balance_after, 4);

    let err = eco
        .ledger()
        .purchase("alice", GrantSet::Images, "img-1", 6)
        .unwrap_err();
    assert!(matches!(err, EconError::AlreadyOwned { .. }));
    assert_eq!(eco.ledger().balance("alice").unwrap(), 4, "owned value must not be charged twice");
}

#[test]
fn purchase_refused_leaves_grants_untouched() {
    let eco = economy();
    funded(&eco, "alice", 3);
    let err = eco
        .ledger()
        .purchase("alice", GrantSet::Images, "img-1", 6)
        .unwrap_err();
    assert!(matches!(err, EconError::InsufficientFunds { .. }));
    let snapshot = eco.ledger().snapshot("alice").unwrap();
    assert_eq!(snapshot.balance, 3);
    assert!(snapshot.images.is_empty());
}

#[test]
fn concurrent_debits_cannot_overdraw() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.db");
    let base = Economy::open(
        path.to_str().expect("utf-8 path"),
        EconomyConfig::default_test(),
        ChangeFeed::new(),
        Arc::new(ManualClock::new()),
    )
    .expect("open");
    funded(&base, "alice", 50);

    // Twelve debits of 10 against a balance of 50.
    let handles: Vec<_> = (0..12)
        .map(|_| {
            let eco = base.reopen().expect("reopen");
            thread::spawn(move || eco.ledger().debit("alice", 10))
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.join().expect("thread") {
            Ok(balance) => {
                assert!(balance >= 0);
                succeeded += 1;
            }
            Err(EconError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(succeeded, 5);
    assert_eq!(base.ledger().balance("alice").unwrap(), 0);
}

#[test]
fn audit_log_records_each_mutation() {
    let eco = economy();
    funded(&eco, "alice", 10);
    eco.ledger().debit("alice", 4).unwrap();

    let types: Vec<String> = eco
        .store()
        .events_for_account("alice")
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["account_registered", "credited", "debited"]);
}
