//! Change propagation: full snapshots, filters, unsubscribe.

use crossword_core::{
    clock::ManualClock,
    config::EconomyConfig,
    economy::Economy,
    feed::{Change, ChangeFeed, Filter},
    request::{RequestKind, RequestKindTag, RequestStatus},
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn economy() -> Economy {
    let _ = env_logger::builder().is_test(true).try_init();
    let eco = Economy::in_memory_with_clock(EconomyConfig::default_test(), Arc::new(ManualClock::new()))
        .expect("in-memory economy");
    eco.register("alice", "Alice").unwrap();
    eco.register("bob", "Bob").unwrap();
    eco.register("mod", "Moderator").unwrap();
    eco.promote_to_moderator("mod").unwrap();
    eco
}

fn balances(changes: &[Change]) -> Vec<i64> {
    changes
        .iter()
        .filter_map(|c| match c {
            Change::Account { snapshot } => Some(snapshot.balance),
            Change::Request { .. } => None,
        })
        .collect()
}

#[test]
fn subscriber_sees_every_mutation_as_a_full_snapshot() {
    let eco = economy();
    let sub = eco.feed().subscribe(Filter::account("alice"));

    eco.ledger().credit("alice", 30).unwrap();
    eco.ledger().debit("alice", 12).unwrap();

    let changes = sub.drain();
    assert_eq!(balances(&changes), vec![30, 18]);
    let Change::Account { snapshot } = &changes[1] else { panic!("account change expected") };
    assert_eq!(snapshot.account_id, "alice");
    assert_eq!(snapshot.display_name, "Alice");
}

#[test]
fn account_filter_ignores_other_accounts() {
    let eco = economy();
    let sub = eco.feed().subscribe(Filter::account("alice"));
    eco.ledger().credit("bob", 5).unwrap();
    assert!(sub.try_next().is_none());
}

#[test]
fn no_replay_for_late_subscribers() {
    let eco = economy();
    eco.ledger().credit("alice", 5).unwrap();
    let sub = eco.feed().subscribe(Filter::account("alice"));
    assert!(sub.drain().is_empty());
}

#[test]
fn every_subscription_gets_the_same_value() {
    let eco = economy();
    let subs: Vec<_> = (0..3).map(|_| eco.feed().subscribe(Filter::account("alice"))).collect();
    eco.ledger().credit("alice", 7).unwrap();
    for sub in &subs {
        assert_eq!(balances(&sub.drain()), vec![7]);
    }
}

#[test]
fn request_collection_filter_by_kind() {
    let eco = economy();
    let hints = eco.feed().subscribe(Filter::requests(Some(RequestKindTag::HintPurchase)));
    let all = eco.feed().subscribe(Filter::requests(None));
    let requests = eco.requests();

    let hint = requests
        .create_request("alice", RequestKind::HintPurchase { puzzle_id: "p1".into(), row_index: 0 }, 10)
        .unwrap();
    requests
        .create_request("bob", RequestKind::Submission { target: "p2".into() }, 10)
        .unwrap();
    requests.reject(&hint.request_id, "mod").unwrap();

    let hint_changes = hints.drain();
    assert_eq!(hint_changes.len(), 2);
    let Change::Request { request } = &hint_changes[1] else { panic!("request change expected") };
    assert_eq!(request.status, RequestStatus::Rejected);
    assert_eq!(all.drain().len(), 3);
}

#[test]
fn unsubscribe_is_idempotent() {
    let eco = economy();
    let feed = eco.feed();
    let mut sub = feed.subscribe(Filter::account("alice"));
    assert_eq!(feed.subscriber_count(), 1);

    sub.unsubscribe();
    sub.unsubscribe();
    assert!(sub.is_closed());
    assert_eq!(feed.subscriber_count(), 0);

    eco.ledger().credit("alice", 1).unwrap();
    assert!(sub.try_next().is_none());
}

#[test]
fn dropping_a_subscription_detaches_it() {
    let feed = ChangeFeed::new();
    {
        let _sub = feed.subscribe(Filter::account("alice"));
        assert_eq!(feed.subscriber_count(), 1);
    }
    assert_eq!(feed.subscriber_count(), 0);
}

#[test]
fn pushes_cross_threads_and_connections() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("feed.db");
    let base = Economy::open(
        path.to_str().expect("utf-8 path"),
        EconomyConfig::default_test(),
        ChangeFeed::new(),
        Arc::new(ManualClock::new()),
    )
    .expect("open");
    base.register("alice", "Alice").unwrap();
    let sub = base.feed().subscribe(Filter::account("alice"));

    let writer = base.reopen().expect("reopen");
    thread::spawn(move || writer.ledger().credit("alice", 42))
        .join()
        .expect("thread")
        .expect("credit");

    match sub.next_timeout(Duration::from_secs(1)) {
        Some(Change::Account { snapshot }) => assert_eq!(snapshot.balance, 42),
        other => panic!("expected a pushed snapshot, got {other:?}"),
    }
}
