//! Client reconciliation against a live economy.

use crossword_core::{
    api::{Api, StaticCatalog, TokenTable},
    client::{ActionState, ApiBackend, Backend, ClientRules, ClientSession, Notice},
    clock::ManualClock,
    completion::Completion,
    config::EconomyConfig,
    economy::Economy,
    error::{EconError, EconResult},
    feed::{Filter, Subscription},
    snapshot::AccountSnapshot,
    types::{Points, RowIndex},
};
use std::collections::BTreeMap;
use std::sync::Arc;

const ROWS: [&str; 3] = ["cat", "dog", "owl"];

fn api(clock: &Arc<ManualClock>) -> Api {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = EconomyConfig::default_test();
    let tokens = TokenTable::new(config.tokens.clone());
    let eco = Economy::in_memory_with_clock(config, clock.clone()).expect("economy");
    for id in ["alice", "bob", "mod"] {
        eco.register(id, id).unwrap();
    }
    eco.promote_to_moderator("mod").unwrap();
    let catalog = StaticCatalog::default().with_puzzle("p1", &ROWS, "cdo");
    Api::new(eco, Arc::new(tokens), Arc::new(catalog))
}

fn answers() -> BTreeMap<RowIndex, String> {
    ROWS.iter().enumerate().map(|(i, a)| (i as RowIndex, a.to_string())).collect()
}

fn session<B: Backend>(api: &Api, backend: B, clock: &Arc<ManualClock>) -> ClientSession<B> {
    let mut s = ClientSession::new(
        backend,
        "alice",
        "p1",
        answers(),
        ClientRules::from(api.economy().config()),
        clock.clone(),
    );
    s.mount().expect("mount");
    s
}

fn server_balance(api: &Api) -> Points {
    api.economy().ledger().balance("alice").unwrap()
}

/// Fails every row completion; everything else goes to the API.
struct FailingCompletions<'a>(ApiBackend<'a>);

impl Backend for FailingCompletions<'_> {
    fn fetch_snapshot(&self) -> EconResult<AccountSnapshot> {
        self.0.fetch_snapshot()
    }

    fn completed_rows(&self, puzzle_id: &str) -> EconResult<Vec<RowIndex>> {
        self.0.completed_rows(puzzle_id)
    }

    fn complete_row(&self, _: &str, _: RowIndex, _: &str) -> EconResult<Completion> {
        Err(EconError::Other(anyhow::anyhow!("store unavailable")))
    }

    fn request_hint(&self, puzzle_id: &str, row_index: RowIndex, cost: Points) -> EconResult<()> {
        self.0.request_hint(puzzle_id, row_index, cost)
    }

    fn subscribe(&self, filter: Filter) -> EconResult<Subscription> {
        self.0.subscribe(filter)
    }
}

/// Credits the account while the session is attaching its subscription.
struct CreditWhileAttaching<'a> {
    inner: ApiBackend<'a>,
    api: &'a Api,
}

impl Backend for CreditWhileAttaching<'_> {
    fn fetch_snapshot(&self) -> EconResult<AccountSnapshot> {
        self.inner.fetch_snapshot()
    }

    fn completed_rows(&self, puzzle_id: &str) -> EconResult<Vec<RowIndex>> {
        self.inner.completed_rows(puzzle_id)
    }

    fn complete_row(&self, puzzle_id: &str, row_index: RowIndex, answer: &str) -> EconResult<Completion> {
        self.inner.complete_row(puzzle_id, row_index, answer)
    }

    fn request_hint(&self, puzzle_id: &str, row_index: RowIndex, cost: Points) -> EconResult<()> {
        self.inner.request_hint(puzzle_id, row_index, cost)
    }

    fn subscribe(&self, filter: Filter) -> EconResult<Subscription> {
        self.api.economy().ledger().credit("alice", 25)?;
        let subscription = self.inner.subscribe(filter)?;
        self.api.economy().ledger().credit("alice", 25)?;
        Ok(subscription)
    }
}

#[test]
fn mutation_during_mount_is_not_lost() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    let backend = CreditWhileAttaching { inner: ApiBackend::new(&api, "tok-alice"), api: &api };
    let mut s = session(&api, backend, &clock);

    assert_eq!(server_balance(&api), 50);
    assert_eq!(s.view().displayed_balance(), 50);
    s.pump();
    assert_eq!(s.view().displayed_balance(), 50);
}

#[test]
fn failed_completion_rolls_back() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    api.economy().ledger().credit("alice", 5).unwrap();
    let mut s = session(&api, FailingCompletions(ApiBackend::new(&api, "tok-alice")), &clock);
    assert_eq!(s.view().displayed_balance(), 5);

    s.answer_row(0, "cat");
    assert_eq!(s.view().displayed_balance(), 15);
    assert!(s.view().row(0).is_disabled());

    s.pump();
    assert_eq!(s.view().displayed_balance(), 5);
    assert!(!s.view().row(0).is_disabled());
    assert!(matches!(s.view().row(0).action, ActionState::Error { .. }));
    assert!(matches!(s.take_notices().as_slice(), [Notice::RowFailed { row_index: 0, .. }]));

    clock.advance(2_500);
    s.pump();
    assert_eq!(s.view().row(0).action, ActionState::Idle);
    assert_eq!(server_balance(&api), 5);
}

#[test]
fn fresh_completion_takes_the_server_total() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    api.economy().ledger().credit("alice", 3).unwrap();
    let mut s = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);

    s.answer_row(1, "DOG");
    s.pump();
    assert_eq!(s.view().row(1).action, ActionState::Submitted);
    assert_eq!(s.view().displayed_balance(), 13);
    assert_eq!(server_balance(&api), 13);

    // The row stays disabled; answering again sends nothing.
    s.answer_row(1, "dog");
    s.pump();
    assert_eq!(server_balance(&api), 13);
}

#[test]
fn pushed_value_overrides_optimistic_value() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    let mut s = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);

    s.answer_row(0, "cat");
    assert_eq!(s.view().displayed_balance(), 10);
    // Something else credits the account while the completion is in flight.
    api.economy().ledger().credit("alice", 25).unwrap();

    s.pump();
    assert_eq!(server_balance(&api), 35);
    assert_eq!(s.view().displayed_balance(), 35);
}

#[test]
fn other_device_converges_through_pushes() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    let mut phone = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);
    let mut laptop = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);

    phone.answer_row(2, "owl");
    phone.pump();
    laptop.pump();

    assert_eq!(laptop.view().row(2).action, ActionState::Submitted);
    assert_eq!(laptop.view().displayed_balance(), server_balance(&api));
    assert_eq!(phone.view().displayed_balance(), server_balance(&api));
}

#[test]
fn hint_without_confirmation_times_out() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    api.economy().ledger().credit("alice", 20).unwrap();
    let mut s = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);

    s.click_hint(0);
    s.pump();
    assert!(matches!(s.view().hint_state(0, 1), ActionState::Pending { .. }));

    // Clicks while pending are ignored.
    s.click_hint(0);
    s.pump();
    assert_eq!(api.economy().requests().requests_of("alice").unwrap().len(), 1);

    clock.advance(30_000);
    s.pump();
    assert_eq!(s.view().hint_state(0, 1), ActionState::Idle);
    assert!(s
        .take_notices()
        .contains(&Notice::HintTimedOut { row_index: 0, level: 1 }));
}

#[test]
fn approval_push_confirms_the_hint() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    api.economy().ledger().credit("alice", 20).unwrap();
    let mut s = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);

    s.click_hint(0);
    s.pump();
    let requests = api.economy().requests();
    let pending = requests.pending("mod", None).unwrap();
    requests.approve(&pending[0].request_id, "mod").unwrap();

    s.pump();
    assert_eq!(s.view().hint_state(0, 1), ActionState::Submitted);
    assert_eq!(s.view().displayed_balance(), 10);
    assert!(s.take_notices().contains(&Notice::HintGranted { row_index: 0, level: 1 }));

    // The timer was cancelled with the confirmation.
    clock.advance(30_000);
    s.pump();
    assert_eq!(s.view().hint_state(0, 1), ActionState::Submitted);
    assert_eq!(s.view().hint_label(0).as_deref(), Some("buy hint 2 (-20 points)"));
}

#[test]
fn unaffordable_hint_is_not_sent() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    let mut s = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);

    s.click_hint(1);
    s.pump();
    assert_eq!(
        s.take_notices(),
        vec![Notice::NotEnoughPoints { needed: 10, balance: 0 }]
    );
    assert!(api.economy().requests().requests_of("alice").unwrap().is_empty());
}

#[test]
fn unmount_closes_the_subscription() {
    let clock = Arc::new(ManualClock::new());
    let api = api(&clock);
    let feed = Arc::clone(api.economy().feed());
    let mut s = session(&api, ApiBackend::new(&api, "tok-alice"), &clock);
    assert_eq!(feed.subscriber_count(), 1);

    s.unmount();
    s.unmount();
    assert!(!s.is_mounted());
    assert_eq!(feed.subscriber_count(), 0);
}
