//! Drives a `ClientView` against a backend: executes its effects, feeds the
//! results and pushed snapshots back in.
//!
//! Lifecycle: `mount` fetches the snapshot, then attaches the subscription.
//! Actions only queue effects; `pump` runs one reconciliation cycle.

use super::view::{ClientEvent, ClientRules, ClientView, Effect, Notice};
use crate::{
    api::{Api, ApiResponse},
    clock::Clock,
    command::ApiCall,
    completion::Completion,
    error::{EconError, EconResult},
    feed::{Change, Filter, Subscription},
    request::RequestKindTag,
    snapshot::AccountSnapshot,
    types::{Points, RowIndex},
};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// What a client needs from the server side.
pub trait Backend {
    fn fetch_snapshot(&self) -> EconResult<AccountSnapshot>;
    fn completed_rows(&self, puzzle_id: &str) -> EconResult<Vec<RowIndex>>;
    fn complete_row(&self, puzzle_id: &str, row_index: RowIndex, answer: &str) -> EconResult<Completion>;
    fn request_hint(&self, puzzle_id: &str, row_index: RowIndex, cost: Points) -> EconResult<()>;
    fn subscribe(&self, filter: Filter) -> EconResult<Subscription>;
}

/// Backend that talks to an in-process `Api` with one bearer credential.
pub struct ApiBackend<'a> {
    api: &'a Api,
    bearer: String,
}

impl<'a> ApiBackend<'a> {
    pub fn new(api: &'a Api, bearer: impl Into<String>) -> Self {
        Self { api, bearer: bearer.into() }
    }

    fn call<T: DeserializeOwned>(&self, call: ApiCall) -> EconResult<T> {
        let ApiResponse { status, body } = self.api.handle(&self.bearer, &call);
        if !(200..300).contains(&status) {
            let message = body["error"].as_str().unwrap_or("request failed").to_string();
            return Err(EconError::Other(anyhow::anyhow!("{} returned {status}: {message}", call.route)));
        }
        Ok(serde_json::from_value(body)?)
    }
}

#[derive(serde::Deserialize)]
struct ProfileBody {
    account: AccountSnapshot,
}

impl Backend for ApiBackend<'_> {
    fn fetch_snapshot(&self) -> EconResult<AccountSnapshot> {
        self.call::<ProfileBody>(ApiCall::route("profile")).map(|b| b.account)
    }

    fn completed_rows(&self, puzzle_id: &str) -> EconResult<Vec<RowIndex>> {
        self.call(ApiCall {
            puzzle_id: Some(puzzle_id.to_string()),
            ..ApiCall::route("rows.completed")
        })
    }

    fn complete_row(&self, puzzle_id: &str, row_index: RowIndex, answer: &str) -> EconResult<Completion> {
        self.call(ApiCall {
            puzzle_id: Some(puzzle_id.to_string()),
            row_index: Some(i64::from(row_index)),
            answer: Some(answer.to_string()),
            ..ApiCall::route("rows.complete")
        })
    }

    fn request_hint(&self, puzzle_id: &str, row_index: RowIndex, cost: Points) -> EconResult<()> {
        self.call::<serde_json::Value>(ApiCall {
            kind: Some(RequestKindTag::HintPurchase.as_str().to_string()),
            puzzle_id: Some(puzzle_id.to_string()),
            row_index: Some(i64::from(row_index)),
            cost: Some(cost),
            ..ApiCall::route("requests.create")
        })
        .map(|_| ())
    }

    fn subscribe(&self, filter: Filter) -> EconResult<Subscription> {
        self.api.subscribe(&self.bearer, filter)
    }
}

pub struct ClientSession<B: Backend> {
    backend: B,
    view: ClientView,
    clock: Arc<dyn Clock>,
    subscription: Option<Subscription>,
    outbox: VecDeque<Effect>,
    notices: Vec<Notice>,
}

impl<B: Backend> ClientSession<B> {
    pub fn new(
        backend: B,
        account_id: &str,
        puzzle_id: &str,
        answers: BTreeMap<RowIndex, String>,
        rules: ClientRules,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            view: ClientView::new(account_id, puzzle_id, answers, rules),
            clock,
            subscription: None,
            outbox: VecDeque::new(),
            notices: Vec::new(),
        }
    }

    /// Attach to the feed, fetch the account snapshot and completed rows,
    /// then apply whatever was pushed in between.
    pub fn mount(&mut self) -> EconResult<()> {
        // Attach before fetching: the feed does not replay, and pushes that
        // predate the fetched snapshot are dropped by version.
        let filter = Filter::account(self.view.account_id());
        let subscription = self.backend.subscribe(filter)?;
        let snapshot = self.backend.fetch_snapshot()?;
        self.dispatch(ClientEvent::SnapshotLoaded(snapshot));
        let rows = self.backend.completed_rows(self.view.puzzle_id())?;
        self.dispatch(ClientEvent::CompletedRowsLoaded(rows));
        self.subscription = Some(subscription);
        self.drain_pushes();
        Ok(())
    }

    /// Close the subscription and drop every timer. Safe to call twice.
    pub fn unmount(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.view.clear_timers();
        self.outbox.clear();
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn view(&self) -> &ClientView {
        &self.view
    }

    pub fn answer_row(&mut self, row_index: RowIndex, answer: &str) {
        self.dispatch(ClientEvent::RowAnswered { row_index, answer: answer.to_string() });
    }

    pub fn click_hint(&mut self, row_index: RowIndex) {
        self.dispatch(ClientEvent::HintClicked { row_index });
    }

    /// One reconciliation cycle: send queued calls, apply their responses,
    /// then apply every snapshot pushed so far, then fire due timers.
    pub fn pump(&mut self) {
        while let Some(effect) = self.outbox.pop_front() {
            self.execute(effect);
        }
        self.drain_pushes();
        self.dispatch(ClientEvent::Tick);
    }

    /// Notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn drain_pushes(&mut self) {
        let pushed = self
            .subscription
            .as_ref()
            .map(Subscription::drain)
            .unwrap_or_default();
        for change in pushed {
            if let Change::Account { snapshot } = change {
                self.dispatch(ClientEvent::AccountPushed(snapshot));
            }
        }
    }

    fn dispatch(&mut self, event: ClientEvent) {
        let now = self.clock.now_ms();
        for effect in self.view.apply(event, now) {
            match effect {
                Effect::Notify(notice) => self.notices.push(notice),
                send => self.outbox.push_back(send),
            }
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::SendRowCompletion { puzzle_id, row_index, answer } => {
                let result = self
                    .backend
                    .complete_row(&puzzle_id, row_index, &answer)
                    .map_err(|e| e.public_message());
                self.dispatch(ClientEvent::RowResponse { row_index, result });
            }
            Effect::SendHintRequest { puzzle_id, row_index, level, cost } => {
                if let Err(e) = self.backend.request_hint(&puzzle_id, row_index, cost) {
                    self.dispatch(ClientEvent::HintRequestFailed {
                        row_index,
                        level,
                        message: e.public_message(),
                    });
                }
            }
            Effect::Notify(notice) => self.notices.push(notice),
        }
    }
}

impl<B: Backend> Drop for ClientSession<B> {
    fn drop(&mut self) {
        self.unmount();
    }
}
