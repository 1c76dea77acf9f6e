//! Puzzle view state for one account on one puzzle, as a pure reducer.
//!
//! RULES:
//!   - `apply` never performs I/O. Outbound calls come back as `Effect`s
//!     for the session to execute; their results return as events.
//!   - The last authoritative value received wins. An account snapshot
//!     older than the one held is dropped.
//!   - Membership in a server grant set forces the matching local element
//!     to its terminal state, whatever it was doing locally.

use crate::{
    completion::Completion,
    config::{ClientTiming, EconomyConfig},
    snapshot::AccountSnapshot,
    types::{AccountId, Points, PuzzleId, RowIndex, RowKey},
};
use std::collections::BTreeMap;

/// Lifecycle of one user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    /// Sent, waiting for the server. `deadline_ms` is set for actions that
    /// fall back to idle when no confirmation arrives in time.
    Pending { deadline_ms: Option<u64> },
    Submitted,
    /// Failed; becomes idle again at `retry_at_ms`.
    Error { retry_at_ms: u64, message: String },
}

impl ActionState {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Pending { .. } | Self::Submitted)
    }
}

/// Economy numbers the view needs to act optimistically.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRules {
    pub row_reward: Points,
    pub first_hint_cost: Points,
    pub second_hint_cost: Points,
    pub timing: ClientTiming,
}

impl ClientRules {
    pub fn hint_cost(&self, level: u8) -> Points {
        if level <= 1 {
            self.first_hint_cost
        } else {
            self.second_hint_cost
        }
    }
}

impl From<&EconomyConfig> for ClientRules {
    fn from(config: &EconomyConfig) -> Self {
        Self {
            row_reward: config.row_reward,
            first_hint_cost: config.first_hint_cost,
            second_hint_cost: config.second_hint_cost,
            timing: config.client.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Initial profile fetch.
    SnapshotLoaded(AccountSnapshot),
    /// Initial completed-rows fetch for this puzzle.
    CompletedRowsLoaded(Vec<RowIndex>),
    /// The player typed an answer for a row.
    RowAnswered { row_index: RowIndex, answer: String },
    RowResponse { row_index: RowIndex, result: Result<Completion, String> },
    HintClicked { row_index: RowIndex },
    HintRequestFailed { row_index: RowIndex, level: u8, message: String },
    /// Account snapshot from the change feed.
    AccountPushed(AccountSnapshot),
    Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SendRowCompletion { puzzle_id: PuzzleId, row_index: RowIndex, answer: String },
    SendHintRequest { puzzle_id: PuzzleId, row_index: RowIndex, level: u8, cost: Points },
    Notify(Notice),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Incorrect { row_index: RowIndex },
    NotEnoughPoints { needed: Points, balance: Points },
    RowFailed { row_index: RowIndex, message: String },
    HintFailed { row_index: RowIndex, level: u8, message: String },
    HintTimedOut { row_index: RowIndex, level: u8 },
    HintGranted { row_index: RowIndex, level: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowView {
    pub action: ActionState,
    /// Reward added to the displayed balance and not yet superseded by an
    /// authoritative value.
    pub optimistic_reward: Option<Points>,
}

impl Default for RowView {
    fn default() -> Self {
        Self { action: ActionState::Idle, optimistic_reward: None }
    }
}

impl RowView {
    /// Disabled rows take no input.
    pub fn is_disabled(&self) -> bool {
        self.action.is_busy()
    }
}

pub struct ClientView {
    account_id: AccountId,
    puzzle_id: PuzzleId,
    answers: BTreeMap<RowIndex, String>,
    rules: ClientRules,
    server: Option<AccountSnapshot>,
    displayed_balance: Points,
    rows: BTreeMap<RowIndex, RowView>,
    hints: BTreeMap<(RowIndex, u8), ActionState>,
}

impl ClientView {
    /// `answers` are the row answers the client holds locally for its
    /// own matching; the server checks again.
    pub fn new(
        account_id: impl Into<AccountId>,
        puzzle_id: impl Into<PuzzleId>,
        answers: BTreeMap<RowIndex, String>,
        rules: ClientRules,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            puzzle_id: puzzle_id.into(),
            answers,
            rules,
            server: None,
            displayed_balance: 0,
            rows: BTreeMap::new(),
            hints: BTreeMap::new(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn puzzle_id(&self) -> &str {
        &self.puzzle_id
    }

    pub fn displayed_balance(&self) -> Points {
        self.displayed_balance
    }

    /// Version of the last authoritative account state applied.
    pub fn version(&self) -> u64 {
        self.server.as_ref().map_or(0, |s| s.version)
    }

    pub fn server_snapshot(&self) -> Option<&AccountSnapshot> {
        self.server.as_ref()
    }

    pub fn row(&self, row_index: RowIndex) -> RowView {
        self.rows.get(&row_index).cloned().unwrap_or_default()
    }

    pub fn hint_state(&self, row_index: RowIndex, level: u8) -> ActionState {
        self.hints
            .get(&(row_index, level))
            .cloned()
            .unwrap_or(ActionState::Idle)
    }

    /// The hint level the next click on this row would buy, if any.
    pub fn next_hint_level(&self, row_index: RowIndex) -> Option<u8> {
        let row = RowKey::new(self.puzzle_id.as_str(), row_index);
        match &self.server {
            Some(snapshot) => snapshot.next_hint_level(&row),
            None => Some(1),
        }
    }

    /// Label for the hint button of a row.
    pub fn hint_label(&self, row_index: RowIndex) -> Option<String> {
        let level = self.next_hint_level(row_index)?;
        Some(format!("buy hint {level} (-{} points)", self.rules.hint_cost(level)))
    }

    /// Earliest pending deadline, for scheduling the next `Tick`.
    pub fn next_deadline(&self) -> Option<u64> {
        let pending = self.hints.values().chain(self.rows.values().map(|r| &r.action));
        pending
            .filter_map(|state| match state {
                ActionState::Pending { deadline_ms } => *deadline_ms,
                ActionState::Error { retry_at_ms, .. } => Some(*retry_at_ms),
                _ => None,
            })
            .min()
    }

    /// Forget every running timer. Called when the view goes away.
    pub fn clear_timers(&mut self) {
        for state in self.hints.values_mut().chain(self.rows.values_mut().map(|r| &mut r.action)) {
            match state {
                ActionState::Pending { deadline_ms } => *deadline_ms = None,
                ActionState::Error { .. } => *state = ActionState::Idle,
                _ => {}
            }
        }
    }

    pub fn apply(&mut self, event: ClientEvent, now_ms: u64) -> Vec<Effect> {
        match event {
            ClientEvent::SnapshotLoaded(snapshot) | ClientEvent::AccountPushed(snapshot) => {
                self.merge_snapshot(snapshot)
            }
            ClientEvent::CompletedRowsLoaded(rows) => {
                for row_index in rows {
                    self.settle_row(row_index);
                }
                Vec::new()
            }
            ClientEvent::RowAnswered { row_index, answer } => self.answer_row(row_index, answer),
            ClientEvent::RowResponse { row_index, result } => match result {
                Ok(completion) => {
                    self.confirm_row(row_index, &completion);
                    Vec::new()
                }
                Err(message) => self.fail_row(row_index, message, now_ms),
            },
            ClientEvent::HintClicked { row_index } => self.click_hint(row_index, now_ms),
            ClientEvent::HintRequestFailed { row_index, level, message } => {
                let state = self.hints.entry((row_index, level)).or_insert(ActionState::Idle);
                if *state == ActionState::Submitted {
                    return Vec::new();
                }
                *state = ActionState::Error {
                    retry_at_ms: now_ms + self.rules.timing.error_revert_ms,
                    message: message.clone(),
                };
                vec![Effect::Notify(Notice::HintFailed { row_index, level, message })]
            }
            ClientEvent::Tick => self.expire(now_ms),
        }
    }

    fn answer_row(&mut self, row_index: RowIndex, answer: String) -> Vec<Effect> {
        let row = self.rows.entry(row_index).or_default();
        if row.is_disabled() {
            return Vec::new();
        }
        let matches = self
            .answers
            .get(&row_index)
            .is_some_and(|canonical| crate::types::answers_match(&answer, canonical));
        if !matches {
            return vec![Effect::Notify(Notice::Incorrect { row_index })];
        }
        let reward = self.rules.row_reward;
        row.action = ActionState::Pending { deadline_ms: None };
        row.optimistic_reward = Some(reward);
        self.displayed_balance += reward;
        vec![Effect::SendRowCompletion {
            puzzle_id: self.puzzle_id.clone(),
            row_index,
            answer,
        }]
    }

    fn confirm_row(&mut self, row_index: RowIndex, completion: &Completion) {
        let row = self.rows.entry(row_index).or_default();
        row.action = ActionState::Submitted;
        row.optimistic_reward = None;
        if completion.version >= self.version() {
            self.displayed_balance = completion.points_total;
            if let Some(server) = self.server.as_mut() {
                server.balance = completion.points_total;
                server.version = completion.version;
            }
        }
    }

    fn fail_row(&mut self, row_index: RowIndex, message: String, now_ms: u64) -> Vec<Effect> {
        let retry_at_ms = now_ms + self.rules.timing.error_revert_ms;
        let row = self.rows.entry(row_index).or_default();
        if row.action == ActionState::Submitted {
            // A push already proved the row complete.
            return Vec::new();
        }
        if let Some(reward) = row.optimistic_reward.take() {
            self.displayed_balance = (self.displayed_balance - reward).max(0);
        }
        row.action = ActionState::Error { retry_at_ms, message: message.clone() };
        vec![Effect::Notify(Notice::RowFailed { row_index, message })]
    }

    fn click_hint(&mut self, row_index: RowIndex, now_ms: u64) -> Vec<Effect> {
        let Some(level) = self.next_hint_level(row_index) else {
            return Vec::new();
        };
        if self.hint_state(row_index, level).is_busy() {
            return Vec::new();
        }
        let cost = self.rules.hint_cost(level);
        if self.displayed_balance < cost {
            return vec![Effect::Notify(Notice::NotEnoughPoints {
                needed: cost,
                balance: self.displayed_balance,
            })];
        }
        self.hints.insert(
            (row_index, level),
            ActionState::Pending {
                deadline_ms: Some(now_ms + self.rules.timing.hint_pending_timeout_ms),
            },
        );
        vec![Effect::SendHintRequest {
            puzzle_id: self.puzzle_id.clone(),
            row_index,
            level,
            cost,
        }]
    }

    fn merge_snapshot(&mut self, snapshot: AccountSnapshot) -> Vec<Effect> {
        if snapshot.account_id != self.account_id {
            return Vec::new();
        }
        if self.server.is_some() && snapshot.version < self.version() {
            log::debug!(
                "dropping stale snapshot v{} for {} (holding v{})",
                snapshot.version,
                self.account_id,
                self.version()
            );
            return Vec::new();
        }

        self.displayed_balance = snapshot.balance;
        for row in self.rows.values_mut() {
            row.optimistic_reward = None;
        }
        for row_index in snapshot.completed_rows_of(&self.puzzle_id) {
            self.settle_row(row_index);
        }

        let mut effects = Vec::new();
        for id in &snapshot.hints {
            let Some((row, level)) = RowKey::parse_hint_id(id) else { continue };
            if row.puzzle_id != self.puzzle_id {
                continue;
            }
            let state = self.hints.entry((row.row_index, level)).or_insert(ActionState::Idle);
            if matches!(state, ActionState::Pending { .. }) {
                effects.push(Effect::Notify(Notice::HintGranted { row_index: row.row_index, level }));
            }
            *state = ActionState::Submitted;
        }
        self.server = Some(snapshot);
        effects
    }

    fn settle_row(&mut self, row_index: RowIndex) {
        let row = self.rows.entry(row_index).or_default();
        row.action = ActionState::Submitted;
        row.optimistic_reward = None;
    }

    fn expire(&mut self, now_ms: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (&(row_index, level), state) in self.hints.iter_mut() {
            match due(state, now_ms) {
                Some(true) => {
                    *state = ActionState::Idle;
                    effects.push(Effect::Notify(Notice::HintTimedOut { row_index, level }));
                }
                Some(false) => *state = ActionState::Idle,
                None => {}
            }
        }
        for row in self.rows.values_mut() {
            if due(&row.action, now_ms).is_some() {
                row.action = ActionState::Idle;
            }
        }
        effects
    }
}

/// `Some(true)` for an expired pending deadline, `Some(false)` for an
/// error whose revert delay has passed.
fn due(state: &ActionState, now_ms: u64) -> Option<bool> {
    match state {
        ActionState::Pending { deadline_ms: Some(deadline) } if *deadline <= now_ms => Some(true),
        ActionState::Error { retry_at_ms, .. } if *retry_at_ms <= now_ms => Some(false),
        _ => None,
    }
}
