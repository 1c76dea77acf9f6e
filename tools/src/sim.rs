//! Seeded load simulation.
//!
//! Players answer rows and buy hints through their own client sessions
//! while one moderator works the request queue. At the end every client's
//! displayed balance must equal the server's.
//!
//! RULE: All randomness comes from per-player Pcg64Mcg streams derived from
//! the run seed, so the same seed replays the same run.

use anyhow::Result;
use crossword_core::{
    api::{Api, ApiResponse, StaticCatalog},
    client::{ApiBackend, ClientRules, ClientSession, ModerationQueue},
    clock::ManualClock,
    command::ApiCall,
    feed::Filter,
    types::{Points, RowIndex},
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PUZZLE_ID: &str = "sim-1";
pub const MODERATOR_TOKEN: &str = "sim-mod";
const ROW_ANSWERS: [&str; 6] = ["lamp", "river", "stone", "cloud", "ember", "lotus"];

/// Built-in catalog used when no catalog file is given.
pub fn demo_catalog() -> StaticCatalog {
    StaticCatalog::default()
        .with_puzzle(PUZZLE_ID, &ROW_ANSWERS, "lrsceo")
        .with_image("sim-img-1", 3)
}

pub fn player_token(i: usize) -> String {
    format!("sim-tok-{i}")
}

pub fn player_id(i: usize) -> String {
    format!("player-{i}")
}

fn player_rng(seed: u64, index: usize) -> Pcg64Mcg {
    Pcg64Mcg::seed_from_u64(seed ^ (index as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

#[derive(Debug, Serialize)]
pub struct PlayerReport {
    pub account_id: String,
    pub displayed: Points,
    pub server: Points,
    pub converged: bool,
}

#[derive(Debug, Serialize)]
pub struct SimReport {
    pub seed: u64,
    pub steps: u64,
    pub approvals: u64,
    pub rejections: u64,
    pub players: Vec<PlayerReport>,
}

impl SimReport {
    pub fn converged(&self) -> bool {
        self.players.iter().all(|p| p.converged)
    }
}

/// Run `steps` rounds with `players` sessions. Accounts and the moderator
/// must already be registered.
pub fn run(
    api: &Api,
    clock: &ManualClock,
    seed: u64,
    players: usize,
    steps: u64,
) -> Result<SimReport> {
    let rules = ClientRules::from(api.economy().config());
    let answers: BTreeMap<RowIndex, String> = ROW_ANSWERS
        .iter()
        .enumerate()
        .map(|(i, a)| (i as RowIndex, a.to_string()))
        .collect();

    let mut sessions = Vec::with_capacity(players);
    let mut rngs = Vec::with_capacity(players);
    for i in 0..players {
        let mut session = ClientSession::new(
            ApiBackend::new(api, player_token(i)),
            &player_id(i),
            PUZZLE_ID,
            answers.clone(),
            rules.clone(),
            Arc::clone(api.economy().clock()),
        );
        session.mount()?;
        sessions.push(session);
        rngs.push(player_rng(seed, i));
    }

    let mut queue = ModerationQueue::new(None);
    let queue_feed = api.subscribe(MODERATOR_TOKEN, Filter::requests(None))?;
    let initial = api.handle(MODERATOR_TOKEN, &ApiCall::route("requests.queue"));
    queue.load(serde_json::from_value(initial.body)?);

    let mut mod_rng = player_rng(seed, usize::MAX - 1);
    let (mut approvals, mut rejections) = (0u64, 0u64);

    for step in 0..steps {
        for (session, rng) in sessions.iter_mut().zip(rngs.iter_mut()) {
            let row = rng.gen_range(0..ROW_ANSWERS.len()) as RowIndex;
            match rng.gen_range(0..10) {
                0..=5 => {
                    let answer = if rng.gen_bool(0.8) { ROW_ANSWERS[row as usize] } else { "wrong" };
                    session.answer_row(row, answer);
                }
                6..=8 => session.click_hint(row),
                _ => {}
            }
            session.pump();
            let notices = session.take_notices();
            if !notices.is_empty() {
                log::debug!("step {step} {}: {notices:?}", session.view().account_id());
            }
        }

        for change in queue_feed.drain() {
            queue.apply(&change);
        }
        if let Some(oldest) = queue.pending().first() {
            let route = if mod_rng.gen_bool(0.75) { "requests.approve" } else { "requests.reject" };
            let call = ApiCall {
                request_id: Some(oldest.request_id.clone()),
                ..ApiCall::route(route)
            };
            let ApiResponse { status, body } = api.handle(MODERATOR_TOKEN, &call);
            match (route, status) {
                ("requests.approve", 200) => approvals += 1,
                ("requests.reject", 200) => rejections += 1,
                _ => log::debug!("step {step}: {route} answered {status}: {body}"),
            }
            for change in queue_feed.drain() {
                queue.apply(&change);
            }
        }

        clock.advance(1_000);
    }

    // Let every session see the last pushes.
    for session in sessions.iter_mut() {
        session.pump();
    }

    let mut reports = Vec::with_capacity(players);
    for session in &sessions {
        let account_id = session.view().account_id().to_string();
        let server = api.economy().ledger().balance(&account_id)?;
        let displayed = session.view().displayed_balance();
        reports.push(PlayerReport {
            account_id,
            displayed,
            server,
            converged: displayed == server,
        });
    }

    Ok(SimReport { seed, steps, approvals, rejections, players: reports })
}
