//! Completion tracker: turns "row solved" into an at-most-once reward.
//!
//! RULE: The completion-record insert is the decision point. Whoever's
//! insert succeeds is paid; a uniqueness conflict is a replay and is paid
//! nothing. No other check (cached state, client flags) may stand in for it.

use crate::{
    clock::Clock,
    config::{EconomyConfig, VerticalBonusConfig},
    error::{EconError, EconResult},
    event::LedgerEvent,
    ledger::Ledger,
    store::{InsertOutcome, Store, VERTICAL_OBJECTIVE},
    types::{answers_match, GrantSet, Points, RowIndex, RowKey},
};
use serde::{Deserialize, Serialize};

/// Server reply for a row or vertical-word completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// True only for the call whose completion record was inserted.
    pub fresh: bool,
    pub points_total: Points,
    /// Account version the total was read at.
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<BonusTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<Points>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Incorrect,
    Completed(Completion),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BonusTier {
    Top,
    Later,
}

/// Reward for the solver with the given 1-based rank.
pub fn vertical_bonus(config: &VerticalBonusConfig, rank: u64) -> (BonusTier, Points) {
    if rank <= config.top_tier_size {
        (BonusTier::Top, config.top_reward)
    } else {
        (BonusTier::Later, config.later_reward)
    }
}

pub struct CompletionTracker<'a> {
    store: &'a Store,
    ledger: Ledger<'a>,
    clock: &'a dyn Clock,
    config: &'a EconomyConfig,
}

impl<'a> CompletionTracker<'a> {
    pub fn new(
        store: &'a Store,
        ledger: Ledger<'a>,
        clock: &'a dyn Clock,
        config: &'a EconomyConfig,
    ) -> Self {
        Self { store, ledger, clock, config }
    }

    pub fn submit_row(
        &self,
        account_id: &str,
        puzzle_id: &str,
        row_index: RowIndex,
        submitted_answer: &str,
        canonical_answer: &str,
        reward: Points,
    ) -> EconResult<Attempt> {
        require_id("puzzle_id", puzzle_id)?;
        if reward <= 0 {
            return Err(EconError::validation(format!("reward must be positive, got {reward}")));
        }
        if !answers_match(submitted_answer, canonical_answer) {
            log::debug!("{account_id} answered {puzzle_id}#{row_index} incorrectly");
            return Ok(Attempt::Incorrect);
        }
        self.require_account(account_id)?;

        let row = RowKey::new(puzzle_id, row_index);
        let objective = row_index.to_string();
        match self
            .store
            .insert_completion(account_id, puzzle_id, &objective, self.clock.now_utc())?
        {
            InsertOutcome::Duplicate => {
                log::debug!("{account_id} replayed completion of {row}");
                self.completed(false, None, None, account_id)
            }
            InsertOutcome::Inserted => {
                self.pay(account_id, reward, &row.to_string())?;
                self.ledger
                    .grant(account_id, GrantSet::CompletedRows, &row.completion_id())?;
                self.ledger.record(LedgerEvent::RowCompleted {
                    account_id: account_id.to_string(),
                    puzzle_id: puzzle_id.to_string(),
                    row_index,
                    reward,
                });
                self.completed(true, None, Some(reward), account_id)
            }
        }
    }

    /// Complete a puzzle's vertical word. The reward depends on how many
    /// accounts solved it before: the rank comes from one atomic
    /// increment-and-read of the solve counter, taken only by callers whose
    /// completion record was inserted.
    pub fn submit_vertical_word(
        &self,
        account_id: &str,
        puzzle_id: &str,
        submitted_word: &str,
        canonical_word: &str,
    ) -> EconResult<Attempt> {
        require_id("puzzle_id", puzzle_id)?;
        if !answers_match(submitted_word, canonical_word) {
            return Ok(Attempt::Incorrect);
        }
        self.require_account(account_id)?;

        match self.store.insert_completion(
            account_id,
            puzzle_id,
            VERTICAL_OBJECTIVE,
            self.clock.now_utc(),
        )? {
            InsertOutcome::Duplicate => self.completed(false, None, None, account_id),
            InsertOutcome::Inserted => {
                let rank = self.store.next_solver_rank(puzzle_id)?;
                let (tier, reward) = vertical_bonus(&self.config.vertical_bonus, rank);
                log::info!("{account_id} solved vertical word of {puzzle_id} at rank {rank} ({tier:?})");
                self.pay(account_id, reward, puzzle_id)?;
                self.ledger
                    .grant(account_id, GrantSet::CompletedPuzzles, puzzle_id)?;
                self.ledger.record(LedgerEvent::VerticalWordCompleted {
                    account_id: account_id.to_string(),
                    puzzle_id: puzzle_id.to_string(),
                    solver_rank: rank,
                    reward,
                });
                self.completed(true, Some(tier), Some(reward), account_id)
            }
        }
    }

    /// Row indices the account has completed in one puzzle, ascending.
    pub fn list_completed_rows(&self, account_id: &str, puzzle_id: &str) -> EconResult<Vec<RowIndex>> {
        self.require_account(account_id)?;
        self.store.completed_rows(account_id, puzzle_id)
    }

    pub fn solve_count(&self, puzzle_id: &str) -> EconResult<u64> {
        self.store.solve_count(puzzle_id)
    }

    fn pay(&self, account_id: &str, reward: Points, what: &str) -> EconResult<Points> {
        self.ledger.credit(account_id, reward).map_err(|e| {
            // The record exists, so a retry is a replay: this reward is lost.
            log::error!("completion of {what} by {account_id} recorded but credit failed: {e}");
            e
        })
    }

    fn completed(
        &self,
        fresh: bool,
        tier: Option<BonusTier>,
        reward: Option<Points>,
        account_id: &str,
    ) -> EconResult<Attempt> {
        let snapshot = self.ledger.snapshot(account_id)?;
        Ok(Attempt::Completed(Completion {
            fresh,
            points_total: snapshot.balance,
            version: snapshot.version,
            tier,
            reward,
        }))
    }

    fn require_account(&self, account_id: &str) -> EconResult<()> {
        match self.store.account(account_id)? {
            Some(_) => Ok(()),
            None => Err(EconError::not_found("account", account_id)),
        }
    }
}

fn require_id(name: &str, value: &str) -> EconResult<()> {
    if value.trim().is_empty() {
        return Err(EconError::validation(format!("{name} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bonus_steps_down_after_the_top_tier() {
        let cfg = VerticalBonusConfig {
            top_tier_size: 3,
            top_reward: 50,
            later_reward: 20,
        };
        assert_eq!(vertical_bonus(&cfg, 1), (BonusTier::Top, 50));
        assert_eq!(vertical_bonus(&cfg, 3), (BonusTier::Top, 50));
        assert_eq!(vertical_bonus(&cfg, 4), (BonusTier::Later, 20));
        assert_eq!(vertical_bonus(&cfg, 400), (BonusTier::Later, 20));
    }
}
