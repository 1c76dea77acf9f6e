//! Full-record account snapshots.
//!
//! A snapshot is the unit of everything pushed to clients: never a diff.
//! `version` increases with every mutation of the account, so a consumer
//! can discard a snapshot older than one it already holds.

use crate::types::{AccountId, GrantSet, Points, PuzzleId, Role, RowIndex, RowKey, MAX_HINT_LEVEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub display_name: String,
    pub role: Role,
    pub balance: Points,
    pub version: u64,
    #[serde(default)]
    pub hints: BTreeSet<String>,
    #[serde(default)]
    pub completed_rows: BTreeSet<String>,
    #[serde(default)]
    pub completed_puzzles: BTreeSet<String>,
    #[serde(default)]
    pub submitted: BTreeSet<String>,
    #[serde(default)]
    pub images: BTreeSet<String>,
}

impl AccountSnapshot {
    pub fn set(&self, set: GrantSet) -> &BTreeSet<String> {
        match set {
            GrantSet::Hints            => &self.hints,
            GrantSet::CompletedRows    => &self.completed_rows,
            GrantSet::CompletedPuzzles => &self.completed_puzzles,
            GrantSet::Submitted        => &self.submitted,
            GrantSet::Images           => &self.images,
        }
    }

    pub(crate) fn set_mut(&mut self, set: GrantSet) -> &mut BTreeSet<String> {
        match set {
            GrantSet::Hints            => &mut self.hints,
            GrantSet::CompletedRows    => &mut self.completed_rows,
            GrantSet::CompletedPuzzles => &mut self.completed_puzzles,
            GrantSet::Submitted        => &mut self.submitted,
            GrantSet::Images           => &mut self.images,
        }
    }

    pub fn has(&self, set: GrantSet, value: &str) -> bool {
        self.set(set).contains(value)
    }

    pub fn is_row_completed(&self, row: &RowKey) -> bool {
        self.completed_rows.contains(&row.completion_id())
    }

    /// Number of consecutive hint levels owned for a row, starting at 1.
    pub fn hint_levels_owned(&self, row: &RowKey) -> u8 {
        (1..=MAX_HINT_LEVEL)
            .take_while(|level| self.hints.contains(&row.hint_id(*level)))
            .count() as u8
    }

    /// The hint level a purchase for this row would unlock next, if any.
    pub fn next_hint_level(&self, row: &RowKey) -> Option<u8> {
        let owned = self.hint_levels_owned(row);
        (owned < MAX_HINT_LEVEL).then_some(owned + 1)
    }

    /// Completed row indices of one puzzle.
    pub fn completed_rows_of(&self, puzzle_id: &PuzzleId) -> BTreeSet<RowIndex> {
        self.completed_rows
            .iter()
            .filter_map(|id| id.rsplit_once(':'))
            .filter(|(puzzle, _)| puzzle == puzzle_id)
            .filter_map(|(_, row)| row.parse().ok())
            .collect()
    }
}
