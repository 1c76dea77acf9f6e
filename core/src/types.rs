//! Shared primitive types used across the economy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, externally issued account identifier.
pub type AccountId = String;

/// A puzzle identifier as issued by the content catalog.
pub type PuzzleId = String;

/// A request identifier (uuid v4, rendered as a string).
pub type RequestId = String;

/// Zero-based row index inside a puzzle.
pub type RowIndex = u32;

/// Point amounts. Balances are never negative; amounts passed to the
/// ledger are validated to be positive at the boundary.
pub type Points = i64;

/// Hint levels per row. The second hint of a row costs more than the first.
pub const MAX_HINT_LEVEL: u8 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Ordinary,
    Moderator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ordinary  => "ordinary",
            Self::Moderator => "moderator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ordinary"  => Some(Self::Ordinary),
            "moderator" => Some(Self::Moderator),
            _ => None,
        }
    }
}

/// The per-account grant sets. Each is an append-only set of string ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GrantSet {
    Hints,
    CompletedRows,
    CompletedPuzzles,
    Submitted,
    Images,
}

impl GrantSet {
    pub const ALL: [GrantSet; 5] = [
        GrantSet::Hints,
        GrantSet::CompletedRows,
        GrantSet::CompletedPuzzles,
        GrantSet::Submitted,
        GrantSet::Images,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hints            => "hints",
            Self::CompletedRows    => "completed_rows",
            Self::CompletedPuzzles => "completed_puzzles",
            Self::Submitted        => "submitted",
            Self::Images           => "images",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|set| set.as_str() == s)
    }
}

/// Identifies one row of one puzzle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub puzzle_id: PuzzleId,
    pub row_index: RowIndex,
}

impl RowKey {
    pub fn new(puzzle_id: impl Into<PuzzleId>, row_index: RowIndex) -> Self {
        Self { puzzle_id: puzzle_id.into(), row_index }
    }

    /// Id stored in the completed-rows grant set.
    pub fn completion_id(&self) -> String {
        format!("{}:{}", self.puzzle_id, self.row_index)
    }

    /// Id stored in the hints grant set for the given level (1-based).
    pub fn hint_id(&self, level: u8) -> String {
        format!("{}:{}:h{}", self.puzzle_id, self.row_index, level)
    }

    /// Parse a hint id back into its row and level.
    pub fn parse_hint_id(id: &str) -> Option<(RowKey, u8)> {
        let (rest, level) = id.rsplit_once(":h")?;
        let (puzzle, row) = rest.rsplit_once(':')?;
        let level: u8 = level.parse().ok()?;
        let row_index: RowIndex = row.parse().ok()?;
        if puzzle.is_empty() || level == 0 || level > MAX_HINT_LEVEL {
            return None;
        }
        Some((RowKey::new(puzzle, row_index), level))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.puzzle_id, self.row_index)
    }
}

/// Case-insensitive exact match used for row answers and vertical words.
/// Whitespace is significant.
pub fn answers_match(submitted: &str, canonical: &str) -> bool {
    !submitted.is_empty() && submitted.to_lowercase() == canonical.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_ids_round_trip_through_parser() {
        let row = RowKey::new("p7", 3);
        assert_eq!(row.hint_id(2), "p7:3:h2");
        assert_eq!(RowKey::parse_hint_id("p7:3:h2"), Some((row, 2)));
    }

    #[test]
    fn malformed_hint_ids_are_rejected() {
        assert_eq!(RowKey::parse_hint_id("p7:3"), None);
        assert_eq!(RowKey::parse_hint_id("p7:x:h1"), None);
        assert_eq!(RowKey::parse_hint_id("p7:3:h9"), None);
        assert_eq!(RowKey::parse_hint_id(":3:h1"), None);
    }

    #[test]
    fn answer_matching_ignores_case_only() {
        assert!(answers_match("freud", "FREUD"));
        assert!(!answers_match(" Freud ", "FREUD"));
        assert!(!answers_match("fraud", "FREUD"));
        assert!(!answers_match("", ""));
    }
}
