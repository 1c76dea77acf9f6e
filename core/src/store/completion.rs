use super::{fmt_ts, is_unique_violation, Store};
use crate::{
    error::EconResult,
    types::RowIndex,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// Objective key of a puzzle's vertical word.
pub const VERTICAL_OBJECTIVE: &str = "vertical";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The (account, puzzle, objective) key already exists.
    Duplicate,
}

impl Store {
    // ── Completion records ────────────────────────────────────────

    /// Insert the completion record. A uniqueness conflict is reported as
    /// `Duplicate`; every other failure propagates.
    pub fn insert_completion(
        &self,
        account_id: &str,
        puzzle_id: &str,
        objective: &str,
        at: DateTime<Utc>,
    ) -> EconResult<InsertOutcome> {
        let result = self.conn.execute(
            "INSERT INTO completion (account_id, puzzle_id, objective, completed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![account_id, puzzle_id, objective, fmt_ts(at)],
        );
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    pub fn completed_rows(&self, account_id: &str, puzzle_id: &str) -> EconResult<Vec<RowIndex>> {
        let mut stmt = self.conn.prepare(
            "SELECT objective FROM completion
             WHERE account_id = ?1 AND puzzle_id = ?2 AND objective != ?3",
        )?;
        let objectives = stmt
            .query_map(params![account_id, puzzle_id, VERTICAL_OBJECTIVE], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows: Vec<RowIndex> = objectives
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        rows.sort_unstable();
        Ok(rows)
    }

    pub fn completion_exists(&self, account_id: &str, puzzle_id: &str, objective: &str) -> EconResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM completion
                 WHERE account_id = ?1 AND puzzle_id = ?2 AND objective = ?3",
                params![account_id, puzzle_id, objective],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ── Solve counter ─────────────────────────────────────────────

    /// Increment the puzzle's solve counter and return the new value, in
    /// one statement. The returned value is the caller's solver rank.
    pub fn next_solver_rank(&self, puzzle_id: &str) -> EconResult<u64> {
        let rank: i64 = self.conn.query_row(
            "INSERT INTO solve_counter (puzzle_id, solved) VALUES (?1, 1)
             ON CONFLICT (puzzle_id) DO UPDATE SET solved = solved + 1
             RETURNING solved",
            params![puzzle_id],
            |row| row.get(0),
        )?;
        Ok(rank as u64)
    }

    pub fn solve_count(&self, puzzle_id: &str) -> EconResult<u64> {
        let count: Option<i64> = self
            .conn
            .query_row(
                "SELECT solved FROM solve_counter WHERE puzzle_id = ?1",
                params![puzzle_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u64)
    }
}
