//! Audit events: every economic mutation leaves one entry in `event_log`.
//!
//! RULE: Events are written after the mutation they describe has
//! succeeded. They are a record, never an input to any decision.

use crate::types::{AccountId, GrantSet, Points, PuzzleId, RequestId, RowIndex};
use serde::{Deserialize, Serialize};

/// Variants are only ever added, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    // ── Accounts ─────────────────────────────────────
    AccountRegistered {
        account_id: AccountId,
        display_name: String,
    },

    // ── Ledger ───────────────────────────────────────
    Credited {
        account_id: AccountId,
        amount: Points,
        balance_after: Points,
    },
    Debited {
        account_id: AccountId,
        amount: Points,
        balance_after: Points,
    },
    DebitRefused {
        account_id: AccountId,
        amount: Points,
        balance: Points,
    },
    Granted {
        account_id: AccountId,
        set: GrantSet,
        value: String,
    },

    // ── Completion ───────────────────────────────────
    RowCompleted {
        account_id: AccountId,
        puzzle_id: PuzzleId,
        row_index: RowIndex,
        reward: Points,
    },
    VerticalWordCompleted {
        account_id: AccountId,
        puzzle_id: PuzzleId,
        solver_rank: u64,
        reward: Points,
    },

    // ── Requests ─────────────────────────────────────
    RequestCreated {
        request_id: RequestId,
        requester_id: AccountId,
        kind: String,
        cost: Points,
    },
    RequestApproved {
        request_id: RequestId,
        moderator_id: AccountId,
    },
    ApprovalFailed {
        request_id: RequestId,
        moderator_id: AccountId,
        reason: String,
    },
    RequestRejected {
        request_id: RequestId,
        moderator_id: AccountId,
    },
}

impl LedgerEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AccountRegistered { .. }     => "account_registered",
            Self::Credited { .. }              => "credited",
            Self::Debited { .. }               => "debited",
            Self::DebitRefused { .. }          => "debit_refused",
            Self::Granted { .. }               => "granted",
            Self::RowCompleted { .. }          => "row_completed",
            Self::VerticalWordCompleted { .. } => "vertical_word_completed",
            Self::RequestCreated { .. }        => "request_created",
            Self::RequestApproved { .. }       => "request_approved",
            Self::ApprovalFailed { .. }        => "approval_failed",
            Self::RequestRejected { .. }       => "request_rejected",
        }
    }

    /// The account the event is filed under.
    pub fn account_id(&self) -> &str {
        match self {
            Self::AccountRegistered { account_id, .. }
            | Self::Credited { account_id, .. }
            | Self::Debited { account_id, .. }
            | Self::DebitRefused { account_id, .. }
            | Self::Granted { account_id, .. }
            | Self::RowCompleted { account_id, .. }
            | Self::VerticalWordCompleted { account_id, .. } => account_id,
            Self::RequestCreated { requester_id, .. } => requester_id,
            Self::RequestApproved { moderator_id, .. }
            | Self::ApprovalFailed { moderator_id, .. }
            | Self::RequestRejected { moderator_id, .. } => moderator_id,
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub account_id: AccountId,
    pub event_type: String,
    pub payload: String, // JSON-serialized LedgerEvent
    pub created_at: String,
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<LedgerEvent> {
        serde_json::from_str(&self.payload)
    }
}
