use crate::types::{AccountId, Points};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EconError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Missing or invalid credential")]
    Unauthenticated,

    #[error("Account '{account_id}' is not allowed to {action}")]
    Authorization { account_id: AccountId, action: &'static str },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { account_id: AccountId, balance: Points, required: Points },

    #[error("Request '{request_id}' is {status} and cannot be {action}")]
    InvalidTransition { request_id: String, status: String, action: &'static str },

    #[error("Approval of request '{request_id}' is still being applied")]
    ApprovalInProgress { request_id: String },

    #[error("'{value}' is already owned")]
    AlreadyOwned { value: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EconResult<T> = Result<T, EconError>;

impl EconError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Store-level failures that may clear on retry. Only idempotent reads and
    /// re-issued conditional updates may be retried by callers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::ApprovalInProgress { .. } => true,
            _ => false,
        }
    }

    /// HTTP-style status for the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_)              => 400,
            Self::Unauthenticated            => 401,
            Self::Authorization { .. }       => 403,
            Self::NotFound { .. }            => 404,
            Self::InvalidTransition { .. }
            | Self::AlreadyOwned { .. }      => 409,
            Self::InsufficientFunds { .. }   => 422,
            Self::ApprovalInProgress { .. }  => 503,
            Self::Database(_)
            | Self::Serialization(_)
            | Self::Other(_)                 => 500,
        }
    }

    /// Message safe to show a user. Internal failures are reported
    /// generically; the detail is logged server-side only.
    pub fn public_message(&self) -> String {
        match self.status_code() {
            500 => "Server error".to_string(),
            _ => self.to_string(),
        }
    }
}
