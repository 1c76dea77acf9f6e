use super::{fmt_ts, parse_ts, Store};
use crate::{
    error::EconResult,
    request::{Request, RequestKind, RequestKindTag, RequestStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const REQUEST_COLUMNS: &str =
    "request_id, requester_id, target, cost, status, created_at, approval_error, decided_by, decided_at, version";

fn conversion_error(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<Request> {
    let target: String = row.get(2)?;
    let kind: RequestKind = serde_json::from_str(&target).map_err(conversion_error)?;
    let status: String = row.get(4)?;
    let status = RequestStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown request status '{status}'").into(),
        )
    })?;
    let created_at: String = row.get(5)?;
    let decided_at: Option<String> = row.get(8)?;
    Ok(Request {
        request_id: row.get(0)?,
        requester_id: row.get(1)?,
        kind,
        cost: row.get(3)?,
        status,
        created_at: parse_ts(&created_at)?,
        approval_error: row.get(6)?,
        decided_by: row.get(7)?,
        decided_at: decided_at.as_deref().map(parse_ts).transpose()?,
        version: row.get(9)?,
    })
}

impl Store {
    // ── Requests ──────────────────────────────────────────────────

    pub fn insert_request(&self, request: &Request) -> EconResult<()> {
        self.conn.execute(
            "INSERT INTO request (request_id, requester_id, kind, target, cost, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                request.request_id,
                request.requester_id,
                request.kind.tag().as_str(),
                serde_json::to_string(&request.kind)?,
                request.cost,
                request.status.as_str(),
                fmt_ts(request.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn request(&self, request_id: &str) -> EconResult<Option<Request>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM request WHERE request_id = ?1");
        let request = self
            .conn
            .query_row(&sql, params![request_id], request_from_row)
            .optional()?;
        Ok(request)
    }

    /// The persisted approval payload, once the approval has been applied.
    pub fn approval_result(&self, request_id: &str) -> EconResult<Option<String>> {
        let result: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT ledger_result FROM request WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result.flatten())
    }

    /// pending → approved. Returns false if the request was not pending,
    /// i.e. another approval or a rejection got there first.
    pub fn claim_for_approval(
        &self,
        request_id: &str,
        moderator_id: &str,
        at: DateTime<Utc>,
    ) -> EconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE request SET status = 'approved', decided_by = ?1, decided_at = ?2,
                 version = version + 1
             WHERE request_id = ?3 AND status = 'pending'",
            params![moderator_id, fmt_ts(at), request_id],
        )?;
        Ok(changed == 1)
    }

    /// Undo a claim whose ledger effect failed: back to pending with the
    /// failure reason recorded. Only applies while no result was persisted.
    pub fn release_approval_claim(&self, request_id: &str, reason: &str) -> EconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE request
             SET status = 'pending', approval_error = ?1, decided_by = NULL, decided_at = NULL,
                 version = version + 1
             WHERE request_id = ?2 AND status = 'approved' AND ledger_result IS NULL",
            params![reason, request_id],
        )?;
        Ok(changed == 1)
    }

    pub fn record_approval_result(&self, request_id: &str, result_json: &str) -> EconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE request SET ledger_result = ?1, approval_error = NULL, version = version + 1
             WHERE request_id = ?2 AND status = 'approved' AND ledger_result IS NULL",
            params![result_json, request_id],
        )?;
        Ok(changed == 1)
    }

    /// pending → rejected. Returns false if the request was not pending.
    pub fn reject_pending(
        &self,
        request_id: &str,
        moderator_id: &str,
        at: DateTime<Utc>,
    ) -> EconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE request SET status = 'rejected', decided_by = ?1, decided_at = ?2,
                 version = version + 1
             WHERE request_id = ?3 AND status = 'pending'",
            params![moderator_id, fmt_ts(at), request_id],
        )?;
        Ok(changed == 1)
    }

    /// Pending requests, oldest first, optionally restricted to one kind.
    pub fn pending_requests(&self, kind: Option<RequestKindTag>) -> EconResult<Vec<Request>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM request
             WHERE status = 'pending' AND (?1 IS NULL OR kind = ?1)
             ORDER BY created_at ASC, seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params![kind.map(|k| k.as_str())], request_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    pub fn requests_by(&self, requester_id: &str) -> EconResult<Vec<Request>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM request
             WHERE requester_id = ?1
             ORDER BY created_at ASC, seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params![requester_id], request_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }
}
