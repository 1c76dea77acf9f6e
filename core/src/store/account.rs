use super::{fmt_ts, Store};
use crate::{
    error::EconResult,
    snapshot::AccountSnapshot,
    types::{GrantSet, Points, Role},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    pub account_id: String,
    pub display_name: String,
    pub role: Role,
    pub balance: Points,
    pub version: u64,
}

fn role_from_sql(s: String) -> rusqlite::Result<Role> {
    Role::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown role '{s}'").into(),
        )
    })
}

impl Store {
    // ── Account ───────────────────────────────────────────────────

    /// Insert a new account with a zero balance.
    /// Returns false if the id is already registered.
    pub fn insert_account(
        &self,
        account_id: &str,
        display_name: &str,
        role: Role,
        at: DateTime<Utc>,
    ) -> EconResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO account (account_id, display_name, role, balance, version, created_at)
             VALUES (?1, ?2, ?3, 0, 0, ?4)",
            params![account_id, display_name, role.as_str(), fmt_ts(at)],
        )?;
        Ok(inserted == 1)
    }

    pub fn account(&self, account_id: &str) -> EconResult<Option<AccountRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT account_id, display_name, role, balance, version
                 FROM account WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(AccountRow {
                        account_id: row.get(0)?,
                        display_name: row.get(1)?,
                        role: role_from_sql(row.get(2)?)?,
                        balance: row.get(3)?,
                        version: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_account_role(&self, account_id: &str, role: Role) -> EconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE account SET role = ?1, version = version + 1 WHERE account_id = ?2",
            params![role.as_str(), account_id],
        )?;
        Ok(changed == 1)
    }

    /// Read the account row and all of its grant sets from one read snapshot.
    pub fn account_snapshot(&self, account_id: &str) -> EconResult<Option<AccountSnapshot>> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(row) = self.account(account_id)? else {
            return Ok(None);
        };
        let mut snapshot = AccountSnapshot {
            account_id: row.account_id,
            display_name: row.display_name,
            role: row.role,
            balance: row.balance,
            version: row.version,
            hints: Default::default(),
            completed_rows: Default::default(),
            completed_puzzles: Default::default(),
            submitted: Default::default(),
            images: Default::default(),
        };
        {
            let mut stmt = self.conn.prepare(
                "SELECT set_name, value FROM account_grant WHERE account_id = ?1",
            )?;
            let grants = stmt
                .query_map(params![account_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (set_name, value) in grants {
                match GrantSet::parse(&set_name) {
                    Some(set) => {
                        snapshot.set_mut(set).insert(value);
                    }
                    None => log::warn!("Ignoring grant in unknown set '{set_name}' for {account_id}"),
                }
            }
        }
        tx.commit()?;
        Ok(Some(snapshot))
    }

    // ── Balance ───────────────────────────────────────────────────

    /// Add `amount` to the balance. Returns (balance, version) after the
    /// update, or None when the account does not exist.
    pub fn credit_balance(&self, account_id: &str, amount: Points) -> EconResult<Option<(Points, u64)>> {
        let result = self
            .conn
            .query_row(
                "UPDATE account SET balance = balance + ?1, version = version + 1
                 WHERE account_id = ?2
                 RETURNING balance, version",
                params![amount, account_id],
                |row| Ok((row.get::<_, Points>(0)?, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?;
        Ok(result)
    }

    /// Subtract `amount` only if the balance covers it, in one statement.
    /// Returns None when the account is missing or cannot afford it.
    pub fn debit_balance(&self, account_id: &str, amount: Points) -> EconResult<Option<(Points, u64)>> {
        let result = self
            .conn
            .query_row(
                "UPDATE account SET balance = balance - ?1, version = version + 1
                 WHERE account_id = ?2 AND balance >= ?1
                 RETURNING balance, version",
                params![amount, account_id],
                |row| Ok((row.get::<_, Points>(0)?, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?;
        Ok(result)
    }

    // ── Grants ────────────────────────────────────────────────────

    /// Append `value` to a grant set. Returns false if it was already there.
    pub fn insert_grant(
        &self,
        account_id: &str,
        set: GrantSet,
        value: &str,
        at: DateTime<Utc>,
    ) -> EconResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO account_grant (account_id, set_name, value, granted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![account_id, set.as_str(), value, fmt_ts(at)],
        )?;
        if inserted == 1 {
            self.conn.execute(
                "UPDATE account SET version = version + 1 WHERE account_id = ?1",
                params![account_id],
            )?;
        }
        Ok(inserted == 1)
    }

    pub fn has_grant(&self, account_id: &str, set: GrantSet, value: &str) -> EconResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM account_grant
                 WHERE account_id = ?1 AND set_name = ?2 AND value = ?3",
                params![account_id, set.as_str(), value],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn grant_count(&self, account_id: &str, set: GrantSet) -> EconResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM account_grant WHERE account_id = ?1 AND set_name = ?2",
            params![account_id, set.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
