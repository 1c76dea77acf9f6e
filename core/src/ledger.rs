//! Ledger service: atomic balance mutation and grant sets for one account.
//!
//! RULE: A debit is one conditional update ("balance >= amount"), never a
//! read followed by a write. Two debits racing on one account can only
//! both succeed if the balance covers both.
//!
//! Every successful mutation is followed by a full snapshot push to the
//! change feed. Push and audit failures are logged, never returned: the
//! mutation has already happened and a caller must not re-apply it.

use crate::{
    clock::Clock,
    error::{EconError, EconResult},
    event::LedgerEvent,
    feed::ChangeFeed,
    snapshot::AccountSnapshot,
    store::Store,
    types::{GrantSet, Points},
};
use serde::{Deserialize, Serialize};

/// Result of a direct purchase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Purchase {
    pub value: String,
    pub cost: Points,
    pub balance_after: Points,
}

pub struct Ledger<'a> {
    store: &'a Store,
    feed: &'a ChangeFeed,
    clock: &'a dyn Clock,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a Store, feed: &'a ChangeFeed, clock: &'a dyn Clock) -> Self {
        Self { store, feed, clock }
    }

    /// Add points. Always succeeds for an existing account.
    pub fn credit(&self, account_id: &str, amount: Points) -> EconResult<Points> {
        require_positive(amount)?;
        let Some((balance, _)) = self.store.credit_balance(account_id, amount)? else {
            return Err(EconError::not_found("account", account_id));
        };
        log::debug!("credit {account_id} +{amount} -> {balance}");
        self.record(LedgerEvent::Credited {
            account_id: account_id.to_string(),
            amount,
            balance_after: balance,
        });
        self.publish(account_id);
        Ok(balance)
    }

    /// Remove points, or fail with `InsufficientFunds` leaving the balance as is.
    pub fn debit(&self, account_id: &str, amount: Points) -> EconResult<Points> {
        require_positive(amount)?;
        if let Some((balance, _)) = self.store.debit_balance(account_id, amount)? {
            log::debug!("debit {account_id} -{amount} -> {balance}");
            self.record(LedgerEvent::Debited {
                account_id: account_id.to_string(),
                amount,
                balance_after: balance,
            });
            self.publish(account_id);
            return Ok(balance);
        }

        // The conditional update matched nothing: missing account or short balance.
        let account = self
            .store
            .account(account_id)?
            .ok_or_else(|| EconError::not_found("account", account_id))?;
        self.record(LedgerEvent::DebitRefused {
            account_id: account_id.to_string(),
            amount,
            balance: account.balance,
        });
        Err(EconError::InsufficientFunds {
            account_id: account_id.to_string(),
            balance: account.balance,
            required: amount,
        })
    }

    /// Append to a grant set. Re-granting a present value is a no-op.
    /// Returns true if the value was newly added.
    pub fn grant(&self, account_id: &str, set: GrantSet, value: &str) -> EconResult<bool> {
        if value.trim().is_empty() {
            return Err(EconError::validation("grant value must not be empty"));
        }
        if self.store.account(account_id)?.is_none() {
            return Err(EconError::not_found("account", account_id));
        }
        let added = self
            .store
            .insert_grant(account_id, set, value, self.clock.now_utc())?;
        if added {
            log::debug!("grant {account_id} {}+={value}", set.as_str());
            self.record(LedgerEvent::Granted {
                account_id: account_id.to_string(),
                set,
                value: value.to_string(),
            });
            self.publish(account_id);
        }
        Ok(added)
    }

    /// Debit `cost` and grant `value`, for purchases that need no approval.
    ///
    /// The debit comes first so a grant is never visible without payment.
    /// If a concurrent purchase granted the value in between, the debit is
    /// refunded and `AlreadyOwned` is returned.
    pub fn purchase(
        &self,
        account_id: &str,
        set: GrantSet,
        value: &str,
        cost: Points,
    ) -> EconResult<Purchase> {
        if self.store.has_grant(account_id, set, value)? {
            return Err(EconError::AlreadyOwned { value: value.to_string() });
        }
        let balance_after = self.debit(account_id, cost)?;
        match self.grant(account_id, set, value) {
            Ok(true) => Ok(Purchase {
                value: value.to_string(),
                cost,
                balance_after,
            }),
            Ok(false) => {
                log::info!("{account_id} already owns {value}; refunding {cost}");
                self.refund(account_id, cost);
                Err(EconError::AlreadyOwned { value: value.to_string() })
            }
            Err(e) => {
                log::error!("grant of {value} to {account_id} failed after debit: {e}");
                self.refund(account_id, cost);
                Err(e)
            }
        }
    }

    pub fn snapshot(&self, account_id: &str) -> EconResult<AccountSnapshot> {
        self.store
            .account_snapshot(account_id)?
            .ok_or_else(|| EconError::not_found("account", account_id))
    }

    pub fn balance(&self, account_id: &str) -> EconResult<Points> {
        self.store
            .account(account_id)?
            .map(|a| a.balance)
            .ok_or_else(|| EconError::not_found("account", account_id))
    }

    /// Push the account's current snapshot to subscribers.
    pub(crate) fn publish(&self, account_id: &str) {
        match self.store.account_snapshot(account_id) {
            Ok(Some(snapshot)) => {
                self.feed.publish_account(snapshot);
            }
            Ok(None) => log::warn!("no snapshot to publish for {account_id}"),
            Err(e) => log::error!("snapshot read for {account_id} failed, push skipped: {e}"),
        }
    }

    pub(crate) fn record(&self, event: LedgerEvent) {
        if let Err(e) = self.store.append_event(&event, self.clock.now_utc()) {
            log::error!("event log append failed for {}: {e}", event.type_name());
        }
    }

    fn refund(&self, account_id: &str, amount: Points) {
        if let Err(e) = self.credit(account_id, amount) {
            log::error!("refund of {amount} to {account_id} failed: {e}");
        }
    }
}

fn require_positive(amount: Points) -> EconResult<()> {
    if amount <= 0 {
        return Err(EconError::validation(format!("amount must be positive, got {amount}")));
    }
    Ok(())
}
