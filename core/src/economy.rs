//! The economy service handle.
//!
//! Built once at startup and passed by reference. Owns one store
//! connection; services borrow from it for the length of a call.
//!
//! RULES:
//!   - Every service shares the handle's feed, so a mutation made through
//!     any handle reaches every subscriber.
//!   - One handle per thread: `reopen()` gives a sibling with its own
//!     connection to the same database and the same feed.

use crate::{
    clock::{Clock, SystemClock},
    completion::CompletionTracker,
    config::EconomyConfig,
    error::{EconError, EconResult},
    event::LedgerEvent,
    feed::ChangeFeed,
    ledger::Ledger,
    request::RequestBook,
    snapshot::AccountSnapshot,
    store::Store,
    types::Role,
};
use std::sync::Arc;

pub struct Economy {
    store:  Store,
    feed:   Arc<ChangeFeed>,
    config: Arc<EconomyConfig>,
    clock:  Arc<dyn Clock>,
}

impl Economy {
    /// Open (and migrate) the database at `path`.
    pub fn open(
        path: &str,
        config: EconomyConfig,
        feed: Arc<ChangeFeed>,
        clock: Arc<dyn Clock>,
    ) -> EconResult<Self> {
        let store = Store::open(path)?;
        store.migrate()?;
        log::info!("economy opened on {path}");
        Ok(Self { store, feed, config: Arc::new(config), clock })
    }

    /// A private in-memory economy with its own feed and the system clock.
    pub fn in_memory(config: EconomyConfig) -> EconResult<Self> {
        Self::in_memory_with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn in_memory_with_clock(config: EconomyConfig, clock: Arc<dyn Clock>) -> EconResult<Self> {
        let store = Store::in_memory()?;
        store.migrate()?;
        Ok(Self {
            store,
            feed: ChangeFeed::new(),
            config: Arc::new(config),
            clock,
        })
    }

    /// Another handle on the same database, feed, config and clock.
    pub fn reopen(&self) -> EconResult<Self> {
        Ok(Self {
            store:  self.store.reopen()?,
            feed:   Arc::clone(&self.feed),
            config: Arc::clone(&self.config),
            clock:  Arc::clone(&self.clock),
        })
    }

    pub fn ledger(&self) -> Ledger<'_> {
        Ledger::new(&self.store, &self.feed, self.clock.as_ref())
    }

    pub fn tracker(&self) -> CompletionTracker<'_> {
        CompletionTracker::new(&self.store, self.ledger(), self.clock.as_ref(), &self.config)
    }

    pub fn requests(&self) -> RequestBook<'_> {
        RequestBook::new(
            &self.store,
            self.ledger(),
            &self.feed,
            self.clock.as_ref(),
            &self.config,
        )
    }

    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Direct store access for tooling and tests.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create an ordinary account with zero points. Registering an existing
    /// id returns the existing account unchanged.
    pub fn register(&self, account_id: &str, display_name: &str) -> EconResult<AccountSnapshot> {
        if account_id.trim().is_empty() {
            return Err(EconError::validation("account_id must not be empty"));
        }
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(EconError::validation("display name must not be empty"));
        }
        let created = self.store.insert_account(
            account_id,
            display_name,
            Role::Ordinary,
            self.clock.now_utc(),
        )?;
        let ledger = self.ledger();
        if created {
            log::info!("registered {account_id} ({display_name})");
            ledger.record(LedgerEvent::AccountRegistered {
                account_id: account_id.to_string(),
                display_name: display_name.to_string(),
            });
            ledger.publish(account_id);
        } else {
            log::debug!("{account_id} already registered");
        }
        ledger.snapshot(account_id)
    }

    /// Grant the moderator role. Role assignment is an operator action and
    /// has no API route.
    pub fn promote_to_moderator(&self, account_id: &str) -> EconResult<AccountSnapshot> {
        if !self.store.set_account_role(account_id, Role::Moderator)? {
            return Err(EconError::not_found("account", account_id));
        }
        log::info!("{account_id} promoted to moderator");
        let ledger = self.ledger();
        ledger.publish(account_id);
        ledger.snapshot(account_id)
    }
}
