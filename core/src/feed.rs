//! Change propagation: pushes full-record snapshots to subscribers.
//!
//! RULE: Every payload is a complete current snapshot, never a diff.
//! Delivery is at-most-once and there is no replay: a subscriber that was
//! not attached when a change happened must re-fetch.
//!
//! Channels are unbounded, so publishing never waits on a slow consumer.
//! A subscriber whose receiving side is gone is dropped on the next publish.

use crate::{
    request::{Request, RequestKindTag},
    snapshot::AccountSnapshot,
    types::AccountId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    Arc, Weak,
};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum Change {
    Account { snapshot: AccountSnapshot },
    Request { request: Request },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum Filter {
    /// Every mutation of one account record.
    Account { account_id: AccountId },
    /// Every mutation of the request collection, optionally one kind only.
    Requests { kind: Option<RequestKindTag> },
}

impl Filter {
    pub fn account(account_id: impl Into<AccountId>) -> Self {
        Self::Account { account_id: account_id.into() }
    }

    pub fn requests(kind: Option<RequestKindTag>) -> Self {
        Self::Requests { kind }
    }

    pub fn matches(&self, change: &Change) -> bool {
        match (self, change) {
            (Filter::Account { account_id }, Change::Account { snapshot }) => {
                snapshot.account_id == *account_id
            }
            (Filter::Requests { kind }, Change::Request { request }) => {
                kind.map_or(true, |k| request.kind.tag() == k)
            }
            _ => false,
        }
    }
}

struct Subscriber {
    id: u64,
    filter: Filter,
    tx: Sender<Change>,
}

#[derive(Default)]
pub struct ChangeFeed {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ChangeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a consumer. Only changes published after this call are delivered.
    pub fn subscribe(self: &Arc<Self>, filter: Filter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(Subscriber {
            id,
            filter: filter.clone(),
            tx,
        });
        log::debug!("subscription {id} opened on {filter:?}");
        Subscription {
            id,
            filter,
            rx,
            feed: Arc::downgrade(self),
            closed: false,
        }
    }

    /// Deliver `change` to every matching subscriber. Returns the number of
    /// subscribers it was handed to.
    pub fn publish(&self, change: Change) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if !sub.filter.matches(&change) {
                return true;
            }
            match sub.tx.send(change.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    log::debug!("subscription {} dropped: receiver gone", sub.id);
                    false
                }
            }
        });
        delivered
    }

    pub fn publish_account(&self, snapshot: AccountSnapshot) -> usize {
        self.publish(Change::Account { snapshot })
    }

    pub fn publish_request(&self, request: Request) -> usize {
        self.publish(Change::Request { request })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != id);
        before != subscribers.len()
    }
}

/// The consuming end of one subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    filter: Filter,
    rx: Receiver<Change>,
    feed: Weak<ChangeFeed>,
    closed: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next queued change, without blocking.
    pub fn try_next(&self) -> Option<Change> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(change) => Some(change),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next change.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Change> {
        if self.closed {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(change) => Some(change),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued so far, in arrival order.
    pub fn drain(&self) -> Vec<Change> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Detach from the feed. Safe to call any number of times; changes
    /// still queued are discarded.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(feed) = self.feed.upgrade() {
            if feed.remove(self.id) {
                log::debug!("subscription {} closed", self.id);
            }
        }
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
