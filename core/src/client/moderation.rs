//! Moderator queue view: the pending requests of one kind, oldest first,
//! kept current from an initial fetch plus pushed request snapshots.
//!
//! Snapshots may arrive out of order. The newest version seen per request is
//! remembered, decided ones included, and anything older is dropped.

use crate::{
    feed::Change,
    request::{Request, RequestKindTag, RequestStatus},
    types::RequestId,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ModerationQueue {
    kind: Option<RequestKindTag>,
    items: Vec<Request>,
    seen: HashMap<RequestId, u64>,
}

impl ModerationQueue {
    pub fn new(kind: Option<RequestKindTag>) -> Self {
        Self { kind, items: Vec::new(), seen: HashMap::new() }
    }

    pub fn kind(&self) -> Option<RequestKindTag> {
        self.kind
    }

    /// Replace the contents with a fresh fetch. Versions already seen still
    /// apply, so a fetch older than a push cannot bring a request back.
    pub fn load(&mut self, requests: Vec<Request>) {
        self.items.clear();
        for request in requests {
            self.upsert(request);
        }
    }

    /// Apply one pushed change. Returns true if the queue changed.
    pub fn apply(&mut self, change: &Change) -> bool {
        match change {
            Change::Request { request } => self.upsert(request.clone()),
            Change::Account { .. } => false,
        }
    }

    pub fn pending(&self) -> &[Request] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn upsert(&mut self, request: Request) -> bool {
        if self.kind.is_some_and(|k| request.kind.tag() != k) {
            return false;
        }
        if self.seen.get(&request.request_id).is_some_and(|&v| request.version < v) {
            log::debug!("dropping stale v{} of request {}", request.version, request.request_id);
            return false;
        }
        self.seen.insert(request.request_id.clone(), request.version);
        let existing = self
            .items
            .iter()
            .position(|r| r.request_id == request.request_id);
        match (existing, request.status) {
            (Some(i), RequestStatus::Pending) => {
                if self.items[i] == request {
                    return false;
                }
                self.items[i] = request;
            }
            (Some(i), _) => {
                self.items.remove(i);
            }
            (None, RequestStatus::Pending) => {
                // Insert after every entry that is not newer.
                let at = self
                    .items
                    .partition_point(|r| r.created_at <= request.created_at);
                self.items.insert(at, request);
            }
            (None, _) => return false,
        }
        true
    }
}
