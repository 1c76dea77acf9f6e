//! Moderated requests: hint purchases and submissions that take economic
//! effect only once a moderator approves them.
//!
//! STATES: pending → approved | rejected. Both outcomes are terminal.
//!
//! RULES:
//!   - Creation never checks affordability; approval re-checks everything.
//!   - The pending → approved step is a conditional update and is the claim:
//!     only the caller that flips it applies the ledger effect.
//!   - A failed ledger effect hands the claim back (status pending again,
//!     `approval_error` set) instead of rejecting.
//!   - Re-approving an approved request returns the persisted payload.

use crate::{
    clock::Clock,
    config::EconomyConfig,
    error::{EconError, EconResult},
    event::LedgerEvent,
    feed::ChangeFeed,
    ledger::Ledger,
    store::Store,
    types::{AccountId, GrantSet, Points, PuzzleId, RequestId, Role, RowIndex, RowKey, MAX_HINT_LEVEL},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKindTag {
    HintPurchase,
    Submission,
}

impl RequestKindTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HintPurchase => "hint-purchase",
            Self::Submission   => "submission",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hint-purchase" | "buy-hint" | "buy_hint" => Some(Self::HintPurchase),
            "submission" => Some(Self::Submission),
            _ => None,
        }
    }
}

/// What a request asks for. Validated once when the request is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RequestKind {
    /// Unlock the next hint level of one row.
    #[serde(rename_all = "camelCase")]
    HintPurchase { puzzle_id: PuzzleId, row_index: RowIndex },
    /// Moderator-checked answer for a question, paid on approval.
    #[serde(rename_all = "camelCase")]
    Submission { target: String },
}

impl RequestKind {
    pub fn tag(&self) -> RequestKindTag {
        match self {
            Self::HintPurchase { .. } => RequestKindTag::HintPurchase,
            Self::Submission { .. }   => RequestKindTag::Submission,
        }
    }

    fn validate(&self) -> EconResult<()> {
        let id = match self {
            Self::HintPurchase { puzzle_id, .. } => puzzle_id,
            Self::Submission { target } => target,
        };
        if id.trim().is_empty() {
            return Err(EconError::validation("request target must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending  => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending"  => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: RequestId,
    pub requester_id: AccountId,
    #[serde(flatten)]
    pub kind: RequestKind,
    /// Declared cost (hint purchase) or amount (submission).
    pub cost: Points,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    /// Why the last approval attempt failed, while the request is still pending.
    pub approval_error: Option<String>,
    pub decided_by: Option<AccountId>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Bumped on every change of the stored request.
    #[serde(default)]
    pub version: u64,
}

/// The ledger effect of an approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum LedgerEffect {
    Debited { amount: Points, balance_after: Points, granted: String },
    Credited { amount: Points, balance_after: Points, granted: String },
    /// Nothing left to grant; no points moved.
    AlreadyOwned { value: String },
}

/// Payload returned by `approve`, persisted so repeat calls return it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub ledger_result: LedgerEffect,
}

/// How far a failed approval got before it failed.
enum ApplyFailure {
    /// No points moved; the claim can be handed back.
    BeforeEffect(EconError),
    /// Part of the effect landed (points or grant); needs manual repair.
    AfterEffect(EconError),
}

pub struct RequestBook<'a> {
    store: &'a Store,
    ledger: Ledger<'a>,
    feed: &'a ChangeFeed,
    clock: &'a dyn Clock,
    config: &'a EconomyConfig,
}

impl<'a> RequestBook<'a> {
    pub fn new(
        store: &'a Store,
        ledger: Ledger<'a>,
        feed: &'a ChangeFeed,
        clock: &'a dyn Clock,
        config: &'a EconomyConfig,
    ) -> Self {
        Self { store, ledger, feed, clock, config }
    }

    /// Open a pending request. No affordability check happens here.
    pub fn create_request(
        &self,
        requester_id: &str,
        kind: RequestKind,
        cost: Points,
    ) -> EconResult<Request> {
        kind.validate()?;
        match kind {
            RequestKind::HintPurchase { .. } if cost < 0 => {
                return Err(EconError::validation(format!("cost must not be negative, got {cost}")));
            }
            RequestKind::Submission { .. } if cost <= 0 || cost > self.config.max_submission_reward => {
                return Err(EconError::validation(format!(
                    "submission amount must be within 1..={}, got {cost}",
                    self.config.max_submission_reward
                )));
            }
            _ => {}
        }
        if self.store.account(requester_id)?.is_none() {
            return Err(EconError::not_found("account", requester_id));
        }

        let request = Request {
            request_id: uuid::Uuid::new_v4().to_string(),
            requester_id: requester_id.to_string(),
            kind,
            cost,
            status: RequestStatus::Pending,
            created_at: self.clock.now_utc(),
            approval_error: None,
            decided_by: None,
            decided_at: None,
            version: 0,
        };
        self.store.insert_request(&request)?;
        log::info!(
            "request {} opened by {requester_id}: {} (cost {cost})",
            request.request_id,
            request.kind.tag().as_str()
        );
        self.ledger.record(LedgerEvent::RequestCreated {
            request_id: request.request_id.clone(),
            requester_id: requester_id.to_string(),
            kind: request.kind.tag().as_str().to_string(),
            cost,
        });
        self.feed.publish_request(request.clone());
        Ok(request)
    }

    pub fn approve(&self, request_id: &str, moderator_id: &str) -> EconResult<ApprovalOutcome> {
        self.require_moderator(moderator_id, "approve requests")?;
        let request = self.get(request_id)?;
        match request.status {
            RequestStatus::Approved => return self.prior_outcome(request_id),
            RequestStatus::Rejected => return Err(transition_error(&request, "approved")),
            RequestStatus::Pending => {}
        }

        if !self
            .store
            .claim_for_approval(request_id, moderator_id, self.clock.now_utc())?
        {
            // Someone else decided first (or is handing a failed claim back).
            let current = self.get(request_id)?;
            return match current.status {
                RequestStatus::Approved => self.prior_outcome(request_id),
                RequestStatus::Rejected => Err(transition_error(&current, "approved")),
                RequestStatus::Pending => Err(EconError::ApprovalInProgress {
                    request_id: request_id.to_string(),
                }),
            };
        }

        let effect = match self.apply(&request) {
            Ok(effect) => effect,
            Err(ApplyFailure::BeforeEffect(e)) => {
                let reason = e.to_string();
                log::warn!("approval of {request_id} by {moderator_id} failed: {reason}");
                if let Err(release) = self.store.release_approval_claim(request_id, &reason) {
                    log::error!("could not hand back claim on {request_id}: {release}");
                }
                self.ledger.record(LedgerEvent::ApprovalFailed {
                    request_id: request_id.to_string(),
                    moderator_id: moderator_id.to_string(),
                    reason,
                });
                self.publish(request_id);
                return Err(e);
            }
            Err(ApplyFailure::AfterEffect(e)) => {
                log::error!(
                    "approval of {request_id} partly applied; left claimed for repair: {e}"
                );
                return Err(e);
            }
        };

        let outcome = ApprovalOutcome {
            request_id: request_id.to_string(),
            status: RequestStatus::Approved,
            ledger_result: effect,
        };
        self.store
            .record_approval_result(request_id, &serde_json::to_string(&outcome)?)?;
        log::info!("request {request_id} approved by {moderator_id}: {:?}", outcome.ledger_result);
        self.ledger.record(LedgerEvent::RequestApproved {
            request_id: request_id.to_string(),
            moderator_id: moderator_id.to_string(),
        });
        self.publish(request_id);
        Ok(outcome)
    }

    /// pending → rejected. Rejecting a rejected request is a no-op.
    pub fn reject(&self, request_id: &str, moderator_id: &str) -> EconResult<Request> {
        self.require_moderator(moderator_id, "reject requests")?;
        let request = self.get(request_id)?;
        match request.status {
            RequestStatus::Rejected => return Ok(request),
            RequestStatus::Approved => return Err(transition_error(&request, "rejected")),
            RequestStatus::Pending => {}
        }
        if !self
            .store
            .reject_pending(request_id, moderator_id, self.clock.now_utc())?
        {
            let current = self.get(request_id)?;
            return match current.status {
                RequestStatus::Rejected => Ok(current),
                _ => Err(transition_error(&current, "rejected")),
            };
        }
        log::info!("request {request_id} rejected by {moderator_id}");
        self.ledger.record(LedgerEvent::RequestRejected {
            request_id: request_id.to_string(),
            moderator_id: moderator_id.to_string(),
        });
        let rejected = self.get(request_id)?;
        self.feed.publish_request(rejected.clone());
        Ok(rejected)
    }

    /// Moderation queue: pending requests, oldest first.
    pub fn pending(&self, moderator_id: &str, kind: Option<RequestKindTag>) -> EconResult<Vec<Request>> {
        self.require_moderator(moderator_id, "view the moderation queue")?;
        self.store.pending_requests(kind)
    }

    pub fn requests_of(&self, requester_id: &str) -> EconResult<Vec<Request>> {
        self.store.requests_by(requester_id)
    }

    pub fn get(&self, request_id: &str) -> EconResult<Request> {
        self.store
            .request(request_id)?
            .ok_or_else(|| EconError::not_found("request", request_id))
    }

    fn apply(&self, request: &Request) -> Result<LedgerEffect, ApplyFailure> {
        let account_id = request.requester_id.as_str();
        match &request.kind {
            RequestKind::HintPurchase { puzzle_id, row_index } => {
                let row = RowKey::new(puzzle_id.clone(), *row_index);
                let snapshot = self
                    .ledger
                    .snapshot(account_id)
                    .map_err(ApplyFailure::BeforeEffect)?;
                let Some(level) = snapshot.next_hint_level(&row) else {
                    return Ok(LedgerEffect::AlreadyOwned {
                        value: row.hint_id(MAX_HINT_LEVEL),
                    });
                };
                let cost = self.config.hint_cost(level);
                if cost != request.cost {
                    log::info!(
                        "request {}: declared cost {} re-validated to {cost} (hint level {level})",
                        request.request_id,
                        request.cost
                    );
                }
                let hint_id = row.hint_id(level);
                match self.ledger.purchase(account_id, GrantSet::Hints, &hint_id, cost) {
                    Ok(purchase) => Ok(LedgerEffect::Debited {
                        amount: purchase.cost,
                        balance_after: purchase.balance_after,
                        granted: purchase.value,
                    }),
                    Err(EconError::AlreadyOwned { value }) => Ok(LedgerEffect::AlreadyOwned { value }),
                    Err(e) => Err(ApplyFailure::BeforeEffect(e)),
                }
            }
            RequestKind::Submission { target } => {
                // The grant decides: only the approval that adds the target pays.
                let added = self
                    .ledger
                    .grant(account_id, GrantSet::Submitted, target)
                    .map_err(ApplyFailure::BeforeEffect)?;
                if !added {
                    return Ok(LedgerEffect::AlreadyOwned { value: target.clone() });
                }
                let balance_after = self
                    .ledger
                    .credit(account_id, request.cost)
                    .map_err(ApplyFailure::AfterEffect)?;
                Ok(LedgerEffect::Credited {
                    amount: request.cost,
                    balance_after,
                    granted: target.clone(),
                })
            }
        }
    }

    fn prior_outcome(&self, request_id: &str) -> EconResult<ApprovalOutcome> {
        match self.store.approval_result(request_id)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(EconError::ApprovalInProgress {
                request_id: request_id.to_string(),
            }),
        }
    }

    fn require_moderator(&self, account_id: &str, action: &'static str) -> EconResult<()> {
        let role = self.store.account(account_id)?.map(|a| a.role);
        if role == Some(Role::Moderator) {
            return Ok(());
        }
        log::warn!("{account_id} ({role:?}) tried to {action}");
        Err(EconError::Authorization {
            account_id: account_id.to_string(),
            action,
        })
    }

    fn publish(&self, request_id: &str) {
        match self.store.request(request_id) {
            Ok(Some(request)) => {
                self.feed.publish_request(request);
            }
            Ok(None) => {}
            Err(e) => log::error!("request read for {request_id} failed, push skipped: {e}"),
        }
    }
}

fn transition_error(request: &Request, action: &'static str) -> EconError {
    EconError::InvalidTransition {
        request_id: request.request_id.clone(),
        status: request.status.as_str().to_string(),
        action,
    }
}
