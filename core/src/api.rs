//! API boundary: authenticates a call, validates it into a `Command`, runs
//! it against the economy and renders an HTTP-style response.
//!
//! RULES:
//!   - The caller's identity comes from the bearer credential only. A body
//!     `accountId` that names someone else is refused.
//!   - Canonical answers, image difficulty and rewards are server-side data;
//!     the client's copies are never trusted.
//!   - Internal failures are logged with detail and answered generically.

use crate::{
    command::{ApiCall, Command},
    completion::Attempt,
    economy::Economy,
    error::{EconError, EconResult},
    feed::{Filter, Subscription},
    types::{AccountId, GrantSet, PuzzleId, Role, RowIndex},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Identity collaborator: maps a bearer credential to an account id.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, bearer: &str) -> Option<AccountId>;
}

/// Fixed bearer → account table, loaded from config.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, AccountId>,
}

impl TokenTable {
    pub fn new(tokens: HashMap<String, AccountId>) -> Self {
        Self { tokens }
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, bearer: &str) -> Option<AccountId> {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer).trim();
        self.tokens.get(token).cloned()
    }
}

/// Content collaborator: puzzle answers and image metadata.
pub trait PuzzleCatalog: Send + Sync {
    fn row_answer(&self, puzzle_id: &str, row_index: RowIndex) -> Option<String>;
    fn vertical_word(&self, puzzle_id: &str) -> Option<String>;
    fn image_difficulty(&self, image_id: &str) -> Option<u32>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogPuzzle {
    pub rows: Vec<String>,
    pub vertical_word: String,
}

/// In-memory catalog, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub puzzles: HashMap<PuzzleId, CatalogPuzzle>,
    /// Image id → difficulty.
    #[serde(default)]
    pub images: HashMap<String, u32>,
}

impl StaticCatalog {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let catalog: StaticCatalog = serde_json::from_str(&content)?;
        if let Some((image_id, _)) = catalog.images.iter().find(|(_, &d)| d == 0) {
            anyhow::bail!("{path}: image '{image_id}' has difficulty 0, expected at least 1");
        }
        Ok(catalog)
    }

    pub fn with_puzzle(mut self, puzzle_id: &str, rows: &[&str], vertical_word: &str) -> Self {
        self.puzzles.insert(
            puzzle_id.to_string(),
            CatalogPuzzle {
                rows: rows.iter().map(|r| r.to_string()).collect(),
                vertical_word: vertical_word.to_string(),
            },
        );
        self
    }

    pub fn with_image(mut self, image_id: &str, difficulty: u32) -> Self {
        self.images.insert(image_id.to_string(), difficulty);
        self
    }
}

impl PuzzleCatalog for StaticCatalog {
    fn row_answer(&self, puzzle_id: &str, row_index: RowIndex) -> Option<String> {
        self.puzzles
            .get(puzzle_id)?
            .rows
            .get(usize::try_from(row_index).ok()?)
            .cloned()
    }

    fn vertical_word(&self, puzzle_id: &str) -> Option<String> {
        self.puzzles.get(puzzle_id).map(|p| p.vertical_word.clone())
    }

    fn image_difficulty(&self, image_id: &str) -> Option<u32> {
        self.images.get(image_id).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    fn from_error(route: &str, err: &EconError) -> Self {
        let status = err.status_code();
        if status >= 500 {
            log::error!("{route} failed: {err}");
        } else {
            log::debug!("{route} refused ({status}): {err}");
        }
        Self {
            status,
            body: json!({ "error": err.public_message() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct Api {
    economy: Economy,
    auth: Arc<dyn Authenticator>,
    catalog: Arc<dyn PuzzleCatalog>,
}

impl Api {
    pub fn new(economy: Economy, auth: Arc<dyn Authenticator>, catalog: Arc<dyn PuzzleCatalog>) -> Self {
        Self { economy, auth, catalog }
    }

    /// Another API on a fresh connection to the same economy.
    pub fn reopen(&self) -> EconResult<Self> {
        Ok(Self {
            economy: self.economy.reopen()?,
            auth: Arc::clone(&self.auth),
            catalog: Arc::clone(&self.catalog),
        })
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    pub fn handle(&self, bearer: &str, call: &ApiCall) -> ApiResponse {
        match self.try_handle(bearer, call) {
            Ok(response) => response,
            Err(e) => ApiResponse::from_error(&call.route, &e),
        }
    }

    /// Open a change subscription. Accounts may only watch themselves; the
    /// request collection is for moderators.
    pub fn subscribe(&self, bearer: &str, filter: Filter) -> EconResult<Subscription> {
        let caller = self.caller(bearer)?;
        match &filter {
            Filter::Account { account_id } if *account_id == caller => {}
            Filter::Requests { .. } if self.role_of(&caller)? == Some(Role::Moderator) => {}
            _ => {
                log::warn!("{caller} refused subscription on {filter:?}");
                return Err(EconError::Authorization {
                    account_id: caller,
                    action: "subscribe to this channel",
                });
            }
        }
        Ok(self.economy.feed().subscribe(filter))
    }

    fn try_handle(&self, bearer: &str, call: &ApiCall) -> EconResult<ApiResponse> {
        let caller = self.caller(bearer)?;
        if let Some(claimed) = call.account_id.as_deref() {
            if claimed != caller {
                log::warn!("{caller} sent a call on behalf of {claimed}");
                return Err(EconError::Authorization {
                    account_id: caller,
                    action: "act for another account",
                });
            }
        }
        let command = Command::validate(call)?;
        if let Some(reward) = call.reward {
            log::debug!("{caller}: ignoring client-declared reward {reward} on {}", command.route());
        }
        self.execute(&caller, command)
    }

    fn execute(&self, caller: &str, command: Command) -> EconResult<ApiResponse> {
        let eco = &self.economy;
        match command {
            Command::Signup { display_name } => {
                let account = eco.register(caller, &display_name)?;
                Ok(ApiResponse::created(json!({ "account": account })))
            }
            Command::Profile => {
                let account = eco.ledger().snapshot(caller)?;
                Ok(ApiResponse::ok(json!({ "account": account })))
            }
            Command::CompleteRow { puzzle_id, row_index, answer } => {
                let canonical = self
                    .catalog
                    .row_answer(&puzzle_id, row_index)
                    .ok_or_else(|| EconError::not_found("row", format!("{puzzle_id}#{row_index}")))?;
                let attempt = eco.tracker().submit_row(
                    caller,
                    &puzzle_id,
                    row_index,
                    &answer,
                    &canonical,
                    eco.config().row_reward,
                )?;
                attempt_response(attempt)
            }
            Command::CompleteVerticalWord { puzzle_id, word } => {
                let canonical = self
                    .catalog
                    .vertical_word(&puzzle_id)
                    .ok_or_else(|| EconError::not_found("puzzle", puzzle_id.as_str()))?;
                let attempt = eco
                    .tracker()
                    .submit_vertical_word(caller, &puzzle_id, &word, &canonical)?;
                attempt_response(attempt)
            }
            Command::CompletedRows { puzzle_id } => {
                let rows = eco.tracker().list_completed_rows(caller, &puzzle_id)?;
                Ok(ApiResponse::ok(json!(rows)))
            }
            Command::BuyImage { image_id } => {
                let difficulty = self
                    .catalog
                    .image_difficulty(&image_id)
                    .ok_or_else(|| EconError::not_found("image", image_id.as_str()))?;
                if difficulty == 0 {
                    log::warn!("catalog image {image_id} has difficulty 0");
                    return Err(EconError::validation(format!("image '{image_id}' is not for sale")));
                }
                let cost = eco.config().image_cost(difficulty);
                let purchase = eco.ledger().purchase(caller, GrantSet::Images, &image_id, cost)?;
                Ok(ApiResponse::ok(json!({
                    "pointsTotal": purchase.balance_after,
                    "cost": purchase.cost,
                    "imageId": purchase.value,
                })))
            }
            Command::CreateRequest { kind, cost } => {
                let request = eco.requests().create_request(caller, kind, cost)?;
                Ok(ApiResponse::created(json!({
                    "requestId": request.request_id,
                    "status": request.status,
                })))
            }
            Command::Approve { request_id } => {
                let outcome = eco.requests().approve(&request_id, caller)?;
                Ok(ApiResponse::ok(serde_json::to_value(outcome)?))
            }
            Command::Reject { request_id } => {
                let request = eco.requests().reject(&request_id, caller)?;
                Ok(ApiResponse::ok(json!({
                    "requestId": request.request_id,
                    "status": request.status,
                })))
            }
            Command::ModerationQueue { kind } => {
                let queue = eco.requests().pending(caller, kind)?;
                Ok(ApiResponse::ok(serde_json::to_value(queue)?))
            }
            Command::MyRequests => {
                let mine = eco.requests().requests_of(caller)?;
                Ok(ApiResponse::ok(serde_json::to_value(mine)?))
            }
        }
    }

    fn caller(&self, bearer: &str) -> EconResult<AccountId> {
        self.auth.authenticate(bearer).ok_or(EconError::Unauthenticated)
    }

    fn role_of(&self, account_id: &str) -> EconResult<Option<Role>> {
        Ok(self.economy.store().account(account_id)?.map(|a| a.role))
    }
}

fn attempt_response(attempt: Attempt) -> EconResult<ApiResponse> {
    match attempt {
        Attempt::Incorrect => Err(EconError::validation("incorrect answer")),
        Attempt::Completed(completion) => Ok(ApiResponse::ok(serde_json::to_value(completion)?)),
    }
}
