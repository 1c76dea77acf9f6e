use crate::{
    error::{EconError, EconResult},
    request::{RequestKind, RequestKindTag},
    types::{AccountId, Points, PuzzleId, RequestId, RowIndex},
};
use serde::{Deserialize, Serialize};

/// A call as it arrives over the wire. Every field a route may need is
/// optional here; `validate` turns it into a `Command` or a 400.
/// Routes are only ever added, never removed or renamed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    pub route: String,
    pub account_id: Option<AccountId>,
    pub display_name: Option<String>,
    pub puzzle_id: Option<PuzzleId>,
    pub row_index: Option<i64>,
    pub answer: Option<String>,
    pub word: Option<String>,
    /// Client-declared reward. Ignored; rewards come from config.
    pub reward: Option<Points>,
    pub request_id: Option<RequestId>,
    pub kind: Option<String>,
    pub target: Option<String>,
    pub cost: Option<Points>,
    pub image_id: Option<String>,
}

impl ApiCall {
    pub fn route(route: &str) -> Self {
        Self { route: route.to_string(), ..Self::default() }
    }
}

/// A validated call. Handlers match on this exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Accounts ─────────────────────────────────
    Signup { display_name: String },
    Profile,

    // ── Completion ───────────────────────────────
    CompleteRow { puzzle_id: PuzzleId, row_index: RowIndex, answer: String },
    CompleteVerticalWord { puzzle_id: PuzzleId, word: String },
    CompletedRows { puzzle_id: PuzzleId },

    // ── Purchases and requests ───────────────────
    BuyImage { image_id: String },
    CreateRequest { kind: RequestKind, cost: Points },
    Approve { request_id: RequestId },
    Reject { request_id: RequestId },
    ModerationQueue { kind: Option<RequestKindTag> },
    MyRequests,
}

impl Command {
    /// Stable route name, used in logs.
    pub fn route(&self) -> &'static str {
        match self {
            Self::Signup { .. }               => "signup",
            Self::Profile                     => "profile",
            Self::CompleteRow { .. }          => "rows.complete",
            Self::CompleteVerticalWord { .. } => "vertical-word.complete",
            Self::CompletedRows { .. }        => "rows.completed",
            Self::BuyImage { .. }             => "buy-image",
            Self::CreateRequest { .. }        => "requests.create",
            Self::Approve { .. }              => "requests.approve",
            Self::Reject { .. }               => "requests.reject",
            Self::ModerationQueue { .. }      => "requests.queue",
            Self::MyRequests                  => "requests.mine",
        }
    }

    pub fn validate(call: &ApiCall) -> EconResult<Self> {
        let cmd = match call.route.as_str() {
            "signup" => Self::Signup {
                display_name: required(&call.display_name, "displayName")?,
            },
            "profile" => Self::Profile,
            "rows.complete" => Self::CompleteRow {
                puzzle_id: required(&call.puzzle_id, "puzzleId")?,
                row_index: row_index(call.row_index)?,
                answer: required(&call.answer, "answer")?,
            },
            "vertical-word.complete" => Self::CompleteVerticalWord {
                puzzle_id: required(&call.puzzle_id, "puzzleId")?,
                word: required(&call.word, "word")?,
            },
            "rows.completed" => Self::CompletedRows {
                puzzle_id: required(&call.puzzle_id, "puzzleId")?,
            },
            "buy-image" => Self::BuyImage {
                image_id: required(&call.image_id, "imageId")?,
            },
            "requests.create" => {
                let kind = required(&call.kind, "kind")?;
                let tag = RequestKindTag::parse(&kind)
                    .ok_or_else(|| EconError::validation(format!("unknown request kind '{kind}'")))?;
                let kind = match tag {
                    RequestKindTag::HintPurchase => RequestKind::HintPurchase {
                        puzzle_id: required(&call.puzzle_id, "puzzleId")?,
                        row_index: row_index(call.row_index)?,
                    },
                    RequestKindTag::Submission => RequestKind::Submission {
                        target: required(&call.target, "target")?,
                    },
                };
                let cost = call
                    .cost
                    .ok_or_else(|| EconError::validation("cost is required"))?;
                Self::CreateRequest { kind, cost }
            }
            "requests.approve" => Self::Approve {
                request_id: required(&call.request_id, "requestId")?,
            },
            "requests.reject" => Self::Reject {
                request_id: required(&call.request_id, "requestId")?,
            },
            "requests.queue" => Self::ModerationQueue {
                kind: match call.kind.as_deref() {
                    None => None,
                    Some(k) => Some(RequestKindTag::parse(k).ok_or_else(|| {
                        EconError::validation(format!("unknown request kind '{k}'"))
                    })?),
                },
            },
            "requests.mine" => Self::MyRequests,
            other => return Err(EconError::validation(format!("unknown route '{other}'"))),
        };
        Ok(cmd)
    }
}

fn required(value: &Option<String>, name: &str) -> EconResult<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(EconError::validation(format!("{name} is required"))),
    }
}

fn row_index(value: Option<i64>) -> EconResult<RowIndex> {
    let raw = value.ok_or_else(|| EconError::validation("rowIndex is required"))?;
    RowIndex::try_from(raw)
        .map_err(|_| EconError::validation(format!("rowIndex must be a non-negative integer, got {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_are_validation_errors() {
        let call = ApiCall::route("rows.complete");
        let err = Command::validate(&call).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn negative_row_index_is_rejected() {
        let call = ApiCall {
            puzzle_id: Some("p1".into()),
            row_index: Some(-1),
            answer: Some("cat".into()),
            ..ApiCall::route("rows.complete")
        };
        assert!(matches!(Command::validate(&call), Err(EconError::Validation(_))));
    }

    #[test]
    fn hint_request_needs_a_row() {
        let call = ApiCall {
            kind: Some("hint-purchase".into()),
            puzzle_id: Some("p1".into()),
            cost: Some(10),
            ..ApiCall::route("requests.create")
        };
        assert!(Command::validate(&call).is_err());

        let call = ApiCall { row_index: Some(2), ..call };
        assert_eq!(
            Command::validate(&call).unwrap(),
            Command::CreateRequest {
                kind: RequestKind::HintPurchase { puzzle_id: "p1".into(), row_index: 2 },
                cost: 10,
            }
        );
    }

    #[test]
    fn client_declared_image_difficulty_is_not_read() {
        let call: ApiCall = serde_json::from_str(
            r#"{"route": "buy-image", "imageId": "img-3", "difficulty": 1}"#,
        )
        .unwrap();
        assert_eq!(
            Command::validate(&call).unwrap(),
            Command::BuyImage { image_id: "img-3".into() }
        );
    }

    #[test]
    fn unknown_route_is_rejected() {
        assert!(Command::validate(&ApiCall::route("transfer")).is_err());
    }
}
