//! API boundary: authentication, validation, status codes.

use crossword_core::{
    api::{Api, ApiResponse, StaticCatalog, TokenTable},
    client::ModerationQueue,
    clock::ManualClock,
    command::ApiCall,
    config::EconomyConfig,
    economy::Economy,
    feed::Filter,
    request::{Request, RequestKindTag},
};
use serde_json::json;
use std::sync::Arc;

fn api() -> Api {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = EconomyConfig::default_test();
    let tokens = TokenTable::new(config.tokens.clone());
    let eco = Economy::in_memory_with_clock(config, Arc::new(ManualClock::new())).expect("economy");
    let catalog = StaticCatalog::default()
        .with_puzzle("p1", &["cat", "dog"], "cd")
        .with_image("img-3", 3)
        .with_image("img-0", 0);
    let api = Api::new(eco, Arc::new(tokens), Arc::new(catalog));
    for (token, name) in [("tok-alice", "Alice"), ("tok-bob", "Bob"), ("tok-mod", "Mod")] {
        let r = api.handle(token, &signup(name));
        assert_eq!(r.status, 201, "signup {name}: {}", r.body);
    }
    api.economy().promote_to_moderator("mod").unwrap();
    api
}

fn signup(name: &str) -> ApiCall {
    ApiCall { display_name: Some(name.into()), ..ApiCall::route("signup") }
}

fn complete_row(row: i64, answer: &str) -> ApiCall {
    ApiCall {
        puzzle_id: Some("p1".into()),
        row_index: Some(row),
        answer: Some(answer.into()),
        ..ApiCall::route("rows.complete")
    }
}

fn hint_request(row: i64) -> ApiCall {
    ApiCall {
        kind: Some("hint-purchase".into()),
        puzzle_id: Some("p1".into()),
        row_index: Some(row),
        cost: Some(10),
        ..ApiCall::route("requests.create")
    }
}

fn decide(route: &str, request_id: &str) -> ApiCall {
    ApiCall { request_id: Some(request_id.into()), ..ApiCall::route(route) }
}

#[test]
fn signup_and_profile() {
    let api = api();
    let r = api.handle("Bearer tok-alice", &ApiCall::route("profile"));
    assert_eq!(r.status, 200);
    assert_eq!(r.body["account"]["account_id"], "alice");
    assert_eq!(r.body["account"]["balance"], 0);
}

#[test]
fn missing_or_unknown_credential_is_401() {
    let api = api();
    assert_eq!(api.handle("", &ApiCall::route("profile")).status, 401);
    assert_eq!(api.handle("tok-nobody", &ApiCall::route("profile")).status, 401);
}

#[test]
fn row_completion_uses_the_server_reward() {
    let api = api();
    let call = ApiCall { reward: Some(1_000), ..complete_row(0, "Cat") };
    let r = api.handle("tok-alice", &call);
    assert_eq!(r.status, 200);
    assert_eq!(r.body["fresh"], true);
    assert_eq!(r.body["pointsTotal"], 10);

    let again = api.handle("tok-alice", &complete_row(0, "cat"));
    assert_eq!(again.status, 200);
    assert_eq!(again.body["fresh"], false);
    assert_eq!(again.body["pointsTotal"], 10);

    let rows = api.handle(
        "tok-alice",
        &ApiCall { puzzle_id: Some("p1".into()), ..ApiCall::route("rows.completed") },
    );
    assert_eq!(rows.body, json!([0]));
}

#[test]
fn bad_input_is_400() {
    let api = api();
    assert_eq!(api.handle("tok-alice", &complete_row(0, "wrong")).status, 400);
    assert_eq!(api.handle("tok-alice", &ApiCall::route("rows.complete")).status, 400);
    assert_eq!(api.handle("tok-alice", &complete_row(-3, "cat")).status, 400);
    assert_eq!(api.handle("tok-alice", &ApiCall::route("no-such-route")).status, 400);
}

#[test]
fn unknown_row_is_404() {
    let api = api();
    assert_eq!(api.handle("tok-alice", &complete_row(9, "cat")).status, 404);
}

#[test]
fn acting_for_another_account_is_403() {
    let api = api();
    let call = ApiCall { account_id: Some("bob".into()), ..complete_row(0, "cat") };
    assert_eq!(api.handle("tok-alice", &call).status, 403);
    assert_eq!(api.economy().ledger().balance("bob").unwrap(), 0);
}

#[test]
fn vertical_word_reports_the_tier() {
    let api = api();
    let call = ApiCall {
        puzzle_id: Some("p1".into()),
        word: Some("CD".into()),
        ..ApiCall::route("vertical-word.complete")
    };
    let r = api.handle("tok-bob", &call);
    assert_eq!(r.status, 200);
    assert_eq!(r.body["tier"], "top");
    assert_eq!(r.body["pointsTotal"], 50);
}

#[test]
fn image_purchase_costs_twice_the_difficulty() {
    let api = api();
    api.economy().ledger().credit("alice", 10).unwrap();
    let call = ApiCall { image_id: Some("img-3".into()), ..ApiCall::route("buy-image") };

    let r = api.handle("tok-alice", &call);
    assert_eq!(r.status, 200);
    assert_eq!(r.body["pointsTotal"], 4);

    let again = api.handle("tok-alice", &call);
    assert_eq!(again.status, 409);
    assert_eq!(api.economy().ledger().balance("alice").unwrap(), 4);

    let unknown = ApiCall { image_id: Some("img-x".into()), ..ApiCall::route("buy-image") };
    assert_eq!(api.handle("tok-alice", &unknown).status, 404);
}

#[test]
fn unpriced_image_is_refused_without_charging() {
    let api = api();
    api.economy().ledger().credit("alice", 10).unwrap();
    let call = ApiCall { image_id: Some("img-0".into()), ..ApiCall::route("buy-image") };

    let r = api.handle("tok-alice", &call);
    assert_eq!(r.status, 400);
    assert_eq!(r.body["error"], "Invalid input: image 'img-0' is not for sale");
    assert_eq!(api.economy().ledger().balance("alice").unwrap(), 10);
}

#[test]
fn catalog_file_rejects_zero_difficulty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, r#"{"images": {"free": 0}}"#).unwrap();
    assert!(StaticCatalog::load(path.to_str().unwrap()).is_err());

    std::fs::write(&path, r#"{"images": {"cheap": 1}}"#).unwrap();
    let catalog = StaticCatalog::load(path.to_str().unwrap()).unwrap();
    assert_eq!(catalog.images["cheap"], 1);
}

#[test]
fn request_lifecycle_over_the_api() {
    let api = api();
    api.economy().ledger().credit("alice", 9).unwrap();

    let created = api.handle("tok-alice", &hint_request(1));
    assert_eq!(created.status, 201);
    assert_eq!(created.body["status"], "pending");
    let id = created.body["requestId"].as_str().expect("request id").to_string();

    // Not a moderator.
    assert_eq!(api.handle("tok-bob", &decide("requests.approve", &id)).status, 403);

    // Short by one point.
    let refused = api.handle("tok-mod", &decide("requests.approve", &id));
    assert_eq!(refused.status, 422);

    api.economy().ledger().credit("alice", 1).unwrap();
    let approved = api.handle("tok-mod", &decide("requests.approve", &id));
    assert_eq!(approved.status, 200);
    assert_eq!(approved.body["status"], "approved");
    assert_eq!(approved.body["ledgerResult"]["effect"], "debited");

    let repeat = api.handle("tok-mod", &decide("requests.approve", &id));
    assert_eq!(repeat, approved);

    assert_eq!(api.handle("tok-mod", &decide("requests.reject", &id)).status, 409);
}

#[test]
fn moderation_queue_follows_pushes() {
    let api = api();
    let sub = api
        .subscribe("tok-mod", Filter::requests(Some(RequestKindTag::HintPurchase)))
        .expect("moderator subscription");
    assert_eq!(
        api.subscribe("tok-alice", Filter::requests(None)).unwrap_err().status_code(),
        403
    );

    let first = api.handle("tok-alice", &hint_request(0));
    let ApiResponse { body, .. } = api.handle(
        "tok-mod",
        &ApiCall { kind: Some("hint-purchase".into()), ..ApiCall::route("requests.queue") },
    );
    let mut queue = ModerationQueue::new(Some(RequestKindTag::HintPurchase));
    queue.load(serde_json::from_value::<Vec<Request>>(body).unwrap());
    assert_eq!(queue.len(), 1);
    sub.drain();

    let submission = ApiCall {
        kind: Some("submission".into()),
        target: Some("p1".into()),
        cost: Some(15),
        ..ApiCall::route("requests.create")
    };
    api.handle("tok-bob", &submission);
    api.handle("tok-bob", &hint_request(1));
    for change in sub.drain() {
        queue.apply(&change);
    }
    assert_eq!(queue.len(), 2, "submissions belong to the other queue");

    let first_id = first.body["requestId"].as_str().unwrap();
    api.handle("tok-mod", &decide("requests.reject", first_id));
    for change in sub.drain() {
        queue.apply(&change);
    }
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pending()[0].requester_id, "bob");
}

#[test]
fn accounts_may_only_watch_themselves() {
    let api = api();
    assert!(api.subscribe("tok-alice", Filter::account("alice")).is_ok());
    assert_eq!(
        api.subscribe("tok-alice", Filter::account("bob")).unwrap_err().status_code(),
        403
    );
}
