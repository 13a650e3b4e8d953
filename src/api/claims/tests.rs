use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::repositories::claims::{owner_key, timestamp_key};
use crate::test_support::{self, TestContext};

const CLAIM_URI: &str = "/api/v1/attempts/X/claim";
const SCOPED: &str = "student-1:X";

async fn call(
    ctx: &TestContext,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(method, uri, token, body))
        .await
        .expect("response");
    let status = response.status();
    (status, test_support::read_json(response).await)
}

fn token(ctx: &TestContext) -> String {
    test_support::bearer_token("student-1", &ctx.settings)
}

#[tokio::test]
async fn requires_bearer_token() {
    let ctx = test_support::setup_test_context();

    let (status, body) =
        call(&ctx, Method::POST, CLAIM_URI, None, Some(json!({"tabId": "tabA"}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid authentication credentials");
}

#[tokio::test]
async fn first_tab_wins_and_second_sees_owner() {
    let ctx = test_support::setup_test_context();
    let token = token(&ctx);

    let (status, first) =
        call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabA"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["granted"], true);
    assert_eq!(first["ownerTabId"], "tabA");
    assert_eq!(first["lastHeartbeatAt"], "2023-11-14T22:13:20Z");

    let (_, second) =
        call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabB"}))).await;
    assert_eq!(second["granted"], false);
    assert_eq!(second["ownerTabId"], "tabA");
}

#[tokio::test]
async fn stale_claim_is_taken_over() {
    let ctx = test_support::setup_test_context();
    let token = token(&ctx);

    call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabA"}))).await;
    ctx.clock.advance(Duration::from_millis(30_001));

    let (_, body) =
        call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabB"}))).await;

    assert_eq!(body["granted"], true);
    assert_eq!(ctx.store.get_raw(&owner_key(SCOPED)).as_deref(), Some("tabB"));
}

#[tokio::test]
async fn heartbeat_reports_ownership_and_refreshes() {
    let ctx = test_support::setup_test_context();
    let token = token(&ctx);
    call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabA"}))).await;

    ctx.clock.advance(Duration::from_secs(5));
    let uri = "/api/v1/attempts/X/heartbeat";
    let (_, owner) = call(&ctx, Method::POST, uri, Some(&token), Some(json!({"tabId": "tabA"}))).await;
    let (_, other) = call(&ctx, Method::POST, uri, Some(&token), Some(json!({"tabId": "tabB"}))).await;

    assert_eq!(owner["owner"], true);
    assert_eq!(other["owner"], false);
    assert_eq!(
        ctx.store.get_raw(&timestamp_key(SCOPED)),
        Some((test_support::TEST_START_MILLIS + 5_000).to_string())
    );
}

#[tokio::test]
async fn release_only_by_owner_and_force_release_always() {
    let ctx = test_support::setup_test_context();
    let token = token(&ctx);
    call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabA"}))).await;

    let (_, by_other) =
        call(&ctx, Method::DELETE, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabB"}))).await;
    assert_eq!(by_other["released"], false);
    assert!(ctx.store.get_raw(&owner_key(SCOPED)).is_some());

    let (_, by_owner) =
        call(&ctx, Method::DELETE, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabA"}))).await;
    assert_eq!(by_owner["released"], true);
    assert!(ctx.store.get_raw(&owner_key(SCOPED)).is_none());

    call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabB"}))).await;
    let (status, forced) =
        call(&ctx, Method::DELETE, "/api/v1/attempts/X/claim/force", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(forced["released"], true);
    assert!(ctx.store.get_raw(&owner_key(SCOPED)).is_none());
}

#[tokio::test]
async fn status_reports_staleness_and_ownership() {
    let ctx = test_support::setup_test_context();
    let token = token(&ctx);

    let (_, empty) = call(&ctx, Method::GET, CLAIM_URI, Some(&token), None).await;
    assert_eq!(empty["ownerTabId"], serde_json::Value::Null);
    assert_eq!(empty["stale"], false);

    call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": "tabA"}))).await;
    let (_, fresh) =
        call(&ctx, Method::GET, &format!("{CLAIM_URI}?tabId=tabA"), Some(&token), None).await;
    assert_eq!(fresh["isOwner"], true);
    assert_eq!(fresh["stale"], false);

    ctx.clock.advance(Duration::from_secs(31));
    let (_, stale) =
        call(&ctx, Method::GET, &format!("{CLAIM_URI}?tabId=tabB"), Some(&token), None).await;
    assert_eq!(stale["isOwner"], false);
    assert_eq!(stale["stale"], true);
}

#[tokio::test]
async fn rejects_empty_tab_id() {
    let ctx = test_support::setup_test_context();
    let token = token(&ctx);

    let (status, _) =
        call(&ctx, Method::POST, CLAIM_URI, Some(&token), Some(json!({"tabId": ""}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn other_user_cannot_touch_a_claim() {
    let ctx = test_support::setup_test_context();
    let owner = token(&ctx);
    let intruder = test_support::bearer_token("student-2", &ctx.settings);
    call(&ctx, Method::POST, CLAIM_URI, Some(&owner), Some(json!({"tabId": "tabA"}))).await;

    call(&ctx, Method::DELETE, "/api/v1/attempts/X/claim/force", Some(&intruder), None).await;
    call(&ctx, Method::DELETE, CLAIM_URI, Some(&intruder), Some(json!({"tabId": "tabA"}))).await;
    let (_, heartbeat) = call(
        &ctx,
        Method::POST,
        "/api/v1/attempts/X/heartbeat",
        Some(&intruder),
        Some(json!({"tabId": "tabA"})),
    )
    .await;
    assert_eq!(heartbeat["owner"], false);
    assert_eq!(ctx.store.get_raw(&owner_key(SCOPED)).as_deref(), Some("tabA"));

    let (_, status) =
        call(&ctx, Method::GET, &format!("{CLAIM_URI}?tabId=tabA"), Some(&intruder), None).await;
    assert_eq!(status["ownerTabId"], serde_json::Value::Null);

    let (_, mine) =
        call(&ctx, Method::POST, CLAIM_URI, Some(&owner), Some(json!({"tabId": "tabB"}))).await;
    assert_eq!(mine["granted"], false);
    assert_eq!(mine["ownerTabId"], "tabA");
}
