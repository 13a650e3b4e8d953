use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};

use crate::api;
use crate::core::time::ManualClock;
use crate::core::{config::Settings, redis::RedisHandle, security, state::AppState};
use crate::repositories::claims::MemoryClaimStore;

const TEST_JWT_SECRET: &str = "test-idp-secret";
const TEST_REDIS_DB: &str = "1";
pub(crate) const TEST_START_MILLIS: i64 = 1_700_000_000_000;

/// Serializes tests that touch process environment variables.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn set_test_env() {
    std::env::set_var("PORTAL_ENV", "test");
    std::env::set_var("PORTAL_STRICT_CONFIG", "0");
    std::env::set_var("IDP_JWT_SECRET", TEST_JWT_SECRET);
    std::env::set_var("IDP_JWT_ALGORITHM", "HS256");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", TEST_REDIS_DB);
    std::env::remove_var("REDIS_PASSWORD");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("API_V1_STR");
    std::env::remove_var("TAB_HEARTBEAT_INTERVAL_MS");
    std::env::remove_var("TAB_STALE_TIMEOUT_MS");
    std::env::remove_var("MAX_SECURITY_VIOLATIONS");
    std::env::remove_var("CLAIM_RATE_LIMIT_PER_MINUTE");
}

pub(crate) fn test_settings() -> Settings {
    let _guard = env_lock();
    set_test_env();
    Settings::load().expect("settings")
}

/// Router over an in-memory claim store and a manual clock. Redis stays
/// disconnected, so rate limiting fails open.
pub(crate) struct TestContext {
    pub(crate) settings: Settings,
    pub(crate) app: Router,
    pub(crate) store: Arc<MemoryClaimStore>,
    pub(crate) clock: Arc<ManualClock>,
}

pub(crate) fn setup_test_context() -> TestContext {
    let settings = test_settings();
    let store = Arc::new(MemoryClaimStore::new());
    let clock = Arc::new(ManualClock::new(TEST_START_MILLIS));
    let redis = RedisHandle::new(settings.redis().redis_url());

    let state = AppState::new(settings.clone(), redis, store.clone(), clock.clone());
    let app = api::router::router(state);

    TestContext { settings, app, store, clock }
}

pub(crate) fn state_with(settings: Settings) -> AppState {
    let redis = RedisHandle::new(settings.redis().redis_url());
    AppState::new(
        settings,
        redis,
        Arc::new(MemoryClaimStore::new()),
        Arc::new(ManualClock::new(TEST_START_MILLIS)),
    )
}

pub(crate) async fn reset_redis(url: String) -> redis::RedisResult<()> {
    let client = redis::Client::open(url)?;
    let mut manager = redis::aio::ConnectionManager::new(client).await?;
    redis::cmd("FLUSHDB").query_async::<_, ()>(&mut manager).await?;
    Ok(())
}

pub(crate) fn bearer_token(user_id: &str, settings: &Settings) -> String {
    security::issue_test_token(user_id, settings, 3_600)
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
