pub mod attempt;

pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

pub use crate::core::time::{Clock, ManualClock, SystemClock};
pub use crate::repositories::claims::{
    owner_key, timestamp_key, ClaimStore, ClaimStoreError, MemoryClaimStore, TabClaim,
};
pub use crate::schemas::attempt::{
    AttemptResult, AttemptSnapshot, QuestionOutcome, SaveAnswerRequest, StartedAttempt,
    UpdateTimeRequest,
};
pub use crate::services::attempt_gateway::{
    AttemptApi, GatewayError, HttpAttemptGateway, StaticToken, TokenProvider,
};
pub use crate::services::attempt_session::{
    AttemptSession, EntryOutcome, SessionConfig, SessionError, SessionEvent,
};
pub use crate::services::countdown::{Countdown, TimerEngine};
pub use crate::services::security_monitor::{
    DeviceProfile, FullscreenHost, HostSignal, KeyCombo, SecurityConfig, SecurityError,
    SecurityHandler, SecurityMonitor, SecurityViolation, SignalResponse, ViolationKind,
    ViolationWarning,
};
pub use crate::services::tab_coordinator::{
    CoordinatorConfig, TabCoordinator, TabEvents, TabId, TabState,
};

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::repositories::claims::RedisClaimStore;

/// Serves the cross-tab claim coordination API.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; claims unavailable until it returns");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let claims = Arc::new(RedisClaimStore::new(redis.clone()));
    let state = AppState::new(settings, redis.clone(), claims, Arc::new(SystemClock));

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Exam portal session API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

/// Builds an [`AttemptSession`] against the exam backend configured through
/// the environment, with claims shared through Redis.
pub async fn session_from_env(
    tokens: Arc<dyn TokenProvider>,
    device: DeviceProfile,
) -> anyhow::Result<AttemptSession> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    let redis = RedisHandle::new(settings.redis().redis_url());
    redis.connect().await?;

    let gateway = HttpAttemptGateway::from_settings(&settings, tokens)?;
    Ok(AttemptSession::new(
        Arc::new(gateway),
        Arc::new(RedisClaimStore::new(redis)),
        Arc::new(SystemClock),
        device,
        SessionConfig::from_settings(&settings),
    ))
}
