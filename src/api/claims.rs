use axum::extract::{Path, Query, State};
use axum::routing::{delete, post};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::core::time::format_millis;
use crate::repositories::claims::TabClaim;
use crate::schemas::claim::{
    ClaimResponse, ClaimStatusQuery, ClaimStatusResponse, HeartbeatResponse, ReleaseResponse,
    TabRequest,
};
use crate::services::tab_coordinator;

const CLAIM_RATE_WINDOW_SECONDS: u64 = 60;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:attempt_id/claim", post(claim).get(claim_status).delete(release))
        .route("/:attempt_id/claim/force", delete(force_release))
        .route("/:attempt_id/heartbeat", post(heartbeat))
}

/// Claims are namespaced by the token subject, so one user can never touch
/// another user's claim on the same attempt id.
fn scoped_attempt(user_id: &str, attempt_id: &str) -> String {
    format!("{user_id}:{attempt_id}")
}

fn owner_fields(claim: Option<&TabClaim>) -> (Option<String>, Option<String>) {
    match claim {
        Some(claim) => {
            (Some(claim.owner_tab_id.clone()), claim.last_heartbeat_ms.map(format_millis))
        }
        None => (None, None),
    }
}

async fn claim(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<TabRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let rate_key = format!("rl:claims:{user_id}");
    let allowed = state
        .redis()
        .rate_limit(
            &rate_key,
            state.settings().session().claim_rate_limit_per_minute,
            CLAIM_RATE_WINDOW_SECONDS,
        )
        .await
        .unwrap_or(true);
    if !allowed {
        return Err(ApiError::TooManyRequests("Too many claim attempts, try again later"));
    }

    let scoped = scoped_attempt(&user_id, &attempt_id);
    let granted = tab_coordinator::acquire(
        state.claims(),
        &scoped,
        &payload.tab_id,
        state.clock().now_millis(),
        state.settings().session().stale_timeout(),
    )
    .await?;

    let current = state.claims().read(&scoped).await?;
    let (owner_tab_id, last_heartbeat_at) = owner_fields(current.as_ref());

    tracing::info!(
        user_id = %user_id,
        attempt_id = %attempt_id,
        tab_id = %payload.tab_id,
        granted,
        "Tab claim requested"
    );

    Ok(Json(ClaimResponse { granted, owner_tab_id, last_heartbeat_at }))
}

async fn heartbeat(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<TabRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let scoped = scoped_attempt(&user_id, &attempt_id);
    let owner = state.claims().refresh(&scoped, &payload.tab_id, state.clock().now_millis()).await?;

    if !owner {
        tracing::debug!(attempt_id = %attempt_id, tab_id = %payload.tab_id, "Heartbeat from non-owner");
    }

    Ok(Json(HeartbeatResponse { owner }))
}

async fn release(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<TabRequest>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let scoped = scoped_attempt(&user_id, &attempt_id);
    let released = state.claims().release(&scoped, &payload.tab_id).await?;

    Ok(Json(ReleaseResponse { released }))
}

async fn force_release(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    state.claims().force_release(&scoped_attempt(&user_id, &attempt_id)).await?;

    tracing::warn!(user_id = %user_id, attempt_id = %attempt_id, "Tab claim force released");

    Ok(Json(ReleaseResponse { released: true }))
}

async fn claim_status(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Query(query): Query<ClaimStatusQuery>,
) -> Result<Json<ClaimStatusResponse>, ApiError> {
    let current = state.claims().read(&scoped_attempt(&user_id, &attempt_id)).await?;
    let stale = current.as_ref().is_some_and(|claim| {
        claim.is_stale(state.clock().now_millis(), state.settings().session().stale_timeout())
    });
    let is_owner = match (&current, &query.tab_id) {
        (Some(claim), Some(tab_id)) => claim.is_owned_by(tab_id),
        _ => false,
    };
    let (owner_tab_id, last_heartbeat_at) = owner_fields(current.as_ref());

    Ok(Json(ClaimStatusResponse { owner_tab_id, last_heartbeat_at, stale, is_owner }))
}

#[cfg(test)]
mod tests;
