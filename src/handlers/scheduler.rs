//! # Scheduled Sync Handler
//!
//! Endpoint for the external cron service. Authenticated by a shared
//! bearer secret; outside local/test profiles a missing secret is a
//! deployment fault and the endpoint refuses to run.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::{ApiError, unauthorized};
use crate::scheduler::{Scheduler, TickStats};
use crate::server::AppState;

/// Runs one scheduler pass: reap stuck jobs, sync stale connections
#[utoipa::path(
    post,
    path = "/sync/scheduled",
    responses(
        (status = 200, description = "Scheduler pass summary", body = TickStats),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError),
        (status = 500, description = "Cron secret not configured", body = ApiError)
    ),
    tag = "scheduler"
)]
pub async fn run_scheduled(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TickStats>, ApiError> {
    authorize_cron(&state, &headers)?;

    let scheduler = Scheduler::new(
        Arc::new(state.db.clone()),
        state.registry.clone(),
        state.crypto_key.clone(),
        &state.config.scheduler,
        state.config.sync.guard_minutes as i64,
        state.config.sync.hos_dedup_hours as i64,
    );
    let stats = scheduler.run_scheduled_pass().await;
    Ok(Json(stats))
}

fn authorize_cron(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = state.config.cron_secret.as_deref() else {
        if state.config.is_dev_profile() {
            return Ok(());
        }
        // Never run an unauthenticated scheduler in production.
        warn!("Scheduled sync rejected: cron secret is not configured");
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Scheduler secret is not configured",
        ));
    };

    let token = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))?;

    if ConstantTimeEq::ct_eq(token.as_bytes(), secret.as_bytes()).into() {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid cron secret")))
    }
}
