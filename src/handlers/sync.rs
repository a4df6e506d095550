//! # Sync Handlers
//!
//! Manual sync triggering and job history for a tenant.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, validation_error};
use crate::handlers::{TenantHeader, TenantId};
use crate::repositories::SyncJobRepository;
use crate::server::AppState;
use crate::sync_engine::{SyncAllReport, SyncEngine, SyncOptions, SyncOutcome};
use crate::types::SyncType;

/// Query parameters for sync job history
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryQuery {
    /// Restrict history to one connection
    pub connection_id: Option<Uuid>,
    /// Maximum number of jobs to return (default: 50, max: 200)
    pub limit: Option<u64>,
}

/// Sync job information for API responses
#[derive(Debug, Serialize, ToSchema)]
pub struct JobInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub connection_id: Uuid,
    pub provider: String,
    pub sync_type: String,
    /// Job state (running|completed|failed)
    pub status: String,
    pub records_synced: i32,
    pub error_message: Option<String>,
    /// RFC3339 start timestamp
    pub started_at: String,
    /// RFC3339 finish timestamp, absent while running
    pub finished_at: Option<String>,
}

impl From<crate::models::sync_job::Model> for JobInfo {
    fn from(model: crate::models::sync_job::Model) -> Self {
        Self {
            id: model.id,
            connection_id: model.connection_id,
            provider: model.provider_slug,
            sync_type: model.sync_type,
            status: model.status,
            records_synced: model.records_synced,
            error_message: model.error_message,
            started_at: model.started_at.to_rfc3339(),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Response wrapper for sync job history
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncHistoryResponse {
    pub jobs: Vec<JobInfo>,
}

/// Lists recent sync jobs for the tenant, newest first
#[utoipa::path(
    get,
    path = "/sync",
    params(TenantHeader, SyncHistoryQuery),
    responses(
        (status = 200, description = "Sync job history", body = SyncHistoryResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_history(
    State(state): State<AppState>,
    TenantId(tenant): TenantId,
    Query(query): Query<SyncHistoryQuery>,
) -> Result<Json<SyncHistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(50);
    if !(1..=200).contains(&limit) {
        return Err(validation_error(
            "limit must be between 1 and 200",
            serde_json::json!({ "limit": "out of range" }),
        ));
    }

    let jobs = SyncJobRepository::new(Arc::new(state.db.clone()));
    let mut rows = jobs.list_for_tenant(tenant, limit).await?;
    if let Some(connection_id) = query.connection_id {
        rows.retain(|job| job.connection_id == connection_id);
    }

    Ok(Json(SyncHistoryResponse {
        jobs: rows.into_iter().map(JobInfo::from).collect(),
    }))
}

/// Manual sync trigger request
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSyncRequest {
    pub connection_id: Uuid,
    /// Data type to sync, or "all" for every entitled type
    pub sync_type: String,
    #[serde(default)]
    pub options: SyncOptions,
}

/// Response for POST /sync, shaped by the requested sync type
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum TriggerSyncResponse {
    All(SyncAllReport),
    One(SyncOutcome),
}

/// Triggers a sync for one data type or all entitled types
#[utoipa::path(
    post,
    path = "/sync",
    params(TenantHeader),
    request_body = TriggerSyncRequest,
    responses(
        (status = 200, description = "Sync outcome", body = TriggerSyncResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 403, description = "Plan tier does not cover this data type", body = ApiError),
        (status = 409, description = "Connection is not active", body = ApiError),
        (status = 429, description = "A sync of this type is already running", body = ApiError),
        (status = 502, description = "Provider error", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    TenantId(tenant): TenantId,
    Json(request): Json<TriggerSyncRequest>,
) -> Result<Json<TriggerSyncResponse>, ApiError> {
    let engine = SyncEngine::new(
        Arc::new(state.db.clone()),
        state.registry.clone(),
        state.crypto_key.clone(),
        state.config.sync.guard_minutes as i64,
        state.config.sync.hos_dedup_hours as i64,
    );

    if request.sync_type == "all" {
        let report = engine
            .sync_all(tenant, request.connection_id, &request.options)
            .await?;
        return Ok(Json(TriggerSyncResponse::All(report)));
    }

    let sync_type = SyncType::parse(&request.sync_type).ok_or_else(|| {
        validation_error(
            "Unknown sync type",
            serde_json::json!({ "syncType": "must be one of the sync data types or \"all\"" }),
        )
    })?;
    let outcome = engine
        .sync(tenant, request.connection_id, sync_type, &request.options)
        .await?;
    Ok(Json(TriggerSyncResponse::One(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{ClaimOutcome, ConnectionRepository, TenantRepository};
    use crate::server::test_support::test_state;
    use crate::types::ConnectionStatus;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/sync", get(sync_history).post(trigger_sync))
            .with_state(state)
    }

    async fn seed_active_connection(
        state: &AppState,
        tenant: Uuid,
        plan_tier: &str,
    ) -> crate::models::connection::Model {
        let db = Arc::new(state.db.clone());
        TenantRepository::new(db.clone())
            .create(tenant, Some("Acme Freight".to_string()), Some(plan_tier.to_string()))
            .await
            .unwrap();
        let connections = ConnectionRepository::new(db, state.crypto_key.clone());
        let connection = connections.create(tenant, "samsara").await.unwrap();
        connections
            .set_status(connection, ConnectionStatus::Active)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_history_limit_validation() {
        let state = test_state().await;
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/sync?limit=0")
                    .header("X-Tenant-Id", Uuid::new_v4().to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_sync_type_rejected() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let connection = seed_active_connection(&state, tenant, "enterprise").await;

        let body = serde_json::json!({
            "connectionId": connection.id,
            "syncType": "odometer",
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_entitled_returns_403() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let connection = seed_active_connection(&state, tenant, "starter").await;

        let body = serde_json::json!({
            "connectionId": connection.id,
            "syncType": "hos_logs",
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["code"], "NOT_ENTITLED");
    }

    #[tokio::test]
    async fn test_duplicate_trigger_returns_429_with_job_id() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let connection = seed_active_connection(&state, tenant, "enterprise").await;

        // Occupy the slot the way a concurrent sync would.
        let jobs = SyncJobRepository::new(Arc::new(state.db.clone()));
        let ClaimOutcome::Started(job) = jobs
            .claim(&connection, SyncType::Vehicles, chrono::Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("first claim must start");
        };

        let body = serde_json::json!({
            "connectionId": connection.id,
            "syncType": "vehicles",
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("retry-after").is_some());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["code"], "SYNC_IN_PROGRESS");
        assert_eq!(parsed["details"]["job_id"], serde_json::json!(job.id));
    }

    #[tokio::test]
    async fn test_pending_connection_returns_409() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let db = Arc::new(state.db.clone());
        TenantRepository::new(db.clone())
            .create(tenant, Some("Acme Freight".to_string()), Some("enterprise".to_string()))
            .await
            .unwrap();
        let connection = ConnectionRepository::new(db, state.crypto_key.clone())
            .create(tenant, "samsara")
            .await
            .unwrap();

        let body = serde_json::json!({
            "connectionId": connection.id,
            "syncType": "vehicles",
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["code"], "CONNECTION_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn test_history_filters_by_connection() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let connection = seed_active_connection(&state, tenant, "enterprise").await;

        let jobs = SyncJobRepository::new(Arc::new(state.db.clone()));
        let ClaimOutcome::Started(job) = jobs
            .claim(&connection, SyncType::Drivers, chrono::Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("claim must start");
        };
        jobs.complete(job.id, 3).await.unwrap();

        let uri = format!("/sync?connectionId={}", connection.id);
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("X-Tenant-Id", tenant.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let rows = parsed["jobs"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["sync_type"], "drivers");
        assert_eq!(rows[0]["records_synced"], 3);
    }
}
