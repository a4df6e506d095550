//! # API Handlers
//!
//! HTTP endpoint handlers for the Fleetsync API. Every tenant-scoped
//! endpoint extracts the tenant from the `X-Tenant-Id` header; the
//! scheduler and webhook endpoints authenticate their callers instead.

use axum::{
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, validation_error};
use crate::models::ServiceInfo;
use crate::server::AppState;

pub mod connections;
pub mod scheduler;
pub mod sync;
pub mod webhooks;

/// Tenant identity extracted from the `X-Tenant-Id` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantId(pub Uuid);

impl<S> FromRequestParts<S> for TenantId
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get("X-Tenant-Id")
            .ok_or_else(|| {
                validation_error(
                    "Missing required header",
                    serde_json::json!({ "X-Tenant-Id": "Required header is missing" }),
                )
            })?
            .to_str()
            .map_err(|_| {
                validation_error(
                    "Invalid tenant header",
                    serde_json::json!({ "X-Tenant-Id": "Header must be valid UTF-8" }),
                )
            })?;

        header_value.parse::<Uuid>().map(TenantId).map_err(|_| {
            validation_error(
                "Invalid tenant ID",
                serde_json::json!({ "X-Tenant-Id": "Must be a valid UUID" }),
            )
        })
    }
}

/// OpenAPI header parameter for X-Tenant-Id
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct TenantHeader {
    /// Tenant identifier (UUID) that scopes the request to a specific tenant
    #[serde(rename = "X-Tenant-Id")]
    #[param(rename = "X-Tenant-Id", value_type = String)]
    pub tenant_id: String,
}

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Readiness status
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
}

/// Readiness check probing database connectivity
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is ready", body = HealthStatus),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    db::health_check(&state.db).await.map_err(|e| {
        tracing::error!(error = %e, "Readiness check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database service unavailable",
        )
    })?;
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
