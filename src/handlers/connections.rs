//! # Connection Handlers
//!
//! Tenant-facing connection management: listing with optional mappings,
//! the OAuth initiation/callback pair, credential verification,
//! auto-matching, and soft/hard disconnects.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::connection_manager::{AuthorizationStart, ConnectionManager, VerifyOutcome};
use crate::error::{self, ApiError};
use crate::handlers::{TenantHeader, TenantId};
use crate::providers::ProviderMetadata;
use crate::reconcile::{MatchSummary, Reconciler};
use crate::repositories::{ConnectionRepository, EntityMappingRepository};
use crate::server::AppState;
use crate::types::EntityType;

/// Query parameters for connections listing
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListConnectionsQuery {
    /// Optional provider filter (snake_case slug, e.g., "samsara")
    pub provider: Option<String>,
    /// Include entity mappings for each connection
    #[serde(default)]
    pub include_mappings: bool,
}

/// Entity mapping information for API responses
#[derive(Debug, Serialize, ToSchema)]
pub struct MappingInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    /// Entity kind (vehicle|driver)
    pub entity_type: String,
    /// Provider-side identifier
    pub external_id: String,
    pub external_name: Option<String>,
    pub external_ref: Option<String>,
    /// Internal vehicle or driver id once matched
    #[schema(value_type = Option<String>)]
    pub internal_id: Option<Uuid>,
    /// How the match was made (auto|manual)
    pub match_source: Option<String>,
    pub orphaned: bool,
}

impl From<crate::models::entity_mapping::Model> for MappingInfo {
    fn from(model: crate::models::entity_mapping::Model) -> Self {
        Self {
            id: model.id,
            entity_type: model.entity_type,
            external_id: model.external_id,
            external_name: model.external_name,
            external_ref: model.external_ref,
            internal_id: model.internal_id,
            match_source: model.match_source,
            orphaned: model.orphaned,
        }
    }
}

/// Connection information for API responses
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    /// Provider slug (e.g., "samsara", "motive")
    pub provider: String,
    /// Lifecycle status (pending|active|error|disconnected)
    pub status: String,
    /// Provider-side account or organization identifier, once known
    pub external_id: Option<String>,
    /// RFC3339 timestamp of the last successful sync
    pub last_sync_at: Option<String>,
    /// Most recent failure description, if any
    pub last_error: Option<String>,
    /// Indicates whether an encrypted access token is stored
    pub has_access_token: bool,
    /// Indicates whether an encrypted refresh token is stored
    pub has_refresh_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Vec<MappingInfo>>,
}

impl From<crate::models::connection::Model> for ConnectionInfo {
    fn from(model: crate::models::connection::Model) -> Self {
        Self {
            id: model.id,
            provider: model.provider_slug,
            status: model.status,
            external_id: model.external_id,
            last_sync_at: model.last_sync_at.map(|dt| dt.to_rfc3339()),
            last_error: model.last_error,
            has_access_token: model.access_token_ciphertext.is_some(),
            has_refresh_token: model.refresh_token_ciphertext.is_some(),
            mappings: None,
        }
    }
}

/// Response wrapper for connections listing
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionInfo>,
}

/// Lists connections for the tenant with optional provider filtering
#[utoipa::path(
    get,
    path = "/connections",
    params(TenantHeader, ListConnectionsQuery),
    responses(
        (status = 200, description = "List of tenant connections", body = ConnectionsResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    TenantId(tenant): TenantId,
    Query(query): Query<ListConnectionsQuery>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    if let Some(ref slug) = query.provider
        && !state.registry.contains(slug)
    {
        return Err(error::unsupported_provider(slug));
    }

    let db = Arc::new(state.db.clone());
    let connections = ConnectionRepository::new(db.clone(), state.crypto_key.clone());
    let mappings = EntityMappingRepository::new(db);

    let mut rows = connections.list_for_tenant(tenant).await?;
    if let Some(ref slug) = query.provider {
        rows.retain(|row| &row.provider_slug == slug);
    }

    let mut infos = Vec::with_capacity(rows.len());
    for row in rows {
        let connection_id = row.id;
        let mut info = ConnectionInfo::from(row);
        if query.include_mappings {
            let mut rows = mappings
                .list_by_connection(connection_id, EntityType::Vehicle)
                .await?;
            rows.extend(
                mappings
                    .list_by_connection(connection_id, EntityType::Driver)
                    .await?,
            );
            info.mappings = Some(rows.into_iter().map(MappingInfo::from).collect());
        }
        infos.push(info);
    }

    Ok(Json(ConnectionsResponse { connections: infos }))
}

/// Action request for POST /connections
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ConnectionActionRequest {
    /// Probe stored credentials with a cheap provider call
    Verify { connection_id: Uuid },
    /// Auto-match unmatched vehicle and driver mappings
    AutoMatch { connection_id: Uuid },
    /// Start the OAuth handshake for a provider
    InitiateOauth {
        provider: String,
        #[serde(default)]
        reconnect: bool,
    },
    /// List registered providers
    ListProviders,
}

/// Auto-match pass counts per entity type
#[derive(Debug, Serialize, ToSchema)]
pub struct AutoMatchResponse {
    #[schema(value_type = String)]
    pub connection_id: Uuid,
    pub vehicles: MatchSummary,
    pub drivers: MatchSummary,
}

/// Registered providers listing
#[derive(Debug, Serialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderMetadata>,
}

/// Response for POST /connections, shaped by the requested action
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ConnectionActionResponse {
    Verify(VerifyOutcome),
    AutoMatch(AutoMatchResponse),
    InitiateOauth(AuthorizationStart),
    Providers(ProvidersResponse),
}

/// Dispatches a connection action
#[utoipa::path(
    post,
    path = "/connections",
    params(TenantHeader),
    request_body = ConnectionActionRequest,
    responses(
        (status = 200, description = "Action result", body = ConnectionActionResponse),
        (status = 400, description = "Validation error or unsupported provider", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 502, description = "Provider error", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connection_action(
    State(state): State<AppState>,
    TenantId(tenant): TenantId,
    Json(request): Json<ConnectionActionRequest>,
) -> Result<Json<ConnectionActionResponse>, ApiError> {
    let db = Arc::new(state.db.clone());
    let manager = ConnectionManager::new(
        ConnectionRepository::new(db.clone(), state.crypto_key.clone()),
        state.registry.clone(),
    );

    match request {
        ConnectionActionRequest::Verify { connection_id } => {
            let outcome = manager.verify_connection(tenant, connection_id).await?;
            Ok(Json(ConnectionActionResponse::Verify(outcome)))
        }
        ConnectionActionRequest::AutoMatch { connection_id } => {
            // Scope the connection to the caller before matching.
            ConnectionRepository::new(db.clone(), state.crypto_key.clone())
                .get_for_tenant(tenant, connection_id)
                .await?
                .ok_or_else(|| {
                    ApiError::new(
                        axum::http::StatusCode::NOT_FOUND,
                        "NOT_FOUND",
                        "Connection not found for this tenant",
                    )
                })?;

            let reconciler = Reconciler::new(db);
            let vehicles = reconciler.auto_match_vehicles(tenant, connection_id).await?;
            let drivers = reconciler.auto_match_drivers(tenant, connection_id).await?;
            Ok(Json(ConnectionActionResponse::AutoMatch(
                AutoMatchResponse {
                    connection_id,
                    vehicles,
                    drivers,
                },
            )))
        }
        ConnectionActionRequest::InitiateOauth {
            provider,
            reconnect,
        } => {
            let redirect_uri = callback_uri(&state.config.public_base_url);
            let start = manager
                .authorization_url(tenant, &provider, &redirect_uri, reconnect)
                .await?;
            Ok(Json(ConnectionActionResponse::InitiateOauth(start)))
        }
        ConnectionActionRequest::ListProviders => Ok(Json(ConnectionActionResponse::Providers(
            ProvidersResponse {
                providers: state.registry.list_metadata(),
            },
        ))),
    }
}

/// OAuth callback request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct OauthCallbackRequest {
    /// Opaque state token issued at initiation
    pub state: String,
    /// Authorization code from the vendor
    pub code: String,
}

/// Completes the OAuth handshake and activates the connection
#[utoipa::path(
    post,
    path = "/connections/callback",
    params(TenantHeader),
    request_body = OauthCallbackRequest,
    responses(
        (status = 200, description = "Connection activated", body = ConnectionInfo),
        (status = 400, description = "Invalid state token", body = ApiError),
        (status = 502, description = "Code exchange failed", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    TenantId(tenant): TenantId,
    Json(request): Json<OauthCallbackRequest>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let manager = ConnectionManager::new(
        ConnectionRepository::new(Arc::new(state.db.clone()), state.crypto_key.clone()),
        state.registry.clone(),
    );
    let redirect_uri = callback_uri(&state.config.public_base_url);
    let connection = manager
        .complete_authorization(tenant, &request.state, &request.code, &redirect_uri)
        .await?;
    Ok(Json(ConnectionInfo::from(connection)))
}

/// Delete request for DELETE /connections
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConnectionRequest {
    pub connection_id: Uuid,
    /// Hard delete the row and everything keyed to it
    #[serde(default)]
    pub permanent: bool,
}

/// Result of a disconnect or delete
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConnectionResponse {
    #[schema(value_type = String)]
    pub connection_id: Uuid,
    /// Resulting status ("disconnected"), absent after a hard delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub deleted: bool,
}

/// Soft-disconnects or hard-deletes a connection
#[utoipa::path(
    delete,
    path = "/connections",
    params(TenantHeader),
    request_body = DeleteConnectionRequest,
    responses(
        (status = 200, description = "Connection disconnected or deleted", body = DeleteConnectionResponse),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 409, description = "Illegal status transition", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    TenantId(tenant): TenantId,
    Json(request): Json<DeleteConnectionRequest>,
) -> Result<Json<DeleteConnectionResponse>, ApiError> {
    let manager = ConnectionManager::new(
        ConnectionRepository::new(Arc::new(state.db.clone()), state.crypto_key.clone()),
        state.registry.clone(),
    );

    if request.permanent {
        manager.delete(tenant, request.connection_id).await?;
        Ok(Json(DeleteConnectionResponse {
            connection_id: request.connection_id,
            status: None,
            deleted: true,
        }))
    } else {
        let disconnected = manager.disconnect(tenant, request.connection_id).await?;
        Ok(Json(DeleteConnectionResponse {
            connection_id: disconnected.id,
            status: Some(disconnected.status),
            deleted: false,
        }))
    }
}

fn callback_uri(public_base_url: &str) -> String {
    format!(
        "{}/connections/callback",
        public_base_url.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::TenantRepository;
    use crate::server::test_support::test_state;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new()
            .route(
                "/connections",
                get(list_connections)
                    .post(connection_action)
                    .delete(delete_connection),
            )
            .with_state(state)
    }

    async fn seed_connection(state: &AppState, tenant: Uuid) -> crate::models::connection::Model {
        let db = Arc::new(state.db.clone());
        TenantRepository::new(db.clone())
            .create(tenant, Some("Acme Freight".to_string()), Some("enterprise".to_string()))
            .await
            .unwrap();
        ConnectionRepository::new(db, state.crypto_key.clone())
            .create(tenant, "samsara")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_connections_empty() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/connections")
                    .header("X-Tenant-Id", tenant.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["connections"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_list_connections_unknown_provider_filter() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/connections?provider=geotab")
                    .header("X-Tenant-Id", tenant.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["code"], "UNSUPPORTED_PROVIDER");
    }

    #[tokio::test]
    async fn test_list_connections_with_mappings() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let connection = seed_connection(&state, tenant).await;

        let mappings = EntityMappingRepository::new(Arc::new(state.db.clone()));
        mappings
            .upsert_external(
                &connection,
                crate::types::EntityType::Vehicle,
                "veh-1",
                Some("Truck 12"),
                Some("1FTSW21P34ED12345"),
            )
            .await
            .unwrap();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/connections?includeMappings=true")
                    .header("X-Tenant-Id", tenant.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let connections = parsed["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0]["status"], "pending");
        let mapping_rows = connections[0]["mappings"].as_array().unwrap();
        assert_eq!(mapping_rows.len(), 1);
        assert_eq!(mapping_rows[0]["external_id"], "veh-1");
        assert_eq!(mapping_rows[0]["orphaned"], false);
    }

    #[tokio::test]
    async fn test_verify_unknown_connection_returns_404() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();

        let body = serde_json::json!({
            "action": "verify",
            "connectionId": Uuid::new_v4(),
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/connections")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_initiate_oauth_unknown_provider_returns_400() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();

        let body = serde_json::json!({
            "action": "initiate-oauth",
            "provider": "geotab",
        });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/connections")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["code"], "UNSUPPORTED_PROVIDER");
    }

    #[tokio::test]
    async fn test_list_providers_action() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();

        let body = serde_json::json!({ "action": "list-providers" });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/connections")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["providers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_disconnect_then_hard_delete() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let connection = seed_connection(&state, tenant).await;
        let router = app(state.clone());

        let body = serde_json::json!({ "connectionId": connection.id });
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/connections")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["status"], "disconnected");
        assert_eq!(parsed["deleted"], false);

        let body = serde_json::json!({ "connectionId": connection.id, "permanent": true });
        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/connections")
                    .header("X-Tenant-Id", tenant.to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let remaining = ConnectionRepository::new(Arc::new(state.db.clone()), state.crypto_key)
            .get_by_id(connection.id)
            .await
            .unwrap();
        assert!(remaining.is_none());
    }

    #[tokio::test]
    async fn test_delete_other_tenants_connection_returns_404() {
        let state = test_state().await;
        let tenant = Uuid::new_v4();
        let connection = seed_connection(&state, tenant).await;

        let body = serde_json::json!({ "connectionId": connection.id, "permanent": true });
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/connections")
                    .header("X-Tenant-Id", Uuid::new_v4().to_string())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
