//! Connection lifecycle management.
//!
//! Owns the OAuth handshake, credential verification, and the connection
//! state machine. All status writes funnel through [`ConnectionManager`]
//! so illegal transitions are rejected in one place.

use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::error::{self, ApiError};
use crate::models::connection;
use crate::providers::{
    AuthorizeParams, EldProvider, ExchangeCodeParams, ProviderError, ProviderRegistry,
};
use crate::repositories::ConnectionRepository;
use crate::types::ConnectionStatus;

/// Legal connection state transitions. Self-transitions are always allowed
/// so retried operations stay idempotent.
pub fn can_transition(from: ConnectionStatus, to: ConnectionStatus) -> bool {
    use ConnectionStatus::*;
    match (from, to) {
        (a, b) if a == b => true,
        (Pending, Active) | (Pending, Error) | (Pending, Disconnected) => true,
        (Active, Error) | (Active, Disconnected) => true,
        (Error, Active) | (Error, Disconnected) => true,
        // Reconnecting restarts the lifecycle on the same row.
        (Disconnected, Pending) => true,
        _ => false,
    }
}

/// Result of starting an OAuth authorization.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct AuthorizationStart {
    pub connection_id: Uuid,
    /// Vendor authorization URL the user is redirected to
    pub authorize_url: String,
    /// Opaque state token to be round-tripped through the callback
    pub state: String,
}

/// Result of a credential verification probe.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct VerifyOutcome {
    pub connection_id: Uuid,
    pub valid: bool,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Coordinates connection rows, the provider registry, and token storage.
#[derive(Clone)]
pub struct ConnectionManager {
    connections: ConnectionRepository,
    registry: Arc<ProviderRegistry>,
}

impl ConnectionManager {
    pub fn new(connections: ConnectionRepository, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            connections,
            registry,
        }
    }

    fn provider(&self, slug: &str) -> Result<Arc<dyn EldProvider>, ApiError> {
        self.registry
            .get(slug)
            .map_err(|_| error::unsupported_provider(slug))
    }

    /// Build the vendor OAuth URL, creating or reusing the connection row
    /// the callback will complete.
    ///
    /// At most one non-disconnected connection exists per (tenant,
    /// provider); initiating again reuses it. With `reconnect` the most
    /// recent disconnected row is revived so its mappings survive.
    #[instrument(skip(self))]
    pub async fn authorization_url(
        &self,
        tenant_id: Uuid,
        provider_slug: &str,
        redirect_uri: &str,
        reconnect: bool,
    ) -> Result<AuthorizationStart, ApiError> {
        let provider = self.provider(provider_slug)?;

        let connection = match self.connections.find_live(tenant_id, provider_slug).await? {
            Some(existing) => existing,
            None => {
                let revived = if reconnect {
                    self.most_recent_disconnected(tenant_id, provider_slug).await?
                } else {
                    None
                };
                match revived {
                    Some(row) => self.transition(row, ConnectionStatus::Pending).await?,
                    None => self.connections.create(tenant_id, provider_slug).await?,
                }
            }
        };

        let state = oauth_state(connection.id);
        let url = provider
            .authorize_url(AuthorizeParams {
                tenant_id,
                redirect_uri: redirect_uri.to_string(),
                state: state.clone(),
            })
            .map_err(|e| provider_api_error(provider_slug, e))?;

        Ok(AuthorizationStart {
            connection_id: connection.id,
            authorize_url: url.to_string(),
            state,
        })
    }

    /// Complete the OAuth handshake: exchange the code, store encrypted
    /// tokens, and activate the connection.
    #[instrument(skip(self, code))]
    pub async fn complete_authorization(
        &self,
        tenant_id: Uuid,
        state: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<connection::Model, ApiError> {
        let connection_id = parse_oauth_state(state)
            .ok_or_else(|| error::validation_error("Invalid OAuth state token", serde_json::json!({"state": "unrecognized format"})))?;
        let connection = self.load(tenant_id, connection_id).await?;
        let provider = self.provider(&connection.provider_slug)?;

        let grant = provider
            .exchange_code(ExchangeCodeParams {
                code: code.to_string(),
                redirect_uri: redirect_uri.to_string(),
            })
            .await
            .map_err(|e| provider_api_error(&connection.provider_slug, e))?;

        let stored = self
            .connections
            .store_tokens(
                connection,
                Some(&grant.access_token),
                grant.refresh_token.as_deref(),
                grant.external_id.as_deref(),
            )
            .await?;
        let active = self.transition(stored, ConnectionStatus::Active).await?;
        info!(connection_id = %active.id, provider = %active.provider_slug, "Connection authorized");
        Ok(active)
    }

    /// Probe stored credentials with a cheap read-only call. A success
    /// promotes an errored connection back to active; a failure demotes
    /// to error with the failure recorded.
    #[instrument(skip(self))]
    pub async fn verify_connection(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<VerifyOutcome, ApiError> {
        let connection = self.load(tenant_id, connection_id).await?;
        let status = parse_status(&connection)?;
        if status == ConnectionStatus::Disconnected || status == ConnectionStatus::Pending {
            return Err(error::connection_not_active(status.as_str()));
        }
        let provider = self.provider(&connection.provider_slug)?;

        let (access_token, _) = self.connections.decrypt_tokens(&connection)?;
        let Some(access_token) = access_token else {
            self.connections
                .mark_error(connection.id, "No stored access token")
                .await?;
            return Ok(VerifyOutcome {
                connection_id,
                valid: false,
                status: ConnectionStatus::Error,
                error: Some("No stored access token".to_string()),
            });
        };

        let probe = match provider.fetch_vehicles(&access_token).await {
            Ok(records) => Ok(records),
            Err(ProviderError::AuthExpired { .. }) => {
                // One refresh attempt before giving up on the credentials.
                match self.refresh_tokens(connection.clone()).await {
                    Ok((refreshed, new_access)) => {
                        let result = provider.fetch_vehicles(&new_access).await;
                        return self.finish_verify(refreshed, result).await;
                    }
                    Err(refresh_error) => Err(ProviderError::AuthExpired {
                        details: refresh_error.message.to_string(),
                    }),
                }
            }
            Err(other) => Err(other),
        };
        self.finish_verify(connection, probe).await
    }

    async fn finish_verify(
        &self,
        connection: connection::Model,
        probe: Result<Vec<crate::providers::VehicleRecord>, ProviderError>,
    ) -> Result<VerifyOutcome, ApiError> {
        let connection_id = connection.id;
        match probe {
            Ok(_) => {
                self.transition(connection, ConnectionStatus::Active).await?;
                Ok(VerifyOutcome {
                    connection_id,
                    valid: true,
                    status: ConnectionStatus::Active,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                warn!(%connection_id, error = %message, "Credential verification failed");
                self.connections.mark_error(connection_id, &message).await?;
                Ok(VerifyOutcome {
                    connection_id,
                    valid: false,
                    status: ConnectionStatus::Error,
                    error: Some(message),
                })
            }
        }
    }

    /// Refresh token material once. Returns the updated row and the new
    /// access token.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn refresh_tokens(
        &self,
        connection: connection::Model,
    ) -> Result<(connection::Model, String), ApiError> {
        let provider = self.provider(&connection.provider_slug)?;
        let (_, refresh_token) = self.connections.decrypt_tokens(&connection)?;
        let refresh_token = refresh_token.ok_or_else(|| {
            provider_api_error(
                &connection.provider_slug,
                ProviderError::AuthExpired {
                    details: "No refresh token stored".to_string(),
                },
            )
        })?;

        let grant = provider
            .refresh_token(&refresh_token)
            .await
            .map_err(|e| provider_api_error(&connection.provider_slug, e))?;
        let access_token = grant.access_token.clone();
        let stored = self
            .connections
            .store_tokens(
                connection,
                Some(&grant.access_token),
                grant.refresh_token.as_deref(),
                grant.external_id.as_deref(),
            )
            .await?;
        Ok((stored, access_token))
    }

    /// Soft disconnect: credentials are purged, synced data and mappings
    /// are retained.
    #[instrument(skip(self))]
    pub async fn disconnect(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<connection::Model, ApiError> {
        let connection = self.load(tenant_id, connection_id).await?;
        let cleared = self.connections.clear_tokens(connection).await?;
        let disconnected = self
            .transition(cleared, ConnectionStatus::Disconnected)
            .await?;
        info!(%connection_id, "Connection disconnected");
        Ok(disconnected)
    }

    /// Hard delete: the row and everything keyed to it is purged.
    #[instrument(skip(self))]
    pub async fn delete(&self, tenant_id: Uuid, connection_id: Uuid) -> Result<(), ApiError> {
        // Ensure the row belongs to the caller before deleting.
        self.load(tenant_id, connection_id).await?;
        self.connections.delete(connection_id).await?;
        info!(%connection_id, "Connection deleted");
        Ok(())
    }

    pub async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<connection::Model>, ApiError> {
        Ok(self.connections.list_for_tenant(tenant_id).await?)
    }

    async fn load(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<connection::Model, ApiError> {
        self.connections
            .get_for_tenant(tenant_id, connection_id)
            .await?
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "Connection not found for this tenant",
                )
            })
    }

    async fn transition(
        &self,
        connection: connection::Model,
        to: ConnectionStatus,
    ) -> Result<connection::Model, ApiError> {
        let from = parse_status(&connection)?;
        if !can_transition(from, to) {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "INVALID_TRANSITION".to_string(),
                format!("Cannot transition connection from {} to {}", from, to),
            ));
        }
        Ok(self.connections.set_status(connection, to).await?)
    }

    async fn most_recent_disconnected(
        &self,
        tenant_id: Uuid,
        provider_slug: &str,
    ) -> Result<Option<connection::Model>, ApiError> {
        let mut rows: Vec<connection::Model> = self
            .connections
            .list_for_tenant(tenant_id)
            .await?
            .into_iter()
            .filter(|c| {
                c.provider_slug == provider_slug
                    && c.status == ConnectionStatus::Disconnected.as_str()
            })
            .collect();
        rows.sort_by_key(|c| c.created_at);
        Ok(rows.pop())
    }
}

fn parse_status(connection: &connection::Model) -> Result<ConnectionStatus, ApiError> {
    ConnectionStatus::parse(&connection.status).ok_or_else(|| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR".to_string(),
            format!("Connection has unknown status '{}'", connection.status),
        )
    })
}

/// Map an upstream provider failure onto the API error surface. All
/// upstream failures surface as 502 with the synthesized upstream status
/// recorded in the details.
pub fn provider_api_error(provider_slug: &str, e: ProviderError) -> ApiError {
    let upstream_status = match &e {
        ProviderError::AuthExpired { .. } => 401,
        ProviderError::RateLimited { .. } => 429,
        ProviderError::NotFound { .. } => 404,
        ProviderError::Transient { .. } => 503,
        ProviderError::Unknown { .. } => 500,
    };
    error::provider_error(provider_slug.to_string(), upstream_status, Some(e.to_string()))
}

/// OAuth state token: connection id plus a random nonce.
fn oauth_state(connection_id: Uuid) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{}.{}", connection_id, nonce)
}

fn parse_oauth_state(state: &str) -> Option<Uuid> {
    let (id, _nonce) = state.split_once('.')?;
    Uuid::parse_str(id).ok()
}
