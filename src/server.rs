//! # Server Configuration
//!
//! Axum application wiring for the Fleetsync API.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::providers::ProviderRegistry;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub crypto_key: CryptoKey,
    pub registry: Arc<ProviderRegistry>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/connections",
            get(handlers::connections::list_connections)
                .post(handlers::connections::connection_action)
                .delete(handlers::connections::delete_connection),
        )
        .route(
            "/connections/callback",
            post(handlers::connections::oauth_callback),
        )
        .route(
            "/sync",
            get(handlers::sync::sync_history).post(handlers::sync::trigger_sync),
        )
        .route(
            "/sync/scheduled",
            get(handlers::scheduler::run_scheduled).post(handlers::scheduler::run_scheduled),
        )
        .route("/webhooks/eld", post(handlers::webhooks::receive_webhook))
        .layer(middleware::from_fn(trace_scope_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Runs each request inside a task-local trace scope and echoes the id back
/// so error bodies and logs correlate with the response.
async fn trace_scope_middleware(request: Request, next: Next) -> Response {
    let trace = telemetry::RequestTrace::generate();
    let trace_id = trace.trace_id.clone();

    let mut response = telemetry::scoped(trace, next.run(request)).await;
    if let Ok(value) = trace_id.parse() {
        response.headers_mut().insert("x-trace-id", value);
    }
    response
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let crypto_key = CryptoKey::new(
        config
            .crypto_key
            .clone()
            .ok_or("FLEETSYNC_CRYPTO_KEY is required")?,
    )?;
    let registry = Arc::new(ProviderRegistry::from_config(&config));

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let profile = config.profile.clone();

    let state = AppState {
        db,
        config: Arc::new(config),
        crypto_key,
        registry,
    };
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Fleetsync API listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::connection_action,
        crate::handlers::connections::delete_connection,
        crate::handlers::connections::oauth_callback,
        crate::handlers::sync::sync_history,
        crate::handlers::sync::trigger_sync,
        crate::handlers::scheduler::run_scheduled,
        crate::handlers::webhooks::receive_webhook,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::error::UpstreamError,
            crate::types::SyncType,
            crate::types::ConnectionStatus,
            crate::types::JobStatus,
            crate::connection_manager::AuthorizationStart,
            crate::connection_manager::VerifyOutcome,
            crate::reconcile::MatchSummary,
            crate::sync_engine::SyncOptions,
            crate::sync_engine::SyncOutcome,
            crate::sync_engine::SyncAllReport,
            crate::sync_engine::OutcomeStatus,
            crate::scheduler::TickStats,
            crate::scheduler::ConnectionSyncResult,
            crate::providers::ProviderMetadata,
            crate::handlers::HealthStatus,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::connections::MappingInfo,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::connections::ConnectionActionRequest,
            crate::handlers::connections::ConnectionActionResponse,
            crate::handlers::connections::AutoMatchResponse,
            crate::handlers::connections::ProvidersResponse,
            crate::handlers::connections::OauthCallbackRequest,
            crate::handlers::connections::DeleteConnectionRequest,
            crate::handlers::connections::DeleteConnectionResponse,
            crate::handlers::sync::JobInfo,
            crate::handlers::sync::SyncHistoryResponse,
            crate::handlers::sync::TriggerSyncRequest,
            crate::handlers::sync::TriggerSyncResponse,
            crate::handlers::webhooks::WebhookAck,
        )
    ),
    info(
        title = "Fleetsync API",
        description = "ELD provider integration and synchronization engine",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
