//! # Webhook Handler
//!
//! Single ingestion endpoint for provider webhook callbacks. The sending
//! provider is identified by whichever configured secret verifies the
//! body's HMAC signature; events are acknowledged with `{received: true}`
//! even when the event type is unknown or routing partially fails.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::error::{self, ApiError, validation_error};
use crate::server::AppState;
use crate::webhooks::{WebhookEnvelope, WebhookEvent, WebhookRouter, verify_signature};

/// Webhook acknowledgment response
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

/// Receives a provider webhook event
#[utoipa::path(
    post,
    path = "/webhooks/eld",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 401, description = "Signature verification failed", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|_| {
        validation_error(
            "Invalid webhook payload",
            serde_json::json!({ "body": "must be a JSON object" }),
        )
    })?;

    let provider_slug = identify_sender(&state, &headers, &body, &payload)?;

    let envelope: WebhookEnvelope = serde_json::from_value(payload).map_err(|_| {
        validation_error(
            "Invalid webhook envelope",
            serde_json::json!({ "type": "required event type field is missing" }),
        )
    })?;

    let event = match WebhookEvent::parse(&envelope) {
        None => {
            // Unknown event types are acknowledged so vendors do not retry.
            info!(
                provider = %provider_slug,
                event_type = %envelope.event_type,
                "Ignoring unknown webhook event type"
            );
            return Ok(Json(WebhookAck { received: true }));
        }
        Some(Err(e)) => {
            warn!(provider = %provider_slug, event_type = %envelope.event_type, error = %e, "Malformed webhook event data");
            return Err(validation_error(
                "Malformed webhook event data",
                serde_json::json!({ "data": e.to_string() }),
            ));
        }
        Some(Ok(event)) => event,
    };

    let router = WebhookRouter::new(
        Arc::new(state.db.clone()),
        state.registry.clone(),
        state.crypto_key.clone(),
        state.config.sync.guard_minutes as i64,
        state.config.sync.hos_dedup_hours as i64,
    );
    if let Err(e) = router.handle(&provider_slug, event).await {
        // Routing failures are ours, not the vendor's; acknowledge anyway.
        error!(provider = %provider_slug, error = %e, "Webhook routing failed");
    }

    Ok(Json(WebhookAck { received: true }))
}

/// Determine which provider sent this webhook by verifying its signature
/// against each configured secret.
fn identify_sender(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    payload: &serde_json::Value,
) -> Result<String, ApiError> {
    let secrets = configured_secrets(state);
    let signature = headers
        .get("x-terminal-signature")
        .or_else(|| headers.get("x-webhook-signature"))
        .and_then(|value| value.to_str().ok());

    match signature {
        Some(signature) => secrets
            .iter()
            .find(|(_, secret)| verify_signature(secret, body, signature))
            .map(|(slug, _)| slug.to_string())
            .ok_or_else(|| error::invalid_signature(None)),
        None => {
            // Unsigned webhooks are tolerated only in development with no
            // secrets configured; the sender names itself in the payload.
            if state.config.is_dev_profile() && secrets.is_empty() {
                payload
                    .get("provider")
                    .and_then(|value| value.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        validation_error(
                            "Unsigned webhook must name its provider",
                            serde_json::json!({ "provider": "required when no signature is present" }),
                        )
                    })
            } else {
                Err(error::invalid_signature(Some(
                    "Missing webhook signature header",
                )))
            }
        }
    }
}

fn configured_secrets(state: &AppState) -> Vec<(&'static str, String)> {
    let mut secrets = Vec::new();
    if let Some(secret) = state.config.webhook_samsara_secret.clone() {
        secrets.push(("samsara", secret));
    }
    if let Some(secret) = state.config.webhook_motive_secret.clone() {
        secrets.push(("motive", secret));
    }
    secrets
}
