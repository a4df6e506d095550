//! Webhook verification and event routing.
//!
//! Vendors push events to one endpoint with an HMAC-SHA256 signature over
//! the raw body. The event envelope is `{type, data}`; recognized types
//! parse into the closed [`WebhookEvent`] enum and are matched
//! exhaustively, unknown types are logged and acknowledged so vendors do
//! not retry events we intentionally ignore.

use hmac::{Hmac, Mac};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use crate::connection_manager::can_transition;
use crate::crypto::CryptoKey;
use crate::models::connection;
use crate::notify::Notifier;
use crate::providers::ProviderRegistry;
use crate::repositories::{ConnectionRepository, SyncJobRepository, TenantRepository};
use crate::sync_engine::{SyncEngine, SyncOptions};
use crate::types::{ConnectionStatus, NotificationKind, SyncType};

type HmacSha256 = Hmac<Sha256>;

/// Verify an HMAC-SHA256 hex signature over the raw body.
///
/// A `sha256=` prefix on the header value is tolerated. Comparison is
/// constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let presented = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(presented) = hex::decode(presented) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.ct_eq(presented.as_slice()).into()
}

/// Raw event envelope as vendors send it.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload for sync status events.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncStatusData {
    /// Provider-side account identifier routing the event to connections
    pub external_id: String,
    pub sync_type: Option<String>,
    pub external_job_id: Option<String>,
    pub records: Option<i64>,
    pub message: Option<String>,
}

/// Payload for connection status events.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionStatusData {
    pub external_id: String,
    pub status: String,
}

/// Payload referencing a provider account with no further detail.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRefData {
    pub external_id: String,
}

/// Payload for vendor safety events.
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyEventData {
    pub external_id: String,
    pub event_id: String,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub external_vehicle_id: Option<String>,
}

/// Closed set of vendor events this service handles.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    SyncCompleted(SyncStatusData),
    SyncFailed(SyncStatusData),
    ConnectionStatusChanged(ConnectionStatusData),
    ConnectionDisconnected(AccountRefData),
    VehiclesUpdated(AccountRefData),
    DriversUpdated(AccountRefData),
    HosLogsUpdated(AccountRefData),
    LocationsUpdated(AccountRefData),
    SafetyEvent(SafetyEventData),
}

impl WebhookEvent {
    /// Parse a recognized envelope. `None` means an intentionally ignored
    /// event type; `Some(Err(..))` means a recognized type with a bad
    /// payload.
    pub fn parse(envelope: &WebhookEnvelope) -> Option<Result<Self, serde_json::Error>> {
        let data = envelope.data.clone();
        let parsed = match envelope.event_type.as_str() {
            "sync.completed" => serde_json::from_value(data).map(WebhookEvent::SyncCompleted),
            "sync.failed" => serde_json::from_value(data).map(WebhookEvent::SyncFailed),
            "connection.status_changed" => {
                serde_json::from_value(data).map(WebhookEvent::ConnectionStatusChanged)
            }
            "connection.disconnected" => {
                serde_json::from_value(data).map(WebhookEvent::ConnectionDisconnected)
            }
            "vehicles.updated" => serde_json::from_value(data).map(WebhookEvent::VehiclesUpdated),
            "drivers.updated" => serde_json::from_value(data).map(WebhookEvent::DriversUpdated),
            "hos_logs.updated" => serde_json::from_value(data).map(WebhookEvent::HosLogsUpdated),
            "locations.updated" => serde_json::from_value(data).map(WebhookEvent::LocationsUpdated),
            "safety.event" => serde_json::from_value(data).map(WebhookEvent::SafetyEvent),
            _ => return None,
        };
        Some(parsed)
    }
}

/// Map vendor connection-status vocabulary onto the internal state machine.
pub fn map_vendor_status(vendor_status: &str) -> Option<ConnectionStatus> {
    match vendor_status {
        "connected" | "active" | "ok" => Some(ConnectionStatus::Active),
        "error" | "invalid_credentials" | "expired" => Some(ConnectionStatus::Error),
        "disconnected" | "revoked" => Some(ConnectionStatus::Disconnected),
        _ => None,
    }
}

/// Applies webhook events to connections, jobs, and notifications.
#[derive(Clone)]
pub struct WebhookRouter {
    connections: ConnectionRepository,
    jobs: SyncJobRepository,
    tenants: TenantRepository,
    notifier: Notifier,
    engine: SyncEngine,
}

impl WebhookRouter {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: Arc<ProviderRegistry>,
        crypto_key: CryptoKey,
        guard_minutes: i64,
        hos_dedup_hours: i64,
    ) -> Self {
        Self {
            connections: ConnectionRepository::new(db.clone(), crypto_key.clone()),
            jobs: SyncJobRepository::new(db.clone()),
            tenants: TenantRepository::new(db.clone()),
            notifier: Notifier::new(db.clone(), hos_dedup_hours),
            engine: SyncEngine::new(db, registry, crypto_key, guard_minutes, hos_dedup_hours),
        }
    }

    /// Handle one verified event. Per-connection failures are logged, not
    /// surfaced; the vendor gets an acknowledgment either way.
    #[instrument(skip(self, event), fields(provider = provider_slug))]
    pub async fn handle(&self, provider_slug: &str, event: WebhookEvent) -> anyhow::Result<()> {
        match event {
            WebhookEvent::SyncCompleted(data) => {
                for connection in self.route(provider_slug, &data.external_id).await? {
                    self.settle_jobs(&connection, &data, true).await?;
                    self.connections.mark_sync_success(connection.id).await?;
                    self.notifier
                        .lifecycle(
                            connection.tenant_id,
                            NotificationKind::SyncCompleted,
                            &format!("connection:{}", connection.id),
                            "Provider sync completed",
                            data.sync_type.as_deref(),
                        )
                        .await?;
                }
            }
            WebhookEvent::SyncFailed(data) => {
                for connection in self.route(provider_slug, &data.external_id).await? {
                    self.settle_jobs(&connection, &data, false).await?;
                    let message = data.message.as_deref().unwrap_or("Provider reported sync failure");
                    self.connections.mark_error(connection.id, message).await?;
                    self.notifier
                        .lifecycle(
                            connection.tenant_id,
                            NotificationKind::SyncFailed,
                            &format!("connection:{}", connection.id),
                            "Provider sync failed",
                            Some(message),
                        )
                        .await?;
                }
            }
            WebhookEvent::ConnectionStatusChanged(data) => {
                let Some(target) = map_vendor_status(&data.status) else {
                    warn!(vendor_status = %data.status, "Unmapped vendor connection status");
                    return Ok(());
                };
                for connection in self.route(provider_slug, &data.external_id).await? {
                    let Some(current) = ConnectionStatus::parse(&connection.status) else {
                        continue;
                    };
                    if can_transition(current, target) {
                        self.connections.set_status(connection, target).await?;
                    } else {
                        warn!(
                            connection_id = %connection.id,
                            from = %current,
                            to = %target,
                            "Ignoring illegal status transition from webhook"
                        );
                    }
                }
            }
            WebhookEvent::ConnectionDisconnected(data) => {
                for connection in self.route(provider_slug, &data.external_id).await? {
                    let tenant_id = connection.tenant_id;
                    let connection_id = connection.id;
                    let cleared = self.connections.clear_tokens(connection).await?;
                    self.connections
                        .set_status(cleared, ConnectionStatus::Disconnected)
                        .await?;
                    self.notifier
                        .lifecycle(
                            tenant_id,
                            NotificationKind::ConnectionDisconnected,
                            &format!("connection:{}", connection_id),
                            "ELD connection disconnected",
                            Some("The provider revoked or closed this connection"),
                        )
                        .await?;
                    info!(%connection_id, "Connection disconnected by provider webhook");
                }
            }
            WebhookEvent::VehiclesUpdated(data) => {
                self.trigger_sync(provider_slug, &data.external_id, SyncType::Vehicles)
                    .await?;
            }
            WebhookEvent::DriversUpdated(data) => {
                self.trigger_sync(provider_slug, &data.external_id, SyncType::Drivers)
                    .await?;
            }
            WebhookEvent::HosLogsUpdated(data) => {
                self.trigger_sync(provider_slug, &data.external_id, SyncType::HosLogs)
                    .await?;
            }
            WebhookEvent::LocationsUpdated(data) => {
                self.trigger_sync(provider_slug, &data.external_id, SyncType::VehicleLocations)
                    .await?;
            }
            WebhookEvent::SafetyEvent(data) => {
                if !matches!(data.severity.as_deref(), Some("critical") | Some("high")) {
                    return Ok(());
                }
                for connection in self.route(provider_slug, &data.external_id).await? {
                    self.notifier
                        .lifecycle(
                            connection.tenant_id,
                            NotificationKind::VehicleFaultCode,
                            &format!("safety:{}", data.event_id),
                            "Safety event reported",
                            data.description.as_deref(),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn route(
        &self,
        provider_slug: &str,
        external_id: &str,
    ) -> anyhow::Result<Vec<connection::Model>> {
        let connections = self
            .connections
            .find_by_external_id(provider_slug, external_id)
            .await?;
        if connections.is_empty() {
            warn!(provider = provider_slug, external_id, "Webhook event for unknown account");
        }
        Ok(connections)
    }

    /// Complete or fail this connection's running jobs named by the event.
    async fn settle_jobs(
        &self,
        connection: &connection::Model,
        data: &SyncStatusData,
        success: bool,
    ) -> anyhow::Result<()> {
        let running = self
            .jobs
            .running_for_connection(connection.id, data.sync_type.as_deref())
            .await?;
        for job in running {
            if success {
                self.jobs
                    .complete(job.id, data.records.unwrap_or(0) as i32)
                    .await?;
            } else {
                self.jobs
                    .fail(
                        job.id,
                        data.message.as_deref().unwrap_or("Provider reported failure"),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Narrow sync trigger for "data changed" events. Entitlement and the
    /// running-job guard apply exactly as for manual syncs; rejections are
    /// logged and swallowed.
    async fn trigger_sync(
        &self,
        provider_slug: &str,
        external_id: &str,
        sync_type: SyncType,
    ) -> anyhow::Result<()> {
        for connection in self.route(provider_slug, external_id).await? {
            // Re-resolve the tier so downgraded or lapsed tenants are skipped.
            let tier = match self.tenants.tier_for(connection.tenant_id).await {
                Ok(Some(tier)) => tier,
                Ok(None) => continue,
                Err(e) => {
                    warn!(connection_id = %connection.id, error = %e, "Tenant lookup failed for webhook sync");
                    continue;
                }
            };
            if !tier.allows(sync_type) {
                continue;
            }
            match self
                .engine
                .sync(
                    connection.tenant_id,
                    connection.id,
                    sync_type,
                    &SyncOptions::default(),
                )
                .await
            {
                Ok(outcome) => {
                    info!(
                        connection_id = %connection.id,
                        sync_type = %sync_type,
                        records = outcome.records_synced,
                        "Webhook-triggered sync finished"
                    );
                }
                Err(e) => {
                    warn!(
                        connection_id = %connection.id,
                        sync_type = %sync_type,
                        code = %e.code,
                        "Webhook-triggered sync rejected"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::setup_db;
    use crate::repositories::{ClaimOutcome, NotificationRepository};
    use chrono::Duration;
    use uuid::Uuid;

    #[test]
    fn test_signature_verification_roundtrip() {
        let secret = "shared-secret";
        let body = br#"{"type":"sync.completed","data":{}}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &signature));
        assert!(verify_signature(secret, body, &format!("sha256={}", signature)));
        assert!(!verify_signature(secret, body, "deadbeef"));
        assert!(!verify_signature(secret, body, "not-hex!"));
        assert!(!verify_signature("other-secret", body, &signature));
        assert!(!verify_signature(secret, b"tampered body", &signature));
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope: WebhookEnvelope = serde_json::from_str(
            r#"{"type":"connection.disconnected","data":{"external_id":"org-1"}}"#,
        )
        .unwrap();
        let event = WebhookEvent::parse(&envelope).unwrap().unwrap();
        assert!(matches!(
            event,
            WebhookEvent::ConnectionDisconnected(AccountRefData { ref external_id }) if external_id == "org-1"
        ));

        // Unknown types are None, not errors.
        let unknown: WebhookEnvelope =
            serde_json::from_str(r#"{"type":"billing.invoice_created","data":{}}"#).unwrap();
        assert!(WebhookEvent::parse(&unknown).is_none());

        // Recognized type with a bad payload is a parse error.
        let malformed: WebhookEnvelope =
            serde_json::from_str(r#"{"type":"connection.status_changed","data":{}}"#).unwrap();
        assert!(WebhookEvent::parse(&malformed).unwrap().is_err());
    }

    #[test]
    fn test_vendor_status_mapping() {
        assert_eq!(map_vendor_status("connected"), Some(ConnectionStatus::Active));
        assert_eq!(map_vendor_status("invalid_credentials"), Some(ConnectionStatus::Error));
        assert_eq!(map_vendor_status("revoked"), Some(ConnectionStatus::Disconnected));
        assert_eq!(map_vendor_status("something_new"), None);
    }

    async fn fixture() -> (Arc<sea_orm::DatabaseConnection>, WebhookRouter, connection::Model) {
        let db = Arc::new(setup_db().await);
        let key = CryptoKey::new(vec![0u8; 32]).unwrap();
        let tenant_id = Uuid::new_v4();
        TenantRepository::new(db.clone())
            .create(tenant_id, None, Some("enterprise".to_string()))
            .await
            .unwrap();
        let connections = ConnectionRepository::new(db.clone(), key.clone());
        let pending = connections.create(tenant_id, "samsara").await.unwrap();
        let stored = connections
            .store_tokens(pending, Some("access"), None, Some("org-1"))
            .await
            .unwrap();
        let active = connections
            .set_status(stored, ConnectionStatus::Active)
            .await
            .unwrap();

        let router = WebhookRouter::new(
            db.clone(),
            Arc::new(ProviderRegistry::new()),
            key,
            5,
            24,
        );
        (db, router, active)
    }

    #[tokio::test]
    async fn test_disconnected_event_clears_credentials_and_notifies() {
        let (db, router, connection) = fixture().await;

        router
            .handle(
                "samsara",
                WebhookEvent::ConnectionDisconnected(AccountRefData {
                    external_id: "org-1".to_string(),
                }),
            )
            .await
            .unwrap();

        let key = CryptoKey::new(vec![0u8; 32]).unwrap();
        let updated = ConnectionRepository::new(db.clone(), key)
            .get_by_id(connection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, "disconnected");
        assert!(updated.access_token_ciphertext.is_none());

        let notifications = NotificationRepository::new(db)
            .list_for_tenant(connection.tenant_id, 10)
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, "connection_disconnected");
    }

    #[tokio::test]
    async fn test_sync_completed_settles_running_job() {
        let (db, router, connection) = fixture().await;

        let jobs = SyncJobRepository::new(db.clone());
        let ClaimOutcome::Started(job) = jobs
            .claim(&connection, SyncType::Vehicles, Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("claim must start");
        };

        router
            .handle(
                "samsara",
                WebhookEvent::SyncCompleted(SyncStatusData {
                    external_id: "org-1".to_string(),
                    sync_type: Some("vehicles".to_string()),
                    external_job_id: None,
                    records: Some(12),
                    message: None,
                }),
            )
            .await
            .unwrap();

        let settled = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(settled.status, "completed");
        assert_eq!(settled.records_synced, 12);

        let key = CryptoKey::new(vec![0u8; 32]).unwrap();
        let updated = ConnectionRepository::new(db, key)
            .get_by_id(connection.id)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_status_change_respects_state_machine() {
        let (db, router, connection) = fixture().await;

        router
            .handle(
                "samsara",
                WebhookEvent::ConnectionStatusChanged(ConnectionStatusData {
                    external_id: "org-1".to_string(),
                    status: "invalid_credentials".to_string(),
                }),
            )
            .await
            .unwrap();

        let key = CryptoKey::new(vec![0u8; 32]).unwrap();
        let updated = ConnectionRepository::new(db, key)
            .get_by_id(connection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, "error");
    }

    #[tokio::test]
    async fn test_event_for_unknown_account_is_ignored() {
        let (_db, router, _connection) = fixture().await;
        // Must not error; there is simply nothing to route to.
        router
            .handle(
                "samsara",
                WebhookEvent::VehiclesUpdated(AccountRefData {
                    external_id: "org-unknown".to_string(),
                }),
            )
            .await
            .unwrap();
    }
}
