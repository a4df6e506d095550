//! Sync engine.
//!
//! Pulls one data type from a provider and lands it with idempotent
//! upserts, under the entitlement policy and the running-job guard.
//! `sync_all` fans out over every entitled data type with per-type
//! failure isolation.

use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connection_manager::{ConnectionManager, provider_api_error};
use crate::crypto::CryptoKey;
use crate::entitlements::Tier;
use crate::error::{self, ApiError};
use crate::models::connection;
use crate::notify::Notifier;
use crate::providers::{EldProvider, ProviderError, ProviderRegistry};
use crate::repositories::{
    ClaimOutcome, ConnectionRepository, EntityMappingRepository, SyncJobRepository,
    TelematicsRepository, TenantRepository,
};
use crate::types::{ConnectionStatus, EntityType, SyncType};

/// Optional time-range parameters for a sync invocation.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SyncOptions {
    /// Lower bound for HOS log fetches; defaults to 24 hours ago
    pub since: Option<DateTime<Utc>>,
    /// Reporting month for IFTA fetches (YYYY-MM); defaults to the current month
    pub period_month: Option<String>,
}

/// Terminal state of one data-type sync within an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    /// Not entitled under the tenant's tier; no job created
    Skipped,
    /// Blocked by the running-job guard
    AlreadyRunning,
}

/// Per-data-type result reported to callers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncOutcome {
    pub sync_type: SyncType,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub records_synced: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a `sync_all` invocation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncAllReport {
    pub connection_id: Uuid,
    pub outcomes: Vec<SyncOutcome>,
}

/// Orchestrates provider fetches, upserts, and side effects.
#[derive(Clone)]
pub struct SyncEngine {
    registry: Arc<ProviderRegistry>,
    connections: ConnectionRepository,
    jobs: SyncJobRepository,
    mappings: EntityMappingRepository,
    telematics: TelematicsRepository,
    tenants: TenantRepository,
    notifier: Notifier,
    manager: ConnectionManager,
    guard: Duration,
}

impl SyncEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: Arc<ProviderRegistry>,
        crypto_key: CryptoKey,
        guard_minutes: i64,
        hos_dedup_hours: i64,
    ) -> Self {
        let connections = ConnectionRepository::new(db.clone(), crypto_key);
        Self {
            registry: registry.clone(),
            connections: connections.clone(),
            jobs: SyncJobRepository::new(db.clone()),
            mappings: EntityMappingRepository::new(db.clone()),
            telematics: TelematicsRepository::new(db.clone()),
            tenants: TenantRepository::new(db.clone()),
            notifier: Notifier::new(db, hos_dedup_hours),
            manager: ConnectionManager::new(connections, registry),
            guard: Duration::minutes(guard_minutes),
        }
    }

    /// Sync one data type. Errors map onto the API surface: 409 for an
    /// inactive connection, 403 when not entitled, 429 when the guard
    /// rejects a duplicate trigger, 502 for provider failures.
    #[instrument(skip(self, options))]
    pub async fn sync(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
        sync_type: SyncType,
        options: &SyncOptions,
    ) -> Result<SyncOutcome, ApiError> {
        let connection = self.load_syncable(tenant_id, connection_id).await?;
        let tier = self
            .tenants
            .tier_for(tenant_id)
            .await?
            .ok_or_else(error::no_subscription)?;
        if !tier.allows(sync_type) {
            return Err(error::not_entitled(sync_type.as_str(), tier.as_str()));
        }

        let outcome = self.sync_claimed(&connection, sync_type, options).await?;
        match outcome.status {
            OutcomeStatus::AlreadyRunning => {
                let retry_after = self.retry_after_secs(outcome.job_id).await;
                Err(error::sync_in_progress(
                    outcome.job_id.unwrap_or_default(),
                    retry_after,
                ))
            }
            OutcomeStatus::Completed => {
                self.promote_if_recovered(connection.id).await?;
                Ok(outcome)
            }
            _ => Ok(outcome),
        }
    }

    /// Sync every data type the tenant's tier covers, isolating failures
    /// per type. The connection is promoted out of `error` only when every
    /// attempted type succeeded.
    #[instrument(skip(self, options))]
    pub async fn sync_all(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
        options: &SyncOptions,
    ) -> Result<SyncAllReport, ApiError> {
        let connection = self.load_syncable(tenant_id, connection_id).await?;
        let tier = self
            .tenants
            .tier_for(tenant_id)
            .await?
            .ok_or_else(error::no_subscription)?;
        let report = self.sync_entitled(&connection, tier, options).await?;
        Ok(report)
    }

    /// `sync_all` body shared with the scheduler, which has already loaded
    /// the connection and resolved the tier.
    pub(crate) async fn sync_entitled(
        &self,
        connection: &connection::Model,
        tier: Tier,
        options: &SyncOptions,
    ) -> Result<SyncAllReport, ApiError> {
        let mut outcomes = Vec::with_capacity(SyncType::ALL.len());
        let mut attempted = 0usize;
        let mut succeeded = 0usize;

        for sync_type in SyncType::ALL {
            if !tier.allows(sync_type) {
                outcomes.push(SyncOutcome {
                    sync_type,
                    status: OutcomeStatus::Skipped,
                    job_id: None,
                    records_synced: 0,
                    error: None,
                });
                continue;
            }
            let outcome = self.sync_claimed(connection, sync_type, options).await?;
            match outcome.status {
                OutcomeStatus::Completed => {
                    attempted += 1;
                    succeeded += 1;
                }
                OutcomeStatus::Failed => attempted += 1,
                _ => {}
            }
            outcomes.push(outcome);
        }

        if attempted > 0 && attempted == succeeded {
            self.promote_if_recovered(connection.id).await?;
        }

        Ok(SyncAllReport {
            connection_id: connection.id,
            outcomes,
        })
    }

    /// Claim the job slot and run one data-type sync to a terminal state.
    /// Provider failures land in the outcome, not in `Err`.
    async fn sync_claimed(
        &self,
        connection: &connection::Model,
        sync_type: SyncType,
        options: &SyncOptions,
    ) -> Result<SyncOutcome, ApiError> {
        let claim = self.jobs.claim(connection, sync_type, self.guard).await?;
        let job = match claim {
            ClaimOutcome::Started(job) => job,
            ClaimOutcome::AlreadyRunning(existing) => {
                return Ok(SyncOutcome {
                    sync_type,
                    status: OutcomeStatus::AlreadyRunning,
                    job_id: Some(existing.id),
                    records_synced: 0,
                    error: None,
                });
            }
        };

        match self.fetch_and_upsert(connection, sync_type, options).await {
            Ok(records_synced) => {
                self.jobs.complete(job.id, records_synced).await?;
                self.connections.mark_sync_success(connection.id).await?;
                info!(
                    connection_id = %connection.id,
                    sync_type = %sync_type,
                    records_synced,
                    "Sync completed"
                );
                Ok(SyncOutcome {
                    sync_type,
                    status: OutcomeStatus::Completed,
                    job_id: Some(job.id),
                    records_synced,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    connection_id = %connection.id,
                    sync_type = %sync_type,
                    error = %message,
                    "Sync failed"
                );
                self.jobs.fail(job.id, &message).await?;
                self.connections.mark_error(connection.id, &message).await?;
                Ok(SyncOutcome {
                    sync_type,
                    status: OutcomeStatus::Failed,
                    job_id: Some(job.id),
                    records_synced: 0,
                    error: Some(message),
                })
            }
        }
    }

    /// Fetch from the provider with a one-shot token refresh on expiry,
    /// then land the records. Returns the upserted count.
    async fn fetch_and_upsert(
        &self,
        connection: &connection::Model,
        sync_type: SyncType,
        options: &SyncOptions,
    ) -> Result<i32, SyncFailure> {
        let provider = self
            .registry
            .get(&connection.provider_slug)
            .map_err(|e| SyncFailure(e.to_string()))?;

        let (access_token, _) = self
            .connections
            .decrypt_tokens(connection)
            .map_err(|e| SyncFailure(e.to_string()))?;
        let access_token = access_token.ok_or_else(|| SyncFailure("No stored access token".into()))?;

        match self
            .fetch_one(connection, provider.as_ref(), &access_token, sync_type, options)
            .await
        {
            Err(ProviderError::AuthExpired { .. }) => {
                let (refreshed, new_token) = self
                    .manager
                    .refresh_tokens(connection.clone())
                    .await
                    .map_err(|e| SyncFailure(e.message.to_string()))?;
                self.fetch_one(&refreshed, provider.as_ref(), &new_token, sync_type, options)
                    .await
                    .map_err(|e| SyncFailure(e.to_string()))
            }
            other => other.map_err(|e| SyncFailure(e.to_string())),
        }
    }

    async fn fetch_one(
        &self,
        connection: &connection::Model,
        provider: &dyn EldProvider,
        access_token: &str,
        sync_type: SyncType,
        options: &SyncOptions,
    ) -> Result<i32, ProviderError> {
        let persist_error = |e: anyhow::Error| ProviderError::Unknown {
            details: e.to_string(),
        };

        let count = match sync_type {
            SyncType::Vehicles => {
                let records = provider.fetch_vehicles(access_token).await?;
                let count = records.len();
                for record in records {
                    self.mappings
                        .upsert_external(
                            connection,
                            EntityType::Vehicle,
                            &record.external_id,
                            Some(&record.name),
                            record.vin.as_deref(),
                        )
                        .await
                        .map_err(persist_error)?;
                }
                count
            }
            SyncType::Drivers => {
                let records = provider.fetch_drivers(access_token).await?;
                let count = records.len();
                for record in records {
                    self.mappings
                        .upsert_external(
                            connection,
                            EntityType::Driver,
                            &record.external_id,
                            Some(&record.name),
                            record.license_number.as_deref(),
                        )
                        .await
                        .map_err(persist_error)?;
                }
                count
            }
            SyncType::HosLogs => {
                let since = options.since.unwrap_or_else(|| Utc::now() - Duration::hours(24));
                let records = provider.fetch_hos_logs(access_token, since).await?;
                let count = records.len();
                for record in records {
                    let driver_id = self
                        .mapped_internal(connection.id, EntityType::Driver, &record.external_driver_id)
                        .await
                        .map_err(persist_error)?;
                    let log = self
                        .telematics
                        .upsert_hos_log(connection, &record, driver_id)
                        .await
                        .map_err(persist_error)?;
                    if !record.violations.is_empty() {
                        self.notifier.hos_violation(&log).await.map_err(persist_error)?;
                    }
                }
                count
            }
            SyncType::VehicleLocations => {
                let records = provider.fetch_vehicle_locations(access_token).await?;
                let count = records.len();
                for record in records {
                    let vehicle_id = self
                        .mapped_internal(connection.id, EntityType::Vehicle, &record.external_vehicle_id)
                        .await
                        .map_err(persist_error)?;
                    self.telematics
                        .upsert_location(connection, &record, vehicle_id)
                        .await
                        .map_err(persist_error)?;
                }
                count
            }
            SyncType::FaultCodes => {
                let records = provider.fetch_fault_codes(access_token).await?;
                let count = records.len();
                for record in records {
                    let vehicle_id = self
                        .mapped_internal(connection.id, EntityType::Vehicle, &record.external_vehicle_id)
                        .await
                        .map_err(persist_error)?;
                    let upsert = self
                        .telematics
                        .upsert_fault(connection, &record, vehicle_id)
                        .await
                        .map_err(persist_error)?;
                    self.notifier
                        .fault_alert(&upsert.model)
                        .await
                        .map_err(persist_error)?;
                }
                count
            }
            SyncType::IftaMileage => {
                let period_month = options
                    .period_month
                    .clone()
                    .unwrap_or_else(|| Utc::now().format("%Y-%m").to_string());
                let records = provider.fetch_ifta_mileage(access_token, &period_month).await?;
                let count = records.len();
                for record in records {
                    let vehicle_id = self
                        .mapped_internal(connection.id, EntityType::Vehicle, &record.external_vehicle_id)
                        .await
                        .map_err(persist_error)?;
                    self.telematics
                        .upsert_ifta(connection, &record, vehicle_id)
                        .await
                        .map_err(persist_error)?;
                }
                count
            }
        };
        Ok(count as i32)
    }

    async fn mapped_internal(
        &self,
        connection_id: Uuid,
        entity_type: EntityType,
        external_id: &str,
    ) -> anyhow::Result<Option<Uuid>> {
        Ok(self
            .mappings
            .find_by_external(connection_id, entity_type, external_id)
            .await?
            .filter(|mapping| !mapping.orphaned)
            .and_then(|mapping| mapping.internal_id))
    }

    async fn load_syncable(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<connection::Model, ApiError> {
        let connection = self
            .connections
            .get_for_tenant(tenant_id, connection_id)
            .await?
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "Connection not found for this tenant",
                )
            })?;
        match ConnectionStatus::parse(&connection.status) {
            // Error connections are syncable; a successful pass is the
            // recovery path.
            Some(ConnectionStatus::Active) | Some(ConnectionStatus::Error) => Ok(connection),
            _ => Err(error::connection_not_active(&connection.status)),
        }
    }

    async fn promote_if_recovered(&self, connection_id: Uuid) -> Result<(), ApiError> {
        let Some(current) = self.connections.get_by_id(connection_id).await? else {
            return Ok(());
        };
        if current.status == ConnectionStatus::Error.as_str() {
            self.connections
                .set_status(current, ConnectionStatus::Active)
                .await?;
        }
        Ok(())
    }

    async fn retry_after_secs(&self, job_id: Option<Uuid>) -> u64 {
        let Some(job_id) = job_id else {
            return self.guard.num_seconds().max(0) as u64;
        };
        match self.jobs.get_by_id(job_id).await {
            Ok(Some(job)) => {
                let elapsed = Utc::now() - job.started_at.with_timezone(&Utc);
                (self.guard - elapsed).num_seconds().clamp(1, self.guard.num_seconds()) as u64
            }
            _ => self.guard.num_seconds().max(0) as u64,
        }
    }
}

/// Internal failure message carrier for one sync attempt.
struct SyncFailure(String);

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map a provider failure to the public API surface. Kept here so handlers
/// share one mapping with the connection manager.
pub fn provider_failure(provider_slug: &str, e: ProviderError) -> ApiError {
    provider_api_error(provider_slug, e)
}
