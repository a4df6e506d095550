//! Scheduled sync pass.
//!
//! An external cron hits the scheduler endpoint hourly; each pass reaps
//! stuck jobs, finds connections whose data has gone stale, and runs a
//! full entitled sync per connection. One connection's failure never
//! aborts the rest of the fleet.

use chrono::Duration;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::crypto::CryptoKey;
use crate::providers::ProviderRegistry;
use crate::repositories::{ConnectionRepository, SyncJobRepository, TenantRepository};
use crate::sync_engine::{SyncEngine, SyncOptions, SyncOutcome};

/// Per-connection result within one scheduler pass.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSyncResult {
    pub connection_id: Uuid,
    pub tenant_id: Uuid,
    pub provider: String,
    pub outcomes: Vec<SyncOutcome>,
}

/// Summary returned to the cron caller.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TickStats {
    pub connections_processed: usize,
    pub sync_results: Vec<ConnectionSyncResult>,
    pub errors: Vec<String>,
    pub reaped_jobs: u64,
}

/// Drives scheduled syncs over all stale connections.
#[derive(Clone)]
pub struct Scheduler {
    engine: SyncEngine,
    connections: ConnectionRepository,
    jobs: SyncJobRepository,
    tenants: TenantRepository,
    staleness: Duration,
    stuck_job_bound: Duration,
}

impl Scheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: Arc<ProviderRegistry>,
        crypto_key: CryptoKey,
        config: &SchedulerConfig,
        guard_minutes: i64,
        hos_dedup_hours: i64,
    ) -> Self {
        Self {
            engine: SyncEngine::new(
                db.clone(),
                registry,
                crypto_key.clone(),
                guard_minutes,
                hos_dedup_hours,
            ),
            connections: ConnectionRepository::new(db.clone(), crypto_key),
            jobs: SyncJobRepository::new(db.clone()),
            tenants: TenantRepository::new(db),
            staleness: Duration::minutes(config.staleness_minutes as i64),
            stuck_job_bound: Duration::minutes(config.stuck_job_minutes as i64),
        }
    }

    /// One scheduler pass: reap, discover, sync, summarize.
    #[instrument(skip(self))]
    pub async fn run_scheduled_pass(&self) -> TickStats {
        let mut stats = TickStats::default();

        match self.jobs.reap_stuck(self.stuck_job_bound).await {
            Ok(reaped) => {
                stats.reaped_jobs = reaped;
                if reaped > 0 {
                    warn!(reaped, "Reaped stuck sync jobs");
                    metrics::counter!("scheduler_jobs_reaped_total").increment(reaped);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to reap stuck sync jobs");
                stats.errors.push(format!("reaper: {}", e));
            }
        }

        let stale = match self.connections.stale_active(self.staleness).await {
            Ok(stale) => stale,
            Err(e) => {
                error!(error = %e, "Failed to discover stale connections");
                stats.errors.push(format!("discovery: {}", e));
                return stats;
            }
        };

        info!(count = stale.len(), "Discovered stale connections");
        for connection in stale {
            stats.connections_processed += 1;

            // Re-check entitlement every pass; a tenant may have
            // downgraded or been removed since the connection was made.
            let tier = match self.tenants.tier_for(connection.tenant_id).await {
                Ok(Some(tier)) => tier,
                Ok(None) => {
                    // No subscription: flag the connection and leave it in
                    // place, but do not sync anything for it.
                    warn!(connection_id = %connection.id, "Tenant has no active subscription");
                    if let Err(mark_err) = self
                        .connections
                        .mark_error(connection.id, "No active subscription")
                        .await
                    {
                        error!(connection_id = %connection.id, error = %mark_err, "Failed to flag connection");
                    }
                    stats
                        .errors
                        .push(format!("connection {}: no active subscription", connection.id));
                    continue;
                }
                Err(e) => {
                    let message = format!("connection {}: {}", connection.id, e);
                    warn!(connection_id = %connection.id, error = %e, "Entitlement lookup failed");
                    if let Err(mark_err) = self
                        .connections
                        .mark_error(connection.id, "Tenant entitlement lookup failed")
                        .await
                    {
                        error!(connection_id = %connection.id, error = %mark_err, "Failed to flag connection");
                    }
                    stats.errors.push(message);
                    continue;
                }
            };

            match self
                .engine
                .sync_entitled(&connection, tier, &SyncOptions::default())
                .await
            {
                Ok(report) => {
                    metrics::counter!("scheduler_connections_synced_total").increment(1);
                    stats.sync_results.push(ConnectionSyncResult {
                        connection_id: connection.id,
                        tenant_id: connection.tenant_id,
                        provider: connection.provider_slug.clone(),
                        outcomes: report.outcomes,
                    });
                }
                Err(e) => {
                    metrics::counter!("scheduler_connections_failed_total").increment(1);
                    error!(connection_id = %connection.id, error = %e.message, "Scheduled sync failed");
                    stats.errors.push(format!("connection {}: {}", connection.id, e.message));
                }
            }
        }

        info!(
            processed = stats.connections_processed,
            errors = stats.errors.len(),
            reaped = stats.reaped_jobs,
            "Scheduler pass finished"
        );
        stats
    }
}
