//! Sync job repository.
//!
//! The claim operation is the concurrency guard: starting a sync and
//! checking for an overlapping run happen inside one transaction, so two
//! concurrent triggers for the same (connection, sync_type) cannot both
//! claim a job.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::models::sync_job::{self, Column, Entity as SyncJob};
use crate::types::{JobStatus, SyncType};

/// Result of attempting to claim a sync slot.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// A new running job was created; the caller owns the sync.
    Started(sync_job::Model),
    /// Another job claimed the slot within the guard window.
    AlreadyRunning(sync_job::Model),
}

/// Repository for sync job rows.
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    pub db: Arc<DatabaseConnection>,
}

impl SyncJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Claim the sync slot for (connection, sync_type).
    ///
    /// A running job younger than the guard window blocks the claim.
    /// Running jobs older than the window are treated as abandoned and do
    /// not block; the reaper will fail them.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn claim(
        &self,
        connection: &crate::models::connection::Model,
        sync_type: SyncType,
        guard_window: Duration,
    ) -> Result<ClaimOutcome> {
        let txn = self.db.begin().await?;
        let cutoff: DateTime<Utc> = Utc::now() - guard_window;

        let running = SyncJob::find()
            .filter(Column::ConnectionId.eq(connection.id))
            .filter(Column::SyncType.eq(sync_type.as_str()))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(Column::StartedAt.gt(cutoff))
            .order_by_desc(Column::StartedAt)
            .one(&txn)
            .await?;

        if let Some(job) = running {
            txn.commit().await?;
            return Ok(ClaimOutcome::AlreadyRunning(job));
        }

        let now = Utc::now();
        let job = sync_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(connection.tenant_id),
            connection_id: Set(connection.id),
            provider_slug: Set(connection.provider_slug.clone()),
            sync_type: Set(sync_type.as_str().to_string()),
            status: Set(JobStatus::Running.as_str().to_string()),
            external_job_id: Set(None),
            records_synced: Set(0),
            error_message: Set(None),
            started_at: Set(now.into()),
            finished_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .context("Failed to insert sync job")?;

        txn.commit().await?;
        Ok(ClaimOutcome::Started(job))
    }

    pub async fn get_by_id(&self, job_id: Uuid) -> Result<Option<sync_job::Model>> {
        Ok(SyncJob::find_by_id(job_id).one(&*self.db).await?)
    }

    /// Mark a job completed with its final record count.
    #[instrument(skip(self))]
    pub async fn complete(&self, job_id: Uuid, records_synced: i32) -> Result<()> {
        self.finish(job_id, JobStatus::Completed, records_synced, None)
            .await
    }

    /// Mark a job failed with a failure description.
    #[instrument(skip(self, message))]
    pub async fn fail(&self, job_id: Uuid, message: &str) -> Result<()> {
        self.finish(job_id, JobStatus::Failed, 0, Some(message)).await
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        records_synced: i32,
        message: Option<&str>,
    ) -> Result<()> {
        let Some(job) = self.get_by_id(job_id).await? else {
            warn!(%job_id, "Attempted to finish a sync job that no longer exists");
            return Ok(());
        };
        let now = Utc::now();
        let mut active: sync_job::ActiveModel = job.into();
        active.status = Set(status.as_str().to_string());
        active.records_synced = Set(records_synced);
        active.error_message = Set(message.map(str::to_string));
        active.finished_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Running jobs for a connection, optionally narrowed to one sync type.
    pub async fn running_for_connection(
        &self,
        connection_id: Uuid,
        sync_type: Option<&str>,
    ) -> Result<Vec<sync_job::Model>> {
        let mut query = SyncJob::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()));
        if let Some(sync_type) = sync_type {
            query = query.filter(Column::SyncType.eq(sync_type));
        }
        Ok(query.order_by_desc(Column::StartedAt).all(&*self.db).await?)
    }

    /// Fail every running job older than the cutoff. Returns how many were
    /// reaped.
    #[instrument(skip(self))]
    pub async fn reap_stuck(&self, older_than: Duration) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let stuck = SyncJob::find()
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(Column::StartedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let count = stuck.len() as u64;
        for job in stuck {
            warn!(job_id = %job.id, sync_type = %job.sync_type, "Reaping stuck sync job");
            self.finish(
                job.id,
                JobStatus::Failed,
                0,
                Some("Job exceeded maximum runtime and was reaped"),
            )
            .await?;
        }
        Ok(count)
    }

    /// Recent job history for a tenant, newest first.
    pub async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: u64,
    ) -> Result<Vec<sync_job::Model>> {
        Ok(SyncJob::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoKey;
    use crate::repositories::connection::ConnectionRepository;
    use crate::repositories::tenant::TenantRepository;
    use crate::repositories::test_support::setup_db;

    async fn seed(db: Arc<DatabaseConnection>) -> crate::models::connection::Model {
        let tenant_id = Uuid::new_v4();
        TenantRepository::new(db.clone())
            .create(tenant_id, None, None)
            .await
            .unwrap();
        ConnectionRepository::new(db, CryptoKey::new(vec![0u8; 32]).unwrap())
            .create(tenant_id, "motive")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_claim_then_conflict() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = SyncJobRepository::new(db);

        let first = repo
            .claim(&connection, SyncType::Vehicles, Duration::minutes(5))
            .await
            .unwrap();
        let job = match first {
            ClaimOutcome::Started(job) => job,
            ClaimOutcome::AlreadyRunning(_) => panic!("first claim must start"),
        };

        let second = repo
            .claim(&connection, SyncType::Vehicles, Duration::minutes(5))
            .await
            .unwrap();
        match second {
            ClaimOutcome::AlreadyRunning(existing) => assert_eq!(existing.id, job.id),
            ClaimOutcome::Started(_) => panic!("second claim must be blocked"),
        }

        // A different sync type has its own slot.
        let other = repo
            .claim(&connection, SyncType::Drivers, Duration::minutes(5))
            .await
            .unwrap();
        assert!(matches!(other, ClaimOutcome::Started(_)));
    }

    #[tokio::test]
    async fn test_completed_job_frees_the_slot() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = SyncJobRepository::new(db);

        let ClaimOutcome::Started(job) = repo
            .claim(&connection, SyncType::HosLogs, Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("first claim must start");
        };
        repo.complete(job.id, 42).await.unwrap();

        let finished = repo.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, "completed");
        assert_eq!(finished.records_synced, 42);
        assert!(finished.finished_at.is_some());

        let next = repo
            .claim(&connection, SyncType::HosLogs, Duration::minutes(5))
            .await
            .unwrap();
        assert!(matches!(next, ClaimOutcome::Started(_)));
    }

    #[tokio::test]
    async fn test_zero_guard_window_never_blocks() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = SyncJobRepository::new(db);

        let first = repo
            .claim(&connection, SyncType::FaultCodes, Duration::zero())
            .await
            .unwrap();
        assert!(matches!(first, ClaimOutcome::Started(_)));
        // With no guard window the prior running job is already outside it.
        let second = repo
            .claim(&connection, SyncType::FaultCodes, Duration::zero())
            .await
            .unwrap();
        assert!(matches!(second, ClaimOutcome::Started(_)));
    }

    #[tokio::test]
    async fn test_reap_stuck_fails_old_running_jobs() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = SyncJobRepository::new(db);

        let ClaimOutcome::Started(job) = repo
            .claim(&connection, SyncType::IftaMileage, Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("first claim must start");
        };

        // Fresh jobs are left alone.
        assert_eq!(repo.reap_stuck(Duration::minutes(15)).await.unwrap(), 0);
        // Any running job is older than a zero cutoff.
        assert_eq!(repo.reap_stuck(Duration::zero()).await.unwrap(), 1);

        let reaped = repo.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(reaped.status, "failed");
        assert!(
            reaped
                .error_message
                .as_deref()
                .unwrap_or_default()
                .contains("reaped")
        );
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = SyncJobRepository::new(db);

        for sync_type in [SyncType::Vehicles, SyncType::Drivers] {
            let ClaimOutcome::Started(job) = repo
                .claim(&connection, sync_type, Duration::minutes(5))
                .await
                .unwrap()
            else {
                panic!("claim must start");
            };
            repo.complete(job.id, 1).await.unwrap();
        }

        let history = repo.list_for_tenant(connection.tenant_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
