//! Connection repository.
//!
//! Owns connection row lifecycle and token storage. Tokens only cross
//! this boundary as plaintext; the ciphertext columns are an internal
//! detail of this repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::crypto::{self, CryptoKey};
use crate::models::connection::{self, Column, Entity as Connection};
use crate::types::ConnectionStatus;

/// Repository for ELD provider connections.
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    pub db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl ConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Insert a fresh pending connection.
    #[instrument(skip(self))]
    pub async fn create(&self, tenant_id: Uuid, provider_slug: &str) -> Result<connection::Model> {
        let now = Utc::now();
        let active = connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            provider_slug: Set(provider_slug.to_string()),
            external_id: Set(None),
            status: Set(ConnectionStatus::Pending.as_str().to_string()),
            access_token_ciphertext: Set(None),
            refresh_token_ciphertext: Set(None),
            last_sync_at: Set(None),
            last_error: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        active
            .insert(&*self.db)
            .await
            .context("Failed to insert connection")
    }

    pub async fn get_by_id(&self, connection_id: Uuid) -> Result<Option<connection::Model>> {
        Ok(Connection::find_by_id(connection_id).one(&*self.db).await?)
    }

    pub async fn get_for_tenant(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<Option<connection::Model>> {
        Ok(Connection::find_by_id(connection_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?)
    }

    /// Find the non-disconnected connection for a tenant/provider pair, if
    /// any. At most one such row exists per pair.
    pub async fn find_live(
        &self,
        tenant_id: Uuid,
        provider_slug: &str,
    ) -> Result<Option<connection::Model>> {
        Ok(Connection::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::ProviderSlug.eq(provider_slug))
            .filter(Column::Status.ne(ConnectionStatus::Disconnected.as_str()))
            .one(&*self.db)
            .await?)
    }

    pub async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<connection::Model>> {
        Ok(Connection::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_asc(Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Find connections by provider external account id, used to route
    /// webhook events back to the owning tenants.
    pub async fn find_by_external_id(
        &self,
        provider_slug: &str,
        external_id: &str,
    ) -> Result<Vec<connection::Model>> {
        Ok(Connection::find()
            .filter(Column::ProviderSlug.eq(provider_slug))
            .filter(Column::ExternalId.eq(external_id))
            .filter(Column::Status.ne(ConnectionStatus::Disconnected.as_str()))
            .all(&*self.db)
            .await?)
    }

    /// Syncable connections (active, or error awaiting retry) whose last
    /// sync is older than the staleness cutoff or that have never synced.
    pub async fn stale_active(&self, older_than: Duration) -> Result<Vec<connection::Model>> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        Ok(Connection::find()
            .filter(Column::Status.is_in([
                ConnectionStatus::Active.as_str(),
                ConnectionStatus::Error.as_str(),
            ]))
            .filter(
                Column::LastSyncAt
                    .lt(cutoff)
                    .or(Column::LastSyncAt.is_null()),
            )
            .order_by_asc(Column::LastSyncAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        connection: connection::Model,
        status: ConnectionStatus,
    ) -> Result<connection::Model> {
        let mut active: connection::ActiveModel = connection.into();
        active.status = Set(status.as_str().to_string());
        if status == ConnectionStatus::Active {
            active.last_error = Set(None);
        }
        active.updated_at = Set(Utc::now().into());
        active
            .update(&*self.db)
            .await
            .context("Failed to update connection status")
    }

    /// Encrypt and store token material, optionally recording the
    /// provider-side account id learned during the exchange.
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn store_tokens(
        &self,
        connection: connection::Model,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<connection::Model> {
        let (access_ct, refresh_ct) = crypto::encrypt_connection_tokens(
            &self.crypto_key,
            &connection,
            access_token,
            refresh_token,
        )
        .context("Failed to encrypt connection tokens")?;

        let mut active: connection::ActiveModel = connection.into();
        active.access_token_ciphertext = Set(access_ct);
        if refresh_token.is_some() {
            active.refresh_token_ciphertext = Set(refresh_ct);
        }
        if let Some(external_id) = external_id {
            active.external_id = Set(Some(external_id.to_string()));
        }
        active.updated_at = Set(Utc::now().into());
        active
            .update(&*self.db)
            .await
            .context("Failed to store connection tokens")
    }

    /// Decrypt stored token material.
    pub fn decrypt_tokens(
        &self,
        connection: &connection::Model,
    ) -> Result<(Option<String>, Option<String>)> {
        if let Some(ct) = connection.access_token_ciphertext.as_deref() {
            if !crypto::is_encrypted_payload(ct) {
                warn!(
                    connection_id = %connection.id,
                    "Connection holds a legacy plaintext token; it will be re-encrypted on next refresh"
                );
            }
        }
        crypto::decrypt_connection_tokens(&self.crypto_key, connection)
            .context("Failed to decrypt connection tokens")
    }

    /// Drop all credential material from the row.
    #[instrument(skip(self), fields(connection_id = %connection.id))]
    pub async fn clear_tokens(&self, connection: connection::Model) -> Result<connection::Model> {
        let mut active: connection::ActiveModel = connection.into();
        active.access_token_ciphertext = Set(None);
        active.refresh_token_ciphertext = Set(None);
        active.updated_at = Set(Utc::now().into());
        active
            .update(&*self.db)
            .await
            .context("Failed to clear connection tokens")
    }

    /// Hard-delete the row. Sync jobs, mappings, and synced data cascade.
    #[instrument(skip(self))]
    pub async fn delete(&self, connection_id: Uuid) -> Result<()> {
        Connection::delete_by_id(connection_id)
            .exec(&*self.db)
            .await
            .context("Failed to delete connection")?;
        Ok(())
    }

    /// Record a successful sync: bump last_sync_at and clear any error.
    /// Status promotion is the sync engine's call, not the repository's.
    #[instrument(skip(self))]
    pub async fn mark_sync_success(&self, connection_id: Uuid) -> Result<()> {
        let Some(connection) = self.get_by_id(connection_id).await? else {
            return Ok(());
        };
        let now = Utc::now();
        let mut active: connection::ActiveModel = connection.into();
        active.last_sync_at = Set(Some(now.into()));
        active.last_error = Set(None);
        active.updated_at = Set(now.into());
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Move the connection to the error state with a failure description.
    #[instrument(skip(self, message))]
    pub async fn mark_error(&self, connection_id: Uuid, message: &str) -> Result<()> {
        let Some(connection) = self.get_by_id(connection_id).await? else {
            return Ok(());
        };
        let mut active: connection::ActiveModel = connection.into();
        active.status = Set(ConnectionStatus::Error.as_str().to_string());
        active.last_error = Set(Some(message.to_string()));
        active.updated_at = Set(Utc::now().into());
        active.update(&*self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::setup_db;
    use crate::repositories::tenant::TenantRepository;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    async fn seed(repo: &ConnectionRepository) -> (Uuid, connection::Model) {
        let tenant_id = Uuid::new_v4();
        TenantRepository::new(repo.db.clone())
            .create(tenant_id, None, Some("enterprise".to_string()))
            .await
            .unwrap();
        let connection = repo.create(tenant_id, "samsara").await.unwrap();
        (tenant_id, connection)
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let db = Arc::new(setup_db().await);
        let repo = ConnectionRepository::new(db, test_key());
        let (tenant_id, connection) = seed(&repo).await;

        assert_eq!(connection.status, "pending");
        assert_eq!(connection.tenant_id, tenant_id);
        assert!(connection.access_token_ciphertext.is_none());

        let live = repo.find_live(tenant_id, "samsara").await.unwrap();
        assert_eq!(live.map(|c| c.id), Some(connection.id));
    }

    #[tokio::test]
    async fn test_disconnected_rows_are_not_live() {
        let db = Arc::new(setup_db().await);
        let repo = ConnectionRepository::new(db, test_key());
        let (tenant_id, connection) = seed(&repo).await;

        repo.set_status(connection, ConnectionStatus::Disconnected)
            .await
            .unwrap();
        assert!(repo.find_live(tenant_id, "samsara").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_store_roundtrip() {
        let db = Arc::new(setup_db().await);
        let repo = ConnectionRepository::new(db, test_key());
        let (_, connection) = seed(&repo).await;

        let stored = repo
            .store_tokens(connection, Some("access-1"), Some("refresh-1"), Some("org-9"))
            .await
            .unwrap();
        assert!(crypto::is_encrypted_payload(
            stored.access_token_ciphertext.as_deref().unwrap()
        ));
        assert_eq!(stored.external_id.as_deref(), Some("org-9"));

        let (access, refresh) = repo.decrypt_tokens(&stored).unwrap();
        assert_eq!(access.as_deref(), Some("access-1"));
        assert_eq!(refresh.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_token_kept_when_absent_from_update() {
        let db = Arc::new(setup_db().await);
        let repo = ConnectionRepository::new(db, test_key());
        let (_, connection) = seed(&repo).await;

        let stored = repo
            .store_tokens(connection, Some("access-1"), Some("refresh-1"), None)
            .await
            .unwrap();
        // A token refresh that returns no new refresh token keeps the old one.
        let rotated = repo
            .store_tokens(stored, Some("access-2"), None, None)
            .await
            .unwrap();

        let (access, refresh) = repo.decrypt_tokens(&rotated).unwrap();
        assert_eq!(access.as_deref(), Some("access-2"));
        assert_eq!(refresh.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_error_and_success_transitions() {
        let db = Arc::new(setup_db().await);
        let repo = ConnectionRepository::new(db, test_key());
        let (_, connection) = seed(&repo).await;
        let id = connection.id;

        repo.mark_error(id, "upstream auth expired").await.unwrap();
        let errored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(errored.status, "error");
        assert_eq!(errored.last_error.as_deref(), Some("upstream auth expired"));

        repo.mark_sync_success(id).await.unwrap();
        let recovered = repo.get_by_id(id).await.unwrap().unwrap();
        // Status is left alone; promotion back to active is a separate step.
        assert_eq!(recovered.status, "error");
        assert!(recovered.last_error.is_none());
        assert!(recovered.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_active_includes_never_synced() {
        let db = Arc::new(setup_db().await);
        let repo = ConnectionRepository::new(db, test_key());
        let (_, connection) = seed(&repo).await;

        // Pending connections are never considered stale.
        assert!(repo.stale_active(Duration::minutes(60)).await.unwrap().is_empty());

        let active = repo
            .set_status(connection, ConnectionStatus::Active)
            .await
            .unwrap();
        let stale = repo.stale_active(Duration::minutes(60)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, active.id);

        repo.mark_sync_success(active.id).await.unwrap();
        assert!(repo.stale_active(Duration::minutes(60)).await.unwrap().is_empty());
    }
}
