//! Entity mapping repository.
//!
//! Upserts keep provider-side fields fresh without ever touching an
//! existing match: internal_id and match_source are only written through
//! the explicit match operations.

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::models::entity_mapping::{self, Column, Entity as EntityMapping};
use crate::types::EntityType;

/// How a mapping got its internal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Auto,
    Manual,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Auto => "auto",
            MatchSource::Manual => "manual",
        }
    }
}

/// Repository for external-to-internal entity mappings.
#[derive(Debug, Clone)]
pub struct EntityMappingRepository {
    pub db: Arc<DatabaseConnection>,
}

impl EntityMappingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert the provider-side view of an entity.
    ///
    /// Inserts an unmatched mapping on first sight; on later syncs only
    /// external_name and external_ref are refreshed.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn upsert_external(
        &self,
        connection: &crate::models::connection::Model,
        entity_type: EntityType,
        external_id: &str,
        external_name: Option<&str>,
        external_ref: Option<&str>,
    ) -> Result<entity_mapping::Model> {
        let existing = self
            .find_by_external(connection.id, entity_type, external_id)
            .await?;

        let now = Utc::now();
        match existing {
            Some(mapping) => {
                let mut active: entity_mapping::ActiveModel = mapping.into();
                active.external_name = Set(external_name.map(str::to_string));
                active.external_ref = Set(external_ref.map(str::to_string));
                active.updated_at = Set(now.into());
                active
                    .update(&*self.db)
                    .await
                    .context("Failed to refresh entity mapping")
            }
            None => entity_mapping::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(connection.tenant_id),
                connection_id: Set(connection.id),
                entity_type: Set(entity_type.as_str().to_string()),
                external_id: Set(external_id.to_string()),
                external_name: Set(external_name.map(str::to_string)),
                external_ref: Set(external_ref.map(str::to_string)),
                internal_id: Set(None),
                match_source: Set(None),
                orphaned: Set(false),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
            .insert(&*self.db)
            .await
            .context("Failed to insert entity mapping"),
        }
    }

    pub async fn find_by_external(
        &self,
        connection_id: Uuid,
        entity_type: EntityType,
        external_id: &str,
    ) -> Result<Option<entity_mapping::Model>> {
        Ok(EntityMapping::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .filter(Column::EntityType.eq(entity_type.as_str()))
            .filter(Column::ExternalId.eq(external_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn get_by_id(&self, mapping_id: Uuid) -> Result<Option<entity_mapping::Model>> {
        Ok(EntityMapping::find_by_id(mapping_id).one(&*self.db).await?)
    }

    pub async fn list_by_connection(
        &self,
        connection_id: Uuid,
        entity_type: EntityType,
    ) -> Result<Vec<entity_mapping::Model>> {
        Ok(EntityMapping::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .filter(Column::EntityType.eq(entity_type.as_str()))
            .order_by_asc(Column::ExternalId)
            .all(&*self.db)
            .await?)
    }

    pub async fn unmatched(
        &self,
        connection_id: Uuid,
        entity_type: EntityType,
    ) -> Result<Vec<entity_mapping::Model>> {
        Ok(EntityMapping::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .filter(Column::EntityType.eq(entity_type.as_str()))
            .filter(Column::InternalId.is_null())
            .all(&*self.db)
            .await?)
    }

    /// Record a match. Auto matches never overwrite an existing match of
    /// either source; manual matches always win.
    #[instrument(skip(self))]
    pub async fn set_match(
        &self,
        mapping: entity_mapping::Model,
        internal_id: Uuid,
        source: MatchSource,
    ) -> Result<entity_mapping::Model> {
        if source == MatchSource::Auto && mapping.internal_id.is_some() {
            return Ok(mapping);
        }
        let mut active: entity_mapping::ActiveModel = mapping.into();
        active.internal_id = Set(Some(internal_id));
        active.match_source = Set(Some(source.as_str().to_string()));
        active.orphaned = Set(false);
        active.updated_at = Set(Utc::now().into());
        active
            .update(&*self.db)
            .await
            .context("Failed to record entity match")
    }

    /// Clear a match, returning the mapping to the unmatched pool.
    #[instrument(skip(self))]
    pub async fn clear_match(
        &self,
        mapping: entity_mapping::Model,
    ) -> Result<entity_mapping::Model> {
        let mut active: entity_mapping::ActiveModel = mapping.into();
        active.internal_id = Set(None);
        active.match_source = Set(None);
        active.orphaned = Set(false);
        active.updated_at = Set(Utc::now().into());
        active
            .update(&*self.db)
            .await
            .context("Failed to clear entity match")
    }

    /// Flag a mapping whose internal record no longer exists. The mapping
    /// and its match are preserved for the operator to resolve.
    #[instrument(skip(self))]
    pub async fn mark_orphaned(&self, mapping: entity_mapping::Model) -> Result<()> {
        let mut active: entity_mapping::ActiveModel = mapping.into();
        active.orphaned = Set(true);
        active.updated_at = Set(Utc::now().into());
        active.update(&*self.db).await?;
        Ok(())
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
            .create(tenant_id, "samsara")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_refreshes_without_touching_match() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = EntityMappingRepository::new(db);

        let mapping = repo
            .upsert_external(
                &connection,
                EntityType::Vehicle,
                "veh-1",
                Some("Truck 101"),
                Some("1FUJGLDR0CLBP8834"),
            )
            .await
            .unwrap();
        assert!(mapping.internal_id.is_none());

        let internal = Uuid::new_v4();
        let matched = repo
            .set_match(mapping, internal, MatchSource::Manual)
            .await
            .unwrap();
        assert_eq!(matched.match_source.as_deref(), Some("manual"));

        // Re-sync with a renamed vehicle keeps the match intact.
        let refreshed = repo
            .upsert_external(
                &connection,
                EntityType::Vehicle,
                "veh-1",
                Some("Truck 101 (rebadged)"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(refreshed.id, matched.id);
        assert_eq!(refreshed.internal_id, Some(internal));
        assert_eq!(refreshed.external_name.as_deref(), Some("Truck 101 (rebadged)"));
    }

    #[tokio::test]
    async fn test_auto_match_never_overwrites() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = EntityMappingRepository::new(db);

        let mapping = repo
            .upsert_external(&connection, EntityType::Driver, "drv-1", Some("Pat Doe"), None)
            .await
            .unwrap();

        let manual_target = Uuid::new_v4();
        let matched = repo
            .set_match(mapping, manual_target, MatchSource::Manual)
            .await
            .unwrap();

        // A later auto pass proposing a different record is a no-op.
        let after_auto = repo
            .set_match(matched, Uuid::new_v4(), MatchSource::Auto)
            .await
            .unwrap();
        assert_eq!(after_auto.internal_id, Some(manual_target));
        assert_eq!(after_auto.match_source.as_deref(), Some("manual"));
    }

    #[tokio::test]
    async fn test_unmatched_listing() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = EntityMappingRepository::new(db);

        let a = repo
            .upsert_external(&connection, EntityType::Driver, "drv-1", Some("A"), None)
            .await
            .unwrap();
        repo.upsert_external(&connection, EntityType::Driver, "drv-2", Some("B"), None)
            .await
            .unwrap();
        repo.set_match(a, Uuid::new_v4(), MatchSource::Auto)
            .await
            .unwrap();

        let unmatched = repo
            .unmatched(connection.id, EntityType::Driver)
            .await
            .unwrap();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].external_id, "drv-2");
    }

    #[tokio::test]
    async fn test_orphan_flag_preserves_match() {
        let db = Arc::new(setup_db().await);
        let connection = seed(db.clone()).await;
        let repo = EntityMappingRepository::new(db);

        let mapping = repo
            .upsert_external(&connection, EntityType::Vehicle, "veh-2", None, None)
            .await
            .unwrap();
        let internal = Uuid::new_v4();
        let matched = repo
            .set_match(mapping, internal, MatchSource::Auto)
            .await
            .unwrap();

        repo.mark_orphaned(matched.clone()).await.unwrap();
        let flagged = repo.get_by_id(matched.id).await.unwrap().unwrap();
        assert!(flagged.orphaned);
        assert_eq!(flagged.internal_id, Some(internal));
    }
}
