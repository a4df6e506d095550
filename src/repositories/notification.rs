//! Notification repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::models::notification::{self, Column, Entity as Notification};
use crate::types::NotificationKind;

/// Repository for durable notifications.
#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pub db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, title, body))]
    pub async fn insert(
        &self,
        tenant_id: Uuid,
        kind: NotificationKind,
        entity_ref: &str,
        title: &str,
        body: Option<&str>,
    ) -> Result<notification::Model> {
        notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            kind: Set(kind.as_str().to_string()),
            entity_ref: Set(entity_ref.to_string()),
            title: Set(title.to_string()),
            body: Set(body.map(str::to_string)),
            created_at: Set(Utc::now().into()),
        }
        .insert(&*self.db)
        .await
        .context("Failed to insert notification")
    }

    /// Whether a notification of this kind for this entity already exists
    /// inside the dedup window.
    pub async fn exists_within(
        &self,
        tenant_id: Uuid,
        kind: NotificationKind,
        entity_ref: &str,
        window: Duration,
    ) -> Result<bool> {
        let cutoff: DateTime<Utc> = Utc::now() - window;
        let count = Notification::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::Kind.eq(kind.as_str()))
            .filter(Column::EntityRef.eq(entity_ref))
            .filter(Column::CreatedAt.gt(cutoff))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: u64,
    ) -> Result<Vec<notification::Model>> {
        Ok(Notification::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }
}
