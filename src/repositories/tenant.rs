//! Tenant repository.

use anyhow::{Result, anyhow};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::entitlements::Tier;
use crate::models::tenant::{self, Entity as Tenant};

/// Repository for tenant lookups.
#[derive(Debug, Clone)]
pub struct TenantRepository {
    pub db: Arc<DatabaseConnection>,
}

impl TenantRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, tenant_id: Uuid) -> Result<Option<tenant::Model>> {
        Ok(Tenant::find_by_id(tenant_id).one(&*self.db).await?)
    }

    /// Resolve the tenant's effective plan tier. Missing tenants are an
    /// error; a NULL plan means no active subscription and resolves to
    /// `None`. Unknown non-null plan values resolve to Starter.
    pub async fn tier_for(&self, tenant_id: Uuid) -> Result<Option<Tier>> {
        let tenant = self
            .get_by_id(tenant_id)
            .await?
            .ok_or_else(|| anyhow!("Tenant '{}' not found", tenant_id))?;
        Ok(tenant
            .plan_tier
            .as_deref()
            .map(|plan| Tier::from_plan(Some(plan))))
    }

    /// Insert a tenant row, used by tests and seed tooling.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        name: Option<String>,
        plan_tier: Option<String>,
    ) -> Result<tenant::Model> {
        let active = tenant::ActiveModel {
            id: Set(tenant_id),
            name: Set(name),
            plan_tier: Set(plan_tier),
            created_at: Set(chrono::Utc::now().into()),
        };
        Ok(active.insert(&*self.db).await?)
    }
}
