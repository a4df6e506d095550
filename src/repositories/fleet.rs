//! Fleet asset repository.
//!
//! Read side for the internally-owned vehicle and driver records that
//! provider entities are matched against.

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{driver, vehicle};

/// Repository for internal fleet records.
#[derive(Debug, Clone)]
pub struct FleetRepository {
    pub db: Arc<DatabaseConnection>,
}

impl FleetRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_vehicles(&self, tenant_id: Uuid) -> Result<Vec<vehicle::Model>> {
        Ok(vehicle::Entity::find()
            .filter(vehicle::Column::TenantId.eq(tenant_id))
            .all(&*self.db)
            .await?)
    }

    pub async fn list_drivers(&self, tenant_id: Uuid) -> Result<Vec<driver::Model>> {
        Ok(driver::Entity::find()
            .filter(driver::Column::TenantId.eq(tenant_id))
            .all(&*self.db)
            .await?)
    }

    pub async fn vehicle_exists(&self, tenant_id: Uuid, vehicle_id: Uuid) -> Result<bool> {
        Ok(vehicle::Entity::find_by_id(vehicle_id)
            .filter(vehicle::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?
            .is_some())
    }

    pub async fn driver_exists(&self, tenant_id: Uuid, driver_id: Uuid) -> Result<bool> {
        Ok(driver::Entity::find_by_id(driver_id)
            .filter(driver::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?
            .is_some())
    }

    pub async fn create_vehicle(
        &self,
        tenant_id: Uuid,
        name: &str,
        vin: Option<&str>,
        license_plate: Option<&str>,
    ) -> Result<vehicle::Model> {
        let now = Utc::now();
        vehicle::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name.to_string()),
            vin: Set(vin.map(str::to_string)),
            license_plate: Set(license_plate.map(str::to_string)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&*self.db)
        .await
        .context("Failed to insert vehicle")
    }

    pub async fn create_driver(
        &self,
        tenant_id: Uuid,
        name: &str,
        license_number: Option<&str>,
        email: Option<&str>,
    ) -> Result<driver::Model> {
        let now = Utc::now();
        driver::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name.to_string()),
            license_number: Set(license_number.map(str::to_string)),
            email: Set(email.map(str::to_string)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&*self.db)
        .await
        .context("Failed to insert driver")
    }
}
