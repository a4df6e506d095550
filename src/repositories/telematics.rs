//! Telematics data repository.
//!
//! Idempotent upserts for the four synced data types, each keyed by its
//! natural key so re-running a sync updates rows in place.

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::models::connection::Model as ConnectionModel;
use crate::models::{fault_code, hos_log, ifta_mileage, vehicle_location};
use crate::providers::{FaultRecord, HosLogRecord, IftaRecord, LocationRecord};

/// Outcome of a fault upsert; newly inserted faults are candidates for
/// alerting, updated ones are not.
#[derive(Debug, Clone)]
pub struct FaultUpsert {
    pub model: fault_code::Model,
    pub newly_inserted: bool,
}

/// Repository for synced telematics rows.
#[derive(Debug, Clone)]
pub struct TelematicsRepository {
    pub db: Arc<DatabaseConnection>,
}

impl TelematicsRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert a daily HOS log keyed by (connection, driver, date).
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn upsert_hos_log(
        &self,
        connection: &ConnectionModel,
        record: &HosLogRecord,
        driver_id: Option<Uuid>,
    ) -> Result<hos_log::Model> {
        let violations = if record.violations.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&record.violations)?)
        };

        let existing = hos_log::Entity::find()
            .filter(hos_log::Column::ConnectionId.eq(connection.id))
            .filter(hos_log::Column::ExternalDriverId.eq(&record.external_driver_id))
            .filter(hos_log::Column::LogDate.eq(&record.log_date))
            .one(&*self.db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(log) => {
                let mut active: hos_log::ActiveModel = log.into();
                active.driver_id = Set(driver_id);
                active.duty_status = Set(record.duty_status.clone());
                active.drive_time_secs = Set(record.drive_time_secs);
                active.on_duty_time_secs = Set(record.on_duty_time_secs);
                active.violations = Set(violations);
                active.updated_at = Set(now.into());
                active.update(&*self.db).await.context("Failed to update HOS log")
            }
            None => hos_log::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(connection.tenant_id),
                connection_id: Set(connection.id),
                external_driver_id: Set(record.external_driver_id.clone()),
                driver_id: Set(driver_id),
                log_date: Set(record.log_date.clone()),
                duty_status: Set(record.duty_status.clone()),
                drive_time_secs: Set(record.drive_time_secs),
                on_duty_time_secs: Set(record.on_duty_time_secs),
                violations: Set(violations),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
            .insert(&*self.db)
            .await
            .context("Failed to insert HOS log"),
        }
    }

    /// Upsert a GPS fix keyed by (connection, vehicle, recorded_at).
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn upsert_location(
        &self,
        connection: &ConnectionModel,
        record: &LocationRecord,
        vehicle_id: Option<Uuid>,
    ) -> Result<vehicle_location::Model> {
        let existing = vehicle_location::Entity::find()
            .filter(vehicle_location::Column::ConnectionId.eq(connection.id))
            .filter(vehicle_location::Column::ExternalVehicleId.eq(&record.external_vehicle_id))
            .filter(vehicle_location::Column::RecordedAt.eq(record.recorded_at))
            .one(&*self.db)
            .await?;

        match existing {
            Some(location) => {
                let mut active: vehicle_location::ActiveModel = location.into();
                active.vehicle_id = Set(vehicle_id);
                active.latitude = Set(record.latitude);
                active.longitude = Set(record.longitude);
                active.speed_mph = Set(record.speed_mph);
                active.heading = Set(record.heading);
                active
                    .update(&*self.db)
                    .await
                    .context("Failed to update vehicle location")
            }
            None => vehicle_location::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(connection.tenant_id),
                connection_id: Set(connection.id),
                external_vehicle_id: Set(record.external_vehicle_id.clone()),
                vehicle_id: Set(vehicle_id),
                latitude: Set(record.latitude),
                longitude: Set(record.longitude),
                speed_mph: Set(record.speed_mph),
                heading: Set(record.heading),
                recorded_at: Set(record.recorded_at.into()),
                created_at: Set(Utc::now().into()),
            }
            .insert(&*self.db)
            .await
            .context("Failed to insert vehicle location"),
        }
    }

    /// Upsert a fault keyed by (connection, external_fault_id), reporting
    /// whether the row is new. notified_at is never modified here.
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn upsert_fault(
        &self,
        connection: &ConnectionModel,
        record: &FaultRecord,
        vehicle_id: Option<Uuid>,
    ) -> Result<FaultUpsert> {
        let existing = fault_code::Entity::find()
            .filter(fault_code::Column::ConnectionId.eq(connection.id))
            .filter(fault_code::Column::ExternalFaultId.eq(&record.external_fault_id))
            .one(&*self.db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(fault) => {
                let mut active: fault_code::ActiveModel = fault.into();
                active.external_vehicle_id = Set(record.external_vehicle_id.clone());
                active.vehicle_id = Set(vehicle_id);
                active.code = Set(record.code.clone());
                active.description = Set(record.description.clone());
                active.severity = Set(record.severity.clone());
                active.active = Set(record.active);
                active.occurred_at = Set(record.occurred_at.map(Into::into));
                active.updated_at = Set(now.into());
                let model = active
                    .update(&*self.db)
                    .await
                    .context("Failed to update fault code")?;
                Ok(FaultUpsert {
                    model,
                    newly_inserted: false,
                })
            }
            None => {
                let model = fault_code::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    tenant_id: Set(connection.tenant_id),
                    connection_id: Set(connection.id),
                    external_fault_id: Set(record.external_fault_id.clone()),
                    external_vehicle_id: Set(record.external_vehicle_id.clone()),
                    vehicle_id: Set(vehicle_id),
                    code: Set(record.code.clone()),
                    description: Set(record.description.clone()),
                    severity: Set(record.severity.clone()),
                    active: Set(record.active),
                    occurred_at: Set(record.occurred_at.map(Into::into)),
                    notified_at: Set(None),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                }
                .insert(&*self.db)
                .await
                .context("Failed to insert fault code")?;
                Ok(FaultUpsert {
                    model,
                    newly_inserted: true,
                })
            }
        }
    }

    /// Permanently record that an alert was produced for a fault.
    #[instrument(skip(self))]
    pub async fn mark_fault_notified(&self, fault_id: Uuid) -> Result<()> {
        let Some(fault) = fault_code::Entity::find_by_id(fault_id).one(&*self.db).await? else {
            return Ok(());
        };
        let now = Utc::now();
        let mut active: fault_code::ActiveModel = fault.into();
        active.notified_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Upsert a monthly IFTA entry keyed by (connection, vehicle,
    /// jurisdiction, month).
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn upsert_ifta(
        &self,
        connection: &ConnectionModel,
        record: &IftaRecord,
        vehicle_id: Option<Uuid>,
    ) -> Result<ifta_mileage::Model> {
        let existing = ifta_mileage::Entity::find()
            .filter(ifta_mileage::Column::ConnectionId.eq(connection.id))
            .filter(ifta_mileage::Column::ExternalVehicleId.eq(&record.external_vehicle_id))
            .filter(ifta_mileage::Column::Jurisdiction.eq(&record.jurisdiction))
            .filter(ifta_mileage::Column::PeriodMonth.eq(&record.period_month))
            .one(&*self.db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(entry) => {
                let mut active: ifta_mileage::ActiveModel = entry.into();
                active.vehicle_id = Set(vehicle_id);
                active.miles = Set(record.miles);
                active.updated_at = Set(now.into());
                active
                    .update(&*self.db)
                    .await
                    .context("Failed to update IFTA mileage")
            }
            None => ifta_mileage::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(connection.tenant_id),
                connection_id: Set(connection.id),
                external_vehicle_id: Set(record.external_vehicle_id.clone()),
                vehicle_id: Set(vehicle_id),
                jurisdiction: Set(record.jurisdiction.clone()),
                period_month: Set(record.period_month.clone()),
                miles: Set(record.miles),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
            .insert(&*self.db)
            .await
            .context("Failed to insert IFTA mileage"),
        }
    }
}
