//! Notification side effects.
//!
//! Sync and webhook paths emit durable notification rows through
//! [`Notifier`]. Dedup policy lives here: HOS violations are suppressed
//! within a rolling window per daily log, fault alerts are sent at most
//! once ever (enforced by `fault_codes.notified_at`, not a window).

use anyhow::Result;
use chrono::Duration;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{fault_code, hos_log};
use crate::repositories::{NotificationRepository, TelematicsRepository};
use crate::types::NotificationKind;

/// Emits deduplicated notification rows.
#[derive(Debug, Clone)]
pub struct Notifier {
    notifications: NotificationRepository,
    telematics: TelematicsRepository,
    /// Rolling dedup window for HOS violation notifications
    hos_dedup: Duration,
}

impl Notifier {
    pub fn new(db: Arc<DatabaseConnection>, hos_dedup_hours: i64) -> Self {
        Self {
            notifications: NotificationRepository::new(db.clone()),
            telematics: TelematicsRepository::new(db),
            hos_dedup: Duration::hours(hos_dedup_hours),
        }
    }

    /// Emit a notification for a daily log carrying violations. Returns
    /// whether a row was written; a duplicate inside the window is a no-op.
    #[instrument(skip(self, log), fields(log_id = %log.id))]
    pub async fn hos_violation(&self, log: &hos_log::Model) -> Result<bool> {
        let entity_ref = format!("hos_log:{}", log.id);
        if self
            .notifications
            .exists_within(
                log.tenant_id,
                NotificationKind::HosViolationOccurred,
                &entity_ref,
                self.hos_dedup,
            )
            .await?
        {
            debug!(%entity_ref, "HOS violation already notified inside dedup window");
            return Ok(false);
        }

        let violation_count = log
            .violations
            .as_ref()
            .and_then(|v| v.as_array().map(Vec::len))
            .unwrap_or(0);
        self.notifications
            .insert(
                log.tenant_id,
                NotificationKind::HosViolationOccurred,
                &entity_ref,
                "Hours-of-service violation",
                Some(&format!(
                    "Driver {} has {} violation(s) on {}",
                    log.external_driver_id, violation_count, log.log_date
                )),
            )
            .await?;
        Ok(true)
    }

    /// Emit an alert for a newly seen, still-active critical or high
    /// severity fault. Returns whether a row was written; faults already
    /// notified are skipped permanently, resolved faults never alert.
    #[instrument(skip(self, fault), fields(fault_id = %fault.id))]
    pub async fn fault_alert(&self, fault: &fault_code::Model) -> Result<bool> {
        if fault.notified_at.is_some() {
            return Ok(false);
        }
        if !fault.active {
            return Ok(false);
        }
        if !is_alertable_severity(fault.severity.as_deref()) {
            return Ok(false);
        }

        let entity_ref = format!("fault:{}", fault.id);
        self.notifications
            .insert(
                fault.tenant_id,
                NotificationKind::VehicleFaultCode,
                &entity_ref,
                "Vehicle fault code detected",
                Some(&format!(
                    "Fault {} on vehicle {}: {}",
                    fault.code,
                    fault.external_vehicle_id,
                    fault.description.as_deref().unwrap_or("no description")
                )),
            )
            .await?;
        self.telematics.mark_fault_notified(fault.id).await?;
        Ok(true)
    }

    /// Emit a lifecycle notification (sync completed/failed, connection
    /// disconnected). No dedup window; these are one row per event.
    #[instrument(skip(self, title, body))]
    pub async fn lifecycle(
        &self,
        tenant_id: Uuid,
        kind: NotificationKind,
        entity_ref: &str,
        title: &str,
        body: Option<&str>,
    ) -> Result<()> {
        self.notifications
            .insert(tenant_id, kind, entity_ref, title, body)
            .await?;
        Ok(())
    }
}

/// Only critical and high severity faults page anyone.
fn is_alertable_severity(severity: Option<&str>) -> bool {
    matches!(severity, Some("critical") | Some("high"))
}
