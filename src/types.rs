//! Closed domain enums shared across the service.
//!
//! These are stored as text in the database but parsed into enums at the
//! boundary so matches stay exhaustive.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Data types a sync can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Vehicles,
    Drivers,
    HosLogs,
    VehicleLocations,
    FaultCodes,
    IftaMileage,
}

impl SyncType {
    pub const ALL: [SyncType; 6] = [
        SyncType::Vehicles,
        SyncType::Drivers,
        SyncType::HosLogs,
        SyncType::VehicleLocations,
        SyncType::FaultCodes,
        SyncType::IftaMileage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Vehicles => "vehicles",
            SyncType::Drivers => "drivers",
            SyncType::HosLogs => "hos_logs",
            SyncType::VehicleLocations => "vehicle_locations",
            SyncType::FaultCodes => "fault_codes",
            SyncType::IftaMileage => "ifta_mileage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "vehicles" => Some(SyncType::Vehicles),
            "drivers" => Some(SyncType::Drivers),
            "hos_logs" => Some(SyncType::HosLogs),
            "vehicle_locations" => Some(SyncType::VehicleLocations),
            "fault_codes" => Some(SyncType::FaultCodes),
            "ifta_mileage" => Some(SyncType::IftaMileage),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Error,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ConnectionStatus::Pending),
            "active" => Some(ConnectionStatus::Active),
            "error" => Some(ConnectionStatus::Error),
            "disconnected" => Some(ConnectionStatus::Disconnected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync job terminal and in-flight states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapped entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Vehicle,
    Driver,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Vehicle => "vehicle",
            EntityType::Driver => "driver",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "vehicle" => Some(EntityType::Vehicle),
            "driver" => Some(EntityType::Driver),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification kinds produced by sync side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    HosViolationOccurred,
    VehicleFaultCode,
    SyncCompleted,
    SyncFailed,
    ConnectionDisconnected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::HosViolationOccurred => "hos_violation_occurred",
            NotificationKind::VehicleFaultCode => "vehicle_fault_code",
            NotificationKind::SyncCompleted => "sync_completed",
            NotificationKind::SyncFailed => "sync_failed",
            NotificationKind::ConnectionDisconnected => "connection_disconnected",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
