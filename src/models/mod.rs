//! SeaORM entity models for the Fleetsync database schema.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;
pub mod driver;
pub mod entity_mapping;
pub mod fault_code;
pub mod hos_log;
pub mod ifta_mileage;
pub mod notification;
pub mod sync_job;
pub mod tenant;
pub mod vehicle;
pub mod vehicle_location;

/// Basic service information returned by the root endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "fleetsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
