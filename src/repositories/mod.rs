//! Repository layer wrapping SeaORM queries.
//!
//! Each repository owns the queries for one aggregate. Handlers and the
//! sync engine go through these instead of touching entities directly.

pub mod connection;
pub mod entity_mapping;
pub mod fleet;
pub mod notification;
pub mod sync_job;
pub mod telematics;
pub mod tenant;

pub use connection::ConnectionRepository;
pub use entity_mapping::{EntityMappingRepository, MatchSource};
pub use fleet::FleetRepository;
pub use notification::NotificationRepository;
pub use sync_job::{ClaimOutcome, SyncJobRepository};
pub use telematics::TelematicsRepository;
pub use tenant::TenantRepository;
