//! Fault code entity model.

use super::connection::Entity as Connection;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Diagnostic fault code reported for a vehicle.
///
/// Upsert key is (connection_id, external_fault_id). notified_at records
/// whether an alert was already produced for this fault, so re-syncing the
/// same fault never re-notifies.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "fault_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub connection_id: Uuid,

    /// Provider-side fault identifier
    pub external_fault_id: String,

    pub external_vehicle_id: String,

    /// Matched internal vehicle, when a mapping exists
    pub vehicle_id: Option<Uuid>,

    /// Diagnostic code (e.g. SPN/FMI or OBD-II)
    pub code: String,

    pub description: Option<String>,

    pub severity: Option<String>,

    /// Whether the provider still reports this fault as active
    pub active: bool,

    pub occurred_at: Option<DateTimeWithTimeZone>,

    /// Set once an alert notification has been produced for this fault
    pub notified_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Connection",
        from = "Column::ConnectionId",
        to = "super::connection::Column::Id"
    )]
    Connection,
}

impl Related<Connection> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
