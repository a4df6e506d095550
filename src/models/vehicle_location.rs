//! Vehicle location entity model.

use super::connection::Entity as Connection;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// GPS breadcrumb for one vehicle.
///
/// Upsert key is (connection_id, external_vehicle_id, recorded_at).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "vehicle_locations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub connection_id: Uuid,

    pub external_vehicle_id: String,

    /// Matched internal vehicle, when a mapping exists
    pub vehicle_id: Option<Uuid>,

    pub latitude: f64,

    pub longitude: f64,

    pub speed_mph: Option<f64>,

    pub heading: Option<f64>,

    /// Provider-reported fix timestamp
    pub recorded_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
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
