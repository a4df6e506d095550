//! IFTA mileage entity model.

use super::connection::Entity as Connection;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Monthly per-jurisdiction mileage summary for one vehicle.
///
/// Upsert key is (connection_id, external_vehicle_id, jurisdiction,
/// period_month).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ifta_mileage")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub connection_id: Uuid,

    pub external_vehicle_id: String,

    /// Matched internal vehicle, when a mapping exists
    pub vehicle_id: Option<Uuid>,

    /// Two-letter jurisdiction code (state or province)
    pub jurisdiction: String,

    /// Reporting month in YYYY-MM form
    pub period_month: String,

    pub miles: f64,

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
