//! Hours-of-service log entity model.

use super::connection::Entity as Connection;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Daily hours-of-service summary for one driver.
///
/// Upsert key is (connection_id, external_driver_id, log_date).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "hos_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub connection_id: Uuid,

    /// Provider-side driver identifier
    pub external_driver_id: String,

    /// Matched internal driver, when a mapping exists
    pub driver_id: Option<Uuid>,

    /// Calendar date of the log in YYYY-MM-DD form
    pub log_date: String,

    /// Current duty status (driving|on_duty|off_duty|sleeper)
    pub duty_status: String,

    pub drive_time_secs: i64,

    pub on_duty_time_secs: i64,

    /// Violations reported by the provider for this day, as a JSON array
    #[sea_orm(column_type = "JsonBinary")]
    pub violations: Option<JsonValue>,

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
