//! Entity mapping model
//!
//! Associates a provider-identified vehicle or driver with an internal
//! record. A mapping with no internal_id is unmatched; a mapping whose
//! internal record was deleted is flagged orphaned rather than removed.

use super::connection::Entity as Connection;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Mapping between an external entity and an internal fleet record
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "entity_mappings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Connection the external entity was discovered through
    pub connection_id: Uuid,

    /// Entity kind (vehicle|driver)
    pub entity_type: String,

    /// Provider-side identifier, unique per (connection, entity_type)
    pub external_id: String,

    /// Provider-side display name, used for name matching
    pub external_name: Option<String>,

    /// Secondary provider identifier (VIN for vehicles, license no. for drivers)
    pub external_ref: Option<String>,

    /// Internal vehicle or driver id once matched
    pub internal_id: Option<Uuid>,

    /// How the match was made (auto|manual)
    pub match_source: Option<String>,

    /// Set when the internal record was deleted out from under the mapping
    pub orphaned: bool,

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
