//! Notification entity model.

use super::tenant::Entity as Tenant;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Durable notification produced as a sync side effect.
///
/// The (tenant_id, kind, entity_ref, created_at) tuple backs the dedup
/// window check.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Notification kind (hos_violation_occurred|vehicle_fault_code|...)
    pub kind: String,

    /// Stable reference to the subject entity, used for dedup
    pub entity_ref: String,

    pub title: String,

    pub body: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Tenant",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
}

impl Related<Tenant> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
