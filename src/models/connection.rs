//! Connection entity model
//!
//! This module contains the SeaORM entity model for the connections table,
//! which stores tenant-scoped authorizations to external ELD providers.

use super::tenant::Entity as Tenant;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Connection entity representing a tenant's authorization to an ELD provider
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Slug of the ELD provider this connection belongs to
    pub provider_slug: String,

    /// Provider-side account or organization identifier, once known
    pub external_id: Option<String>,

    /// Lifecycle status (pending|active|error|disconnected)
    pub status: String,

    /// Encrypted access token ciphertext
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// Encrypted refresh token ciphertext
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Timestamp of the last successful sync of any data type
    pub last_sync_at: Option<DateTimeWithTimeZone>,

    /// Human-readable description of the most recent failure
    pub last_error: Option<String>,

    /// Timestamp when the connection was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the connection was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Tenant",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJob,
    #[sea_orm(has_many = "super::entity_mapping::Entity")]
    EntityMapping,
}

impl Related<Tenant> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl Related<super::entity_mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EntityMapping.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
