//! Sync job entity model
//!
//! Each row records one invocation of a data-type synchronization for a
//! connection. Rows in `running` status also act as the concurrency guard
//! against overlapping syncs.

use super::connection::Entity as Connection;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Sync job entity representing one sync invocation
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier, denormalized for history listings
    pub tenant_id: Uuid,

    /// Connection this job ran against
    pub connection_id: Uuid,

    /// Provider slug, denormalized for history listings
    pub provider_slug: String,

    /// Data type synchronized (vehicles|drivers|hos_logs|...)
    pub sync_type: String,

    /// Job status (running|completed|failed)
    pub status: String,

    /// Provider-side job identifier, when the provider reports one
    pub external_job_id: Option<String>,

    /// Number of records upserted by this job
    pub records_synced: i32,

    /// Failure detail when status is failed
    pub error_message: Option<String>,

    /// When the job started running
    pub started_at: DateTimeWithTimeZone,

    /// When the job reached a terminal status
    pub finished_at: Option<DateTimeWithTimeZone>,

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
