//! Migration to create the sync_jobs table.
//!
//! Sync jobs record one invocation of a data-type synchronization for a
//! connection, and back the 5-minute running-job concurrency guard.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::TenantId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobs::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobs::ProviderSlug).text().not_null())
                    .col(ColumnDef::new(SyncJobs::SyncType).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(ColumnDef::new(SyncJobs::ExternalJobId).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::RecordsSynced)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_jobs_connection_id")
                            .from(SyncJobs::Table, SyncJobs::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Serves both the concurrency guard lookup and history listings.
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_connection_type_status")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::ConnectionId)
                    .col(SyncJobs::SyncType)
                    .col(SyncJobs::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_tenant_created")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::TenantId)
                    .col(SyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_jobs_connection_type_status")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_sync_jobs_tenant_created").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    TenantId,
    ConnectionId,
    ProviderSlug,
    SyncType,
    Status,
    ExternalJobId,
    RecordsSynced,
    ErrorMessage,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
}
