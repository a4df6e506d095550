//! Migration to create the entity_mappings table.
//!
//! Entity mappings associate a vendor-identified vehicle or driver with an
//! internally-owned record. Mappings outlive the internal record (orphaned
//! flag) so sync history stays intact.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EntityMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EntityMappings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EntityMappings::TenantId).uuid().not_null())
                    .col(
                        ColumnDef::new(EntityMappings::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(EntityMappings::EntityType).text().not_null())
                    .col(ColumnDef::new(EntityMappings::ExternalId).text().not_null())
                    .col(ColumnDef::new(EntityMappings::ExternalName).text().null())
                    .col(ColumnDef::new(EntityMappings::ExternalRef).text().null())
                    .col(ColumnDef::new(EntityMappings::InternalId).uuid().null())
                    .col(ColumnDef::new(EntityMappings::MatchSource).text().null())
                    .col(
                        ColumnDef::new(EntityMappings::Orphaned)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(EntityMappings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EntityMappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_entity_mappings_connection_id")
                            .from(EntityMappings::Table, EntityMappings::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entity_mappings_connection_type_external")
                    .table(EntityMappings::Table)
                    .col(EntityMappings::ConnectionId)
                    .col(EntityMappings::EntityType)
                    .col(EntityMappings::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_entity_mappings_connection_type_external")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(EntityMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EntityMappings {
    Table,
    Id,
    TenantId,
    ConnectionId,
    EntityType,
    ExternalId,
    ExternalName,
    ExternalRef,
    InternalId,
    MatchSource,
    Orphaned,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
}
