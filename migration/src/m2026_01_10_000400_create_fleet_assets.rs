//! Migration to create the vehicles and drivers tables.
//!
//! These are the internally-owned fleet records that entity mappings point
//! at. Vehicles and drivers can exist without any provider connection.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vehicles::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Vehicles::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Vehicles::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Vehicles::Name).text().not_null())
                    .col(ColumnDef::new(Vehicles::Vin).text().null())
                    .col(ColumnDef::new(Vehicles::LicensePlate).text().null())
                    .col(
                        ColumnDef::new(Vehicles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Vehicles::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vehicles_tenant_id")
                            .from(Vehicles::Table, Vehicles::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_vehicles_tenant")
                    .table(Vehicles::Table)
                    .col(Vehicles::TenantId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Drivers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Drivers::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Drivers::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Drivers::Name).text().not_null())
                    .col(ColumnDef::new(Drivers::LicenseNumber).text().null())
                    .col(ColumnDef::new(Drivers::Email).text().null())
                    .col(
                        ColumnDef::new(Drivers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Drivers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_drivers_tenant_id")
                            .from(Drivers::Table, Drivers::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_drivers_tenant")
                    .table(Drivers::Table)
                    .col(Drivers::TenantId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_drivers_tenant").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Drivers::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_vehicles_tenant").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Vehicles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Vehicles {
    Table,
    Id,
    TenantId,
    Name,
    Vin,
    LicensePlate,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Drivers {
    Table,
    Id,
    TenantId,
    Name,
    LicenseNumber,
    Email,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
