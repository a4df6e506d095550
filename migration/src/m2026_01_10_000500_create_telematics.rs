//! Migration to create the telematics data tables.
//!
//! Covers hours-of-service logs, vehicle locations, fault codes, and IFTA
//! mileage summaries. Each table carries a unique index on its natural key
//! so repeated syncs upsert instead of duplicating rows.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(HosLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(HosLogs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(HosLogs::TenantId).uuid().not_null())
                    .col(ColumnDef::new(HosLogs::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(HosLogs::ExternalDriverId).text().not_null())
                    .col(ColumnDef::new(HosLogs::DriverId).uuid().null())
                    .col(ColumnDef::new(HosLogs::LogDate).text().not_null())
                    .col(ColumnDef::new(HosLogs::DutyStatus).text().not_null())
                    .col(
                        ColumnDef::new(HosLogs::DriveTimeSecs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(HosLogs::OnDutyTimeSecs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(HosLogs::Violations).json_binary().null())
                    .col(
                        ColumnDef::new(HosLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(HosLogs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_hos_logs_connection_id")
                            .from(HosLogs::Table, HosLogs::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_hos_logs_connection_driver_date")
                    .table(HosLogs::Table)
                    .col(HosLogs::ConnectionId)
                    .col(HosLogs::ExternalDriverId)
                    .col(HosLogs::LogDate)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(VehicleLocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VehicleLocations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VehicleLocations::TenantId).uuid().not_null())
                    .col(
                        ColumnDef::new(VehicleLocations::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VehicleLocations::ExternalVehicleId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(VehicleLocations::VehicleId).uuid().null())
                    .col(ColumnDef::new(VehicleLocations::Latitude).double().not_null())
                    .col(
                        ColumnDef::new(VehicleLocations::Longitude)
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(VehicleLocations::SpeedMph).double().null())
                    .col(ColumnDef::new(VehicleLocations::Heading).double().null())
                    .col(
                        ColumnDef::new(VehicleLocations::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VehicleLocations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vehicle_locations_connection_id")
                            .from(VehicleLocations::Table, VehicleLocations::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_vehicle_locations_connection_vehicle_time")
                    .table(VehicleLocations::Table)
                    .col(VehicleLocations::ConnectionId)
                    .col(VehicleLocations::ExternalVehicleId)
                    .col(VehicleLocations::RecordedAt)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FaultCodes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FaultCodes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FaultCodes::TenantId).uuid().not_null())
                    .col(ColumnDef::new(FaultCodes::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(FaultCodes::ExternalFaultId).text().not_null())
                    .col(
                        ColumnDef::new(FaultCodes::ExternalVehicleId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FaultCodes::VehicleId).uuid().null())
                    .col(ColumnDef::new(FaultCodes::Code).text().not_null())
                    .col(ColumnDef::new(FaultCodes::Description).text().null())
                    .col(ColumnDef::new(FaultCodes::Severity).text().null())
                    .col(
                        ColumnDef::new(FaultCodes::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(FaultCodes::OccurredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FaultCodes::NotifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FaultCodes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(FaultCodes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_fault_codes_connection_id")
                            .from(FaultCodes::Table, FaultCodes::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_fault_codes_connection_external")
                    .table(FaultCodes::Table)
                    .col(FaultCodes::ConnectionId)
                    .col(FaultCodes::ExternalFaultId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(IftaMileage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IftaMileage::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(IftaMileage::TenantId).uuid().not_null())
                    .col(ColumnDef::new(IftaMileage::ConnectionId).uuid().not_null())
                    .col(
                        ColumnDef::new(IftaMileage::ExternalVehicleId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IftaMileage::VehicleId).uuid().null())
                    .col(ColumnDef::new(IftaMileage::Jurisdiction).text().not_null())
                    .col(ColumnDef::new(IftaMileage::PeriodMonth).text().not_null())
                    .col(
                        ColumnDef::new(IftaMileage::Miles)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(IftaMileage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(IftaMileage::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ifta_mileage_connection_id")
                            .from(IftaMileage::Table, IftaMileage::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ifta_mileage_connection_vehicle_period")
                    .table(IftaMileage::Table)
                    .col(IftaMileage::ConnectionId)
                    .col(IftaMileage::ExternalVehicleId)
                    .col(IftaMileage::Jurisdiction)
                    .col(IftaMileage::PeriodMonth)
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
                    .name("idx_ifta_mileage_connection_vehicle_period")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(IftaMileage::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_fault_codes_connection_external")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(FaultCodes::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_vehicle_locations_connection_vehicle_time")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(VehicleLocations::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_hos_logs_connection_driver_date")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(HosLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum HosLogs {
    Table,
    Id,
    TenantId,
    ConnectionId,
    ExternalDriverId,
    DriverId,
    LogDate,
    DutyStatus,
    DriveTimeSecs,
    OnDutyTimeSecs,
    Violations,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum VehicleLocations {
    Table,
    Id,
    TenantId,
    ConnectionId,
    ExternalVehicleId,
    VehicleId,
    Latitude,
    Longitude,
    SpeedMph,
    Heading,
    RecordedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum FaultCodes {
    Table,
    Id,
    TenantId,
    ConnectionId,
    ExternalFaultId,
    ExternalVehicleId,
    VehicleId,
    Code,
    Description,
    Severity,
    Active,
    OccurredAt,
    NotifiedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum IftaMileage {
    Table,
    Id,
    TenantId,
    ConnectionId,
    ExternalVehicleId,
    VehicleId,
    Jurisdiction,
    PeriodMonth,
    Miles,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
}
