//! Database migrations for the Fleetsync API.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_000001_create_tenants;
mod m2026_01_10_000100_create_connections;
mod m2026_01_10_000200_create_sync_jobs;
mod m2026_01_10_000300_create_entity_mappings;
mod m2026_01_10_000400_create_fleet_assets;
mod m2026_01_10_000500_create_telematics;
mod m2026_01_10_000600_create_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_000001_create_tenants::Migration),
            Box::new(m2026_01_10_000100_create_connections::Migration),
            Box::new(m2026_01_10_000200_create_sync_jobs::Migration),
            Box::new(m2026_01_10_000300_create_entity_mappings::Migration),
            Box::new(m2026_01_10_000400_create_fleet_assets::Migration),
            Box::new(m2026_01_10_000500_create_telematics::Migration),
            Box::new(m2026_01_10_000600_create_notifications::Migration),
        ]
    }
}
