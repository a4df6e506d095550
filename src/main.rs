//! # Fleetsync API Main Entry Point

use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};

use fleetsync::{config::ConfigLoader, db, server::run_server, telemetry};

#[derive(Parser)]
#[command(name = "fleetsync", about = "ELD provider integration service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations and start the API server (default)
    Serve,
    /// Run pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let pool = db::init_pool(&config).await?;
    Migrator::up(&pool, None).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Serve => run_server(config, pool).await,
    }
}
