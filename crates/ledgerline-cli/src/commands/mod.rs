//! Command dispatch.

pub mod migrate;
pub mod projections;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::error::AppError;

/// Opens the connection pool described by `config`.
///
/// # Errors
///
/// Returns `AppError::Database` if the database cannot be reached.
pub async fn connect(config: &Config) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(config.connect_options()?)
        .await?;
    tracing::debug!(max_connections = config.max_connections, "connected to database");
    Ok(pool)
}

/// Runs one parsed invocation.
///
/// # Errors
///
/// Returns the first configuration, database or engine error.
pub async fn run(cli: Cli) -> Result<(), AppError> {
    cli.config.validate()?;
    match cli.command {
        Commands::Config => print_config(&cli.config),
        Commands::Migrate => {
            let pool = connect(&cli.config).await?;
            migrate::run(&pool).await
        }
        Commands::Projections(command) => {
            let pool = connect(&cli.config).await?;
            let manager = projections::build_manager(&pool)?;
            projections::run(&manager, &cli.config, command).await
        }
    }
}

fn print_config(config: &Config) -> Result<(), AppError> {
    println!("Ledgerline Configuration");
    println!("========================");
    println!("Database:          {}", config.redacted_database_url()?);
    println!("Max connections:   {}", config.max_connections);
    println!("Replay batch size: {}", config.batch_size);
    println!("Log format:        {:?}", config.log_format);
    Ok(())
}
