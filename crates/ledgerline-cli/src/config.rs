//! Runtime configuration resolved from flags with environment fallbacks.

use clap::{Args, ValueEnum};
use ledgerline_core::projection::DEFAULT_BATCH_SIZE;
use sqlx::postgres::PgConnectOptions;

use crate::error::AppError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Connection and engine settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Maximum pool connections.
    #[arg(long, env = "LEDGERLINE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Events per replay batch.
    #[arg(long, env = "LEDGERLINE_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Config {
    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the offending setting.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.database_url.trim().is_empty() {
            return Err(AppError::Config("DATABASE_URL must not be empty".into()));
        }
        self.connect_options()?;
        if self.max_connections == 0 {
            return Err(AppError::Config(
                "LEDGERLINE_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AppError::Config(
                "LEDGERLINE_BATCH_SIZE must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The parsed connection string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is not a PostgreSQL URL.
    pub fn connect_options(&self) -> Result<PgConnectOptions, AppError> {
        self.database_url
            .parse::<PgConnectOptions>()
            .map_err(|e| AppError::Config(format!("DATABASE_URL is not a valid PostgreSQL URL: {e}")))
    }

    /// The connection target without credentials, for display.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` does not parse.
    pub fn redacted_database_url(&self) -> Result<String, AppError> {
        let options = self.connect_options()?;
        Ok(format!(
            "postgres://{}@{}:{}/{}",
            options.get_username(),
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or_default()
        ))
    }
}
