//! Command-line interface definition.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

use crate::config::Config;

/// Ledgerline operator tool.
#[derive(Debug, Parser)]
#[command(
    name = "ledgerline",
    version,
    about = "Operate a Ledgerline event store",
    long_about = "Applies schema migrations and maintains the read models \
                  projected from the event log: replay, reset and status."
)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Read model maintenance
    #[command(subcommand)]
    Projections(ProjectionCommands),

    /// Show the resolved configuration
    Config,
}

/// Projection subcommands.
#[derive(Debug, Subcommand)]
pub enum ProjectionCommands {
    /// Rebuild read models from the event log
    Replay {
        #[command(flatten)]
        target: Target,

        /// Only replay events that occurred on or after this date
        /// (YYYY-MM-DD or RFC 3339); keeps existing rows
        #[arg(long, value_parser = parse_date)]
        from_date: Option<DateTime<Utc>>,

        /// Resume one named projection after this global position, as
        /// reported by a failed batch
        #[arg(long, default_value_t = 0, conflicts_with = "all")]
        after_position: i64,

        /// Empty the read model first even with --from-date or --after-position
        #[arg(long)]
        reset_first: bool,

        /// Events per batch; overrides LEDGERLINE_BATCH_SIZE
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Empty read models
    Reset {
        #[command(flatten)]
        target: Target,
    },

    /// Show row counts and last update per read model
    Status,
}

/// One named projection, or all of them.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Projection name
    pub name: Option<String>,

    /// Every registered projection
    #[arg(long)]
    pub all: bool,
}

/// Parses `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
///
/// # Errors
///
/// Returns a message clap shows next to the flag.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| format!("'{value}' is neither YYYY-MM-DD nor an RFC 3339 timestamp"))
}
