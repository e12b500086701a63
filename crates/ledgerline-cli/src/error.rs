//! Ledgerline CLI error types.

use ledgerline_core::error::DomainError;
use thiserror::Error;

/// Errors that end a CLI invocation.
#[derive(Debug, Error)]
pub enum AppError {
    /// A setting is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration could not be applied.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An engine operation failed.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl AppError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Database(_)
            | Self::Migration(_)
            | Self::Domain(DomainError::StorageUnavailable(_)) => 3,
            Self::Domain(DomainError::ReplayBatchFailure { .. }) => 4,
            Self::Domain(_) => 1,
        }
    }
}
