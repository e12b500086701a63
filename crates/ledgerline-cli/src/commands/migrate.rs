//! `ledgerline migrate`.

use ledgerline_event_store::schema::MIGRATOR;
use sqlx::PgPool;

use crate::error::AppError;

/// Applies every pending migration.
///
/// # Errors
///
/// Returns `AppError::Migration` if a migration fails or the applied history
/// diverges from the embedded one.
pub async fn run(pool: &PgPool) -> Result<(), AppError> {
    let known = MIGRATOR.iter().count();
    tracing::info!(migrations = known, "applying migrations");
    MIGRATOR.run(pool).await?;
    println!("Database schema is up to date ({known} migrations).");
    Ok(())
}
