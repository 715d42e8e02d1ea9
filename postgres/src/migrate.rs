//! Embedded schema migrations.

use questline_core::store::StoreError;
use sqlx::PgPool;

/// Apply this crate's embedded migrations to the given pool.
///
/// Safe to run on every startup; already-applied migrations are skipped.
///
/// # Errors
///
/// Returns [`StoreError::Database`] when a migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
    tracing::info!("database migrations applied");
    Ok(())
}
