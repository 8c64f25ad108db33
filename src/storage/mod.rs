//! # Storage and Persistence
//!
//! SQLite connectivity, embedded migrations and the repositories backing the
//! member authentication core.

pub mod pool;
pub mod repositories;

pub use crate::config::DatabaseConfig;

pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{
    LockoutStore, MaintenanceRepository, MaintenanceStatus, MemberRepository,
    ResetTokenRepository, SessionRepository, SqlxMaintenanceRepository, SqlxMemberRepository,
    SqlxResetTokenRepository, SqlxSessionRepository, VersionedLockout,
};

use crate::errors::{MemberAuthError, Result};
use tracing::Instrument;

/// Apply the embedded migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .instrument(crate::db_span!("run_migrations"))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Database migration failed");
            MemberAuthError::from(e)
        })?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| MemberAuthError::Database {
        source: e,
        context: "Database connectivity check failed".to_string(),
    })?;

    Ok(())
}
