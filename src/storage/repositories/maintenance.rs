//! Global maintenance-mode switch.

use crate::errors::{MemberAuthError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStatus {
    pub is_enabled: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct MaintenanceRow {
    pub is_enabled: bool,
    pub message: Option<String>,
}

#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    /// Current maintenance flag and message
    async fn status(&self) -> Result<MaintenanceStatus>;

    /// Enable or disable maintenance mode
    async fn set(&self, enabled: bool, message: Option<String>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqlxMaintenanceRepository {
    pool: DbPool,
}

impl SqlxMaintenanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MaintenanceRepository for SqlxMaintenanceRepository {
    #[instrument(skip(self), name = "db_maintenance_status")]
    async fn status(&self) -> Result<MaintenanceStatus> {
        let row = sqlx::query_as::<_, MaintenanceRow>(
            "SELECT is_enabled, message FROM maintenance_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to read maintenance settings".to_string(),
        })?;

        // A missing row means maintenance was never configured
        Ok(row
            .map(|r| MaintenanceStatus { is_enabled: r.is_enabled, message: r.message })
            .unwrap_or_default())
    }

    #[instrument(skip(self, message), name = "db_set_maintenance")]
    async fn set(&self, enabled: bool, message: Option<String>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO maintenance_settings (id, is_enabled, message, updated_at)
            VALUES (1, $1, $2, $3)
            ON CONFLICT(id) DO UPDATE SET
                is_enabled = excluded.is_enabled,
                message = excluded.message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(enabled)
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to update maintenance settings".to_string(),
        })?;

        Ok(())
    }
}
