//! Session records.

use crate::domain::{InvalidationReason, MemberId, Session, SessionId};
use crate::errors::{MemberAuthError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct SessionRow {
    pub id: String,
    pub member_id: String,
    pub external_ref: Option<String>,
    pub established_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub invalidation_reason: Option<String>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: SessionId::from_string(row.id),
            member_id: MemberId::from_string(row.member_id),
            external_ref: row.external_ref,
            established_at: row.established_at,
            last_activity: row.last_activity,
            active: row.active,
            invalidated_at: row.invalidated_at,
            invalidation_reason: row
                .invalidation_reason
                .as_deref()
                .and_then(InvalidationReason::parse),
        }
    }
}

const SESSION_COLUMNS: &str = "id, member_id, external_ref, established_at, last_activity, active, \
     invalidated_at, invalidation_reason";

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new active session
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Get a session by ID
    async fn get(&self, id: &SessionId) -> Result<Option<Session>>;

    /// All sessions of a member, newest first
    async fn list_for_member(&self, member_id: &MemberId) -> Result<Vec<Session>>;

    /// Mark one session inactive. Returns false when it was already inactive or unknown.
    async fn deactivate(
        &self,
        id: &SessionId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark every active session of a member inactive, optionally sparing one.
    /// Returns the sessions that were active before the call.
    async fn deactivate_for_member(
        &self,
        member_id: &MemberId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
        except: Option<&SessionId>,
    ) -> Result<Vec<Session>>;

    /// Record activity on an active session
    async fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqlxSessionRepository {
    pool: DbPool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    #[instrument(
        skip(self, session),
        fields(session_id = %session.id, member_id = %session.member_id),
        name = "db_insert_session"
    )]
    async fn insert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, member_id, external_ref, established_at, last_activity, active,
                 invalidated_at, invalidation_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.member_id.as_str())
        .bind(&session.external_ref)
        .bind(session.established_at)
        .bind(session.last_activity)
        .bind(session.active)
        .bind(session.invalidated_at)
        .bind(session.invalidation_reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to create session".to_string(),
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %id), name = "db_get_session")]
    async fn get(&self, id: &SessionId) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS);
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| MemberAuthError::Database {
                source: err,
                context: "Failed to fetch session".to_string(),
            })?;

        Ok(row.map(Session::from))
    }

    #[instrument(skip(self), fields(member_id = %member_id), name = "db_list_sessions")]
    async fn list_for_member(&self, member_id: &MemberId) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE member_id = $1 ORDER BY established_at DESC",
            SESSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(member_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|err| MemberAuthError::Database {
                source: err,
                context: "Failed to list sessions".to_string(),
            })?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    #[instrument(
        skip(self),
        fields(session_id = %id, reason = %reason),
        name = "db_deactivate_session"
    )]
    async fn deactivate(
        &self,
        id: &SessionId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET active = 0, invalidated_at = $1, invalidation_reason = $2
            WHERE id = $3 AND active = 1
            "#,
        )
        .bind(at)
        .bind(reason.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to invalidate session".to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(
        skip(self, except),
        fields(member_id = %member_id, reason = %reason),
        name = "db_deactivate_member_sessions"
    )]
    async fn deactivate_for_member(
        &self,
        member_id: &MemberId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
        except: Option<&SessionId>,
    ) -> Result<Vec<Session>> {
        let keep = except.map(|id| id.as_str().to_string()).unwrap_or_default();

        let mut tx = self.pool.begin().await.map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to begin session transaction".to_string(),
        })?;

        let sql = format!(
            "SELECT {} FROM sessions WHERE member_id = $1 AND active = 1 AND id != $2",
            SESSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(member_id.as_str())
            .bind(&keep)
            .fetch_all(&mut *tx)
            .await
            .map_err(|err| MemberAuthError::Database {
                source: err,
                context: "Failed to list active sessions".to_string(),
            })?;

        sqlx::query(
            r#"
            UPDATE sessions
            SET active = 0, invalidated_at = $1, invalidation_reason = $2
            WHERE member_id = $3 AND active = 1 AND id != $4
            "#,
        )
        .bind(at)
        .bind(reason.as_str())
        .bind(member_id.as_str())
        .bind(&keep)
        .execute(&mut *tx)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to invalidate member sessions".to_string(),
        })?;

        tx.commit().await.map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to commit session invalidation".to_string(),
        })?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    #[instrument(skip(self), fields(session_id = %id), name = "db_touch_session")]
    async fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_activity = $1 WHERE id = $2 AND active = 1")
            .bind(at)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|err| MemberAuthError::Database {
                source: err,
                context: "Failed to update session activity".to_string(),
            })?;

        Ok(())
    }
}
