//! Member identity repository and the lockout counter store.
//!
//! Both live on the `members` table. Lockout writes go through a version
//! compare-and-swap so concurrent writers never lose an increment.

use crate::domain::{LockoutState, MemberId, MemberIdentity, MemberNumber, MemberStatus, NewMember};
use crate::errors::{MemberAuthError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::instrument;

const MEMBER_COLUMNS: &str = "id, member_number, status, verified, failed_attempts, locked_until, \
     password_reset_required, auth_identity, password_changed_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct MemberRow {
    pub id: String,
    pub member_number: String,
    pub status: String,
    pub verified: bool,
    pub failed_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub password_reset_required: bool,
    pub auth_identity: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct LockoutRow {
    pub failed_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub lockout_version: i64,
}

/// Lockout state together with the version it was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedLockout {
    pub state: LockoutState,
    pub version: i64,
}

#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Register a member identity
    async fn create(&self, member: NewMember) -> Result<MemberIdentity>;

    /// Get a member by ID regardless of status
    async fn get(&self, id: &MemberId) -> Result<Option<MemberIdentity>>;

    /// Look up an active member by member number
    async fn find_active_by_number(&self, number: &MemberNumber) -> Result<Option<MemberIdentity>>;

    /// Look up a member by member number regardless of status
    async fn find_by_number(&self, number: &MemberNumber) -> Result<Option<MemberIdentity>>;

    /// Set or clear the forced password reset flag
    async fn set_password_reset_required(&self, id: &MemberId, required: bool) -> Result<()>;

    /// Record a completed password change; clears the forced reset flag
    async fn mark_password_changed(&self, id: &MemberId, at: DateTime<Utc>) -> Result<()>;

    /// Change account status
    async fn set_status(&self, id: &MemberId, status: MemberStatus) -> Result<()>;
}

#[async_trait]
pub trait LockoutStore: Send + Sync {
    /// Current counter and version, `None` for unknown members
    async fn load(&self, id: &MemberId) -> Result<Option<VersionedLockout>>;

    /// Write `next` only if the stored version still equals `expected_version`.
    /// Returns whether the write happened.
    async fn compare_and_set(
        &self,
        id: &MemberId,
        expected_version: i64,
        next: LockoutState,
    ) -> Result<bool>;

    /// Unconditionally reset to zero failures and no lock. Returns whether the member exists.
    async fn clear(&self, id: &MemberId) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct SqlxMemberRepository {
    pool: DbPool,
}

impl SqlxMemberRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_member(&self, row: MemberRow) -> Result<MemberIdentity> {
        let status = MemberStatus::from_str(&row.status)?;
        let member_number = MemberNumber::parse(&row.member_number)?;

        Ok(MemberIdentity {
            id: MemberId::from_string(row.id),
            member_number,
            status,
            verified: row.verified,
            lockout: LockoutState {
                failed_attempts: row.failed_attempts.max(0) as u32,
                locked_until: row.locked_until,
            },
            password_reset_required: row.password_reset_required,
            auth_identity: row.auth_identity,
            password_changed_at: row.password_changed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
        context: &str,
    ) -> Result<Option<MemberIdentity>> {
        let sql = format!("SELECT {} FROM members WHERE {}", MEMBER_COLUMNS, clause);
        let row = sqlx::query_as::<_, MemberRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| MemberAuthError::Database {
                source: err,
                context: context.to_string(),
            })?;

        row.map(|r| self.row_to_member(r)).transpose()
    }

    async fn update_flag(&self, sql: &str, id: &MemberId, context: &str) -> Result<()> {
        let result = sqlx::query(sql)
            .bind(Utc::now())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|err| MemberAuthError::Database {
                source: err,
                context: context.to_string(),
            })?;

        if result.rows_affected() == 0 {
            return Err(MemberAuthError::not_found("member", id.as_str()));
        }
        Ok(())
    }
}

#[async_trait]
impl MemberRepository for SqlxMemberRepository {
    #[instrument(
        skip(self, member),
        fields(member_number = %member.member_number),
        name = "db_create_member"
    )]
    async fn create(&self, member: NewMember) -> Result<MemberIdentity> {
        let id = MemberId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO members (id, member_number, status, verified, password_reset_required,
                                 auth_identity, password_changed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id.as_str())
        .bind(member.member_number.as_str())
        .bind(member.status.as_str())
        .bind(member.verified)
        .bind(member.password_reset_required)
        .bind(&member.auth_identity)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to create member".to_string(),
        })?;

        self.get(&id)
            .await?
            .ok_or_else(|| MemberAuthError::internal("Member not found after creation"))
    }

    #[instrument(skip(self), fields(member_id = %id), name = "db_get_member")]
    async fn get(&self, id: &MemberId) -> Result<Option<MemberIdentity>> {
        self.fetch_one_where("id = $1", id.as_str(), "Failed to fetch member").await
    }

    #[instrument(skip(self), fields(member_number = %number), name = "db_find_active_member")]
    async fn find_active_by_number(&self, number: &MemberNumber) -> Result<Option<MemberIdentity>> {
        self.fetch_one_where(
            "member_number = $1 AND status = 'active'",
            number.as_str(),
            "Failed to look up member",
        )
        .await
    }

    #[instrument(skip(self), fields(member_number = %number), name = "db_find_member")]
    async fn find_by_number(&self, number: &MemberNumber) -> Result<Option<MemberIdentity>> {
        self.fetch_one_where("member_number = $1", number.as_str(), "Failed to look up member")
            .await
    }

    #[instrument(skip(self), fields(member_id = %id), name = "db_set_password_reset_required")]
    async fn set_password_reset_required(&self, id: &MemberId, required: bool) -> Result<()> {
        let sql = if required {
            "UPDATE members SET password_reset_required = 1, updated_at = $1 WHERE id = $2"
        } else {
            "UPDATE members SET password_reset_required = 0, updated_at = $1 WHERE id = $2"
        };
        self.update_flag(sql, id, "Failed to update password reset flag").await
    }

    #[instrument(skip(self), fields(member_id = %id), name = "db_mark_password_changed")]
    async fn mark_password_changed(&self, id: &MemberId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET password_changed_at = $1, password_reset_required = 0, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to record password change".to_string(),
        })?;

        if result.rows_affected() == 0 {
            return Err(MemberAuthError::not_found("member", id.as_str()));
        }
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(member_id = %id, status = %status),
        name = "db_set_member_status"
    )]
    async fn set_status(&self, id: &MemberId, status: MemberStatus) -> Result<()> {
        let result = sqlx::query("UPDATE members SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|err| MemberAuthError::Database {
                source: err,
                context: "Failed to update member status".to_string(),
            })?;

        if result.rows_affected() == 0 {
            return Err(MemberAuthError::not_found("member", id.as_str()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockoutStore for SqlxMemberRepository {
    #[instrument(skip(self), fields(member_id = %id), name = "db_load_lockout")]
    async fn load(&self, id: &MemberId) -> Result<Option<VersionedLockout>> {
        let row = sqlx::query_as::<_, LockoutRow>(
            "SELECT failed_attempts, locked_until, lockout_version FROM members WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to load lockout state".to_string(),
        })?;

        Ok(row.map(|r| VersionedLockout {
            state: LockoutState {
                failed_attempts: r.failed_attempts.max(0) as u32,
                locked_until: r.locked_until,
            },
            version: r.lockout_version,
        }))
    }

    #[instrument(skip(self, next), fields(member_id = %id), name = "db_cas_lockout")]
    async fn compare_and_set(
        &self,
        id: &MemberId,
        expected_version: i64,
        next: LockoutState,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET failed_attempts = $1, locked_until = $2,
                lockout_version = lockout_version + 1, updated_at = $3
            WHERE id = $4 AND lockout_version = $5
            "#,
        )
        .bind(i64::from(next.failed_attempts))
        .bind(next.locked_until)
        .bind(Utc::now())
        .bind(id.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to update lockout state".to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(member_id = %id), name = "db_clear_lockout")]
    async fn clear(&self, id: &MemberId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET failed_attempts = 0, locked_until = NULL,
                lockout_version = lockout_version + 1, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to clear lockout state".to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }
}
