//! Reset token and magic link persistence.
//!
//! Tokens are looked up by digest. Consumption is a conditional UPDATE on
//! `consumed_at IS NULL`, so at most one caller can ever claim a token.

use crate::domain::{MemberId, ResetToken, TokenId, TokenKind};
use crate::errors::{MemberAuthError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct ResetTokenRow {
    pub id: String,
    pub member_id: String,
    pub kind: String,
    pub token_digest: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub issued_by: Option<String>,
}

impl TryFrom<ResetTokenRow> for ResetToken {
    type Error = MemberAuthError;

    fn try_from(row: ResetTokenRow) -> Result<Self> {
        let kind = TokenKind::parse(&row.kind).ok_or_else(|| {
            MemberAuthError::internal(format!("Unknown token kind '{}'", row.kind))
        })?;

        Ok(ResetToken {
            id: TokenId::from_string(row.id),
            member_id: MemberId::from_string(row.member_id),
            kind,
            token_digest: row.token_digest,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            consumed_at: row.consumed_at,
            issued_by: row.issued_by,
        })
    }
}

#[async_trait]
pub trait ResetTokenRepository: Send + Sync {
    /// Persist a freshly issued token
    async fn insert(&self, token: &ResetToken) -> Result<()>;

    /// Find a token by the digest of its raw value
    async fn find_by_digest(&self, digest: &str) -> Result<Option<ResetToken>>;

    /// Atomically mark the token consumed. `claim_ref` identifies the claimant.
    /// Returns false when someone else already consumed it.
    async fn claim(&self, id: &TokenId, claim_ref: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Undo a claim made with `claim_ref`. Returns whether anything was released.
    async fn release(&self, id: &TokenId, claim_ref: &str) -> Result<bool>;

    /// Consume every outstanding token of a member. Returns how many were revoked.
    async fn revoke_outstanding(&self, member_id: &MemberId, at: DateTime<Utc>) -> Result<u64>;

    /// Tokens issued to a member, newest first
    async fn list_for_member(&self, member_id: &MemberId) -> Result<Vec<ResetToken>>;
}

#[derive(Debug, Clone)]
pub struct SqlxResetTokenRepository {
    pool: DbPool,
}

impl SqlxResetTokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResetTokenRepository for SqlxResetTokenRepository {
    #[instrument(
        skip(self, token),
        fields(token_id = %token.id, member_id = %token.member_id, kind = %token.kind),
        name = "db_insert_reset_token"
    )]
    async fn insert(&self, token: &ResetToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reset_tokens
                (id, member_id, kind, token_digest, issued_at, expires_at, consumed_at, issued_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.id.as_str())
        .bind(token.member_id.as_str())
        .bind(token.kind.as_str())
        .bind(&token.token_digest)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.consumed_at)
        .bind(&token.issued_by)
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to store reset token".to_string(),
        })?;

        Ok(())
    }

    #[instrument(skip(self, digest), name = "db_find_reset_token")]
    async fn find_by_digest(&self, digest: &str) -> Result<Option<ResetToken>> {
        let row = sqlx::query_as::<_, ResetTokenRow>(
            r#"
            SELECT id, member_id, kind, token_digest, issued_at, expires_at, consumed_at, issued_by
            FROM reset_tokens
            WHERE token_digest = $1
            "#,
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to look up reset token".to_string(),
        })?;

        row.map(ResetToken::try_from).transpose()
    }

    #[instrument(skip(self, claim_ref), fields(token_id = %id), name = "db_claim_reset_token")]
    async fn claim(&self, id: &TokenId, claim_ref: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reset_tokens
            SET consumed_at = $1, claim_ref = $2
            WHERE id = $3 AND consumed_at IS NULL
            "#,
        )
        .bind(at)
        .bind(claim_ref)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to consume reset token".to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, claim_ref), fields(token_id = %id), name = "db_release_reset_token")]
    async fn release(&self, id: &TokenId, claim_ref: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reset_tokens
            SET consumed_at = NULL, claim_ref = NULL
            WHERE id = $1 AND claim_ref = $2
            "#,
        )
        .bind(id.as_str())
        .bind(claim_ref)
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to release reset token".to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(member_id = %member_id), name = "db_revoke_reset_tokens")]
    async fn revoke_outstanding(&self, member_id: &MemberId, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reset_tokens
            SET consumed_at = $1, claim_ref = 'revoked'
            WHERE member_id = $2 AND consumed_at IS NULL
            "#,
        )
        .bind(at)
        .bind(member_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to revoke reset tokens".to_string(),
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(member_id = %member_id), name = "db_list_reset_tokens")]
    async fn list_for_member(&self, member_id: &MemberId) -> Result<Vec<ResetToken>> {
        let rows = sqlx::query_as::<_, ResetTokenRow>(
            r#"
            SELECT id, member_id, kind, token_digest, issued_at, expires_at, consumed_at, issued_by
            FROM reset_tokens
            WHERE member_id = $1
            ORDER BY issued_at DESC
            "#,
        )
        .bind(member_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|err| MemberAuthError::Database {
            source: err,
            context: "Failed to list reset tokens".to_string(),
        })?;

        rows.into_iter().map(ResetToken::try_from).collect()
    }
}
