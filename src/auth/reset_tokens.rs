//! Reset token and magic link issuance.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

use crate::domain::{
    digest_token, IssuedToken, MemberId, ResetToken, ResetTokenStatus, TokenId, TokenKind,
};
use crate::errors::{MemberAuthError, Result};
use crate::observability::{recorder, AUDIT_TARGET};
use crate::storage::{DbPool, ResetTokenRepository, SqlxResetTokenRepository};

/// Entropy of a raw token: 256 bits
pub const TOKEN_BYTES: usize = 32;

/// Path of the reset page relative to the public base URL
pub const RESET_PATH: &str = "reset-password";

pub struct ResetTokenIssuer {
    tokens: Arc<dyn ResetTokenRepository>,
    base_url: Url,
}

impl ResetTokenIssuer {
    pub fn new(tokens: Arc<dyn ResetTokenRepository>, public_base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(public_base_url).map_err(|e| {
            MemberAuthError::config(format!("Invalid public base URL '{}': {}", public_base_url, e))
        })?;
        // `join` replaces the last path segment unless the base ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { tokens, base_url })
    }

    pub fn with_sqlx(pool: DbPool, public_base_url: &str) -> Result<Self> {
        Self::new(Arc::new(SqlxResetTokenRepository::new(pool)), public_base_url)
    }

    /// Fresh URL-safe token from the OS random source
    pub fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Shareable reference for a raw token
    pub fn reset_link(&self, token: &str) -> Result<String> {
        let mut url = self
            .base_url
            .join(RESET_PATH)
            .map_err(|e| MemberAuthError::internal(format!("Failed to build reset link: {}", e)))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }

    /// Issue a token bound to `member_id`. Only its digest is stored.
    #[instrument(
        skip(self, issued_by),
        fields(member_id = %member_id, kind = %kind),
        name = "issue_reset_token"
    )]
    pub async fn issue(
        &self,
        member_id: &MemberId,
        kind: TokenKind,
        ttl: Duration,
        issued_by: Option<String>,
    ) -> Result<IssuedToken> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| MemberAuthError::config(format!("Token TTL out of range: {}", e)))?;
        let token = Self::generate_token();
        let issued_at = Utc::now();
        let record = ResetToken {
            id: TokenId::new(),
            member_id: member_id.clone(),
            kind,
            token_digest: digest_token(&token),
            issued_at,
            expires_at: issued_at + ttl,
            consumed_at: None,
            issued_by,
        };
        self.tokens.insert(&record).await?;
        let link = self.reset_link(&token)?;

        recorder().record_token_issued(kind.as_str());
        info!(
            target: AUDIT_TARGET,
            event = "reset_token_issued",
            member_id = %member_id,
            token_id = %record.id,
            kind = %kind,
            issued_by = record.issued_by.as_deref().unwrap_or("self"),
            expires_at = %record.expires_at,
            "Reset token issued"
        );
        Ok(IssuedToken { record, token, link })
    }

    /// Stored record for a raw token
    pub async fn lookup(&self, raw: &str) -> Result<Option<ResetToken>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        self.tokens.find_by_digest(&digest_token(raw)).await
    }

    /// Status of a raw token without consuming it
    pub async fn status(&self, raw: &str) -> Result<ResetTokenStatus> {
        Ok(self
            .lookup(raw)
            .await?
            .map(|token| token.status_at(Utc::now()))
            .unwrap_or(ResetTokenStatus::Unknown))
    }
}
