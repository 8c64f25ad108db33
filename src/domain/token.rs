//! Reset tokens and magic links.
//!
//! Only the SHA-256 digest of a token is stored. The raw value exists in the
//! [`IssuedToken`] handed back to the caller and nowhere else.

use super::id::{MemberId, TokenId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Requested by the member through "forgot password"
    Reset,
    /// Issued by an admin on behalf of the member
    MagicLink,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Reset => "reset",
            TokenKind::MagicLink => "magic_link",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reset" => Some(TokenKind::Reset),
            "magic_link" => Some(TokenKind::MagicLink),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of looking a token up without consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetTokenStatus {
    Valid,
    Expired,
    Consumed,
    Unknown,
}

impl ResetTokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ResetTokenStatus::Valid)
    }
}

/// Stored token record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetToken {
    pub id: TokenId,
    pub member_id: MemberId,
    pub kind: TokenKind,
    #[serde(skip_serializing)]
    pub token_digest: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    /// Audit name of the issuing actor, "operator" for local tooling
    pub issued_by: Option<String>,
}

impl ResetToken {
    /// Consumption wins over expiry so replays are reported as such.
    pub fn status_at(&self, now: DateTime<Utc>) -> ResetTokenStatus {
        if self.consumed_at.is_some() {
            ResetTokenStatus::Consumed
        } else if self.expires_at <= now {
            ResetTokenStatus::Expired
        } else {
            ResetTokenStatus::Valid
        }
    }
}

/// A freshly issued token with its shareable reference.
#[derive(Clone)]
pub struct IssuedToken {
    pub record: ResetToken,
    pub token: String,
    pub link: String,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("record", &self.record)
            .field("token", &"[redacted]")
            .finish()
    }
}

/// Hex SHA-256 digest used as the storage key for a raw token
pub fn digest_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
