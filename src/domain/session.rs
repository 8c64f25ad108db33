//! Authenticated sessions.

use super::id::{MemberId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a session stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    SignOut,
    AdminTerminated,
    PasswordChanged,
    RefreshFailed,
}

impl InvalidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationReason::SignOut => "sign_out",
            InvalidationReason::AdminTerminated => "admin_terminated",
            InvalidationReason::PasswordChanged => "password_changed",
            InvalidationReason::RefreshFailed => "refresh_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sign_out" => Some(InvalidationReason::SignOut),
            "admin_terminated" => Some(InvalidationReason::AdminTerminated),
            "password_changed" => Some(InvalidationReason::PasswordChanged),
            "refresh_failed" => Some(InvalidationReason::RefreshFailed),
            _ => None,
        }
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub member_id: MemberId,
    /// Handle of the identity-provider session backing this one
    pub external_ref: Option<String>,
    pub established_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub invalidation_reason: Option<InvalidationReason>,
}

impl Session {
    pub fn new(member_id: MemberId, external_ref: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            member_id,
            external_ref,
            established_at: now,
            last_activity: now,
            active: true,
            invalidated_at: None,
            invalidation_reason: None,
        }
    }
}

/// What `invalidate` applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    Session(SessionId),
    Member(MemberId),
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationTarget::Session(id) => write!(f, "session:{}", id),
            InvalidationTarget::Member(id) => write!(f, "member:{}", id),
        }
    }
}

/// Summary exposed to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub active_sessions: u32,
}

impl SessionInfo {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let active_sessions = sessions.iter().filter(|s| s.active).count() as u32;
        Self {
            last_login: sessions.iter().map(|s| s.established_at).max(),
            is_active: active_sessions > 0,
            active_sessions,
        }
    }
}
