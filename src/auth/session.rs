//! Session lifecycle management.
//!
//! [`SessionManager`] is the single process-owned registry for sessions and
//! the derived state hanging off them (session-scoped cached query results and
//! role cache entries). It is created once at startup by `AuthCore` and torn
//! down explicitly with [`SessionManager::clear_all_local`].
//!
//! Invalidation is idempotent and safe to trigger from several paths at once
//! (sign-out, admin termination, refresh failure, password change). Local state
//! is always cleared before the identity provider is contacted, and provider
//! failures during teardown are logged rather than returned.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::identity::{ExternalSession, IdentityProvider};
use super::role_sync::RoleCache;
use crate::domain::{
    InvalidationReason, InvalidationTarget, MemberId, MemberIdentity, Session, SessionId,
    SessionInfo,
};
use crate::errors::Result;
use crate::observability::{recorder, AUDIT_TARGET};
use crate::storage::{DbPool, SessionRepository, SqlxSessionRepository};
use crate::utils::with_timeout;

/// Outcome of a member-initiated sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignOutReport {
    pub session_id: SessionId,
    pub member_id: Option<MemberId>,
    /// Whether the session was still active when sign-out started
    pub was_active: bool,
    pub provider_signed_out: bool,
    /// Error code of a failed provider sign-out
    pub provider_error: Option<String>,
}

pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    provider: Arc<dyn IdentityProvider>,
    role_cache: Arc<RoleCache>,
    scoped: DashMap<SessionId, HashMap<String, Value>>,
    call_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        provider: Arc<dyn IdentityProvider>,
        role_cache: Arc<RoleCache>,
        call_timeout: Duration,
    ) -> Self {
        Self { sessions, provider, role_cache, scoped: DashMap::new(), call_timeout }
    }

    pub fn with_sqlx(
        pool: DbPool,
        provider: Arc<dyn IdentityProvider>,
        role_cache: Arc<RoleCache>,
        call_timeout: Duration,
    ) -> Self {
        Self::new(Arc::new(SqlxSessionRepository::new(pool)), provider, role_cache, call_timeout)
    }

    /// Record a new active session for an authenticated member.
    #[instrument(
        skip(self, member, external),
        fields(member_id = %member.id),
        name = "session_establish"
    )]
    pub async fn establish(
        &self,
        member: &MemberIdentity,
        external: Option<ExternalSession>,
    ) -> Result<Session> {
        let session =
            Session::new(member.id.clone(), external.map(|e| e.reference), Utc::now());
        self.sessions.insert(&session).await?;

        info!(
            target: AUDIT_TARGET,
            event = "session_established",
            member_id = %member.id,
            member_number = %member.member_number,
            session_id = %session.id,
            "Session established"
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<Option<Session>> {
        self.sessions.get(session_id).await
    }

    /// End a session or every session of a member. Returns how many sessions
    /// this call ended; already inactive sessions count as nothing to do.
    #[instrument(
        skip(self, target, reason),
        fields(invalidation = %target, reason = %reason),
        name = "session_invalidate"
    )]
    pub async fn invalidate(
        &self,
        target: InvalidationTarget,
        reason: InvalidationReason,
    ) -> Result<usize> {
        let now = Utc::now();
        match target {
            InvalidationTarget::Session(session_id) => {
                self.scoped.remove(&session_id);
                let Some(session) = self.sessions.get(&session_id).await? else {
                    debug!("Unknown session, nothing to invalidate");
                    return Ok(0);
                };
                if !self.sessions.deactivate(&session_id, reason, now).await? {
                    debug!("Session already inactive");
                    return Ok(0);
                }
                self.drop_roles_if_idle(&session.member_id).await?;
                let ended = [session];
                self.sign_out_external(&ended, reason).await;
                self.record_invalidated(&ended, reason);
                Ok(1)
            }
            InvalidationTarget::Member(member_id) => {
                let ended =
                    self.sessions.deactivate_for_member(&member_id, reason, now, None).await?;
                for session in &ended {
                    self.scoped.remove(&session.id);
                }
                self.role_cache.remove(&member_id);
                self.sign_out_external(&ended, reason).await;
                self.record_invalidated(&ended, reason);
                Ok(ended.len())
            }
        }
    }

    /// End every session of a member except `keep`.
    #[instrument(
        skip(self, member_id, keep, reason),
        fields(member_id = %member_id, keep = %keep, reason = %reason),
        name = "session_invalidate_others"
    )]
    pub async fn invalidate_member_except(
        &self,
        member_id: &MemberId,
        keep: &SessionId,
        reason: InvalidationReason,
    ) -> Result<usize> {
        let ended = self
            .sessions
            .deactivate_for_member(member_id, reason, Utc::now(), Some(keep))
            .await?;
        for session in &ended {
            self.scoped.remove(&session.id);
        }
        self.sign_out_external(&ended, reason).await;
        self.record_invalidated(&ended, reason);
        Ok(ended.len())
    }

    /// Forced sign-out of every session of a member, locally and at the provider.
    #[instrument(
        skip(self, member_id, login_identifier),
        fields(member_id = %member_id),
        name = "session_terminate_all"
    )]
    pub async fn terminate_all(
        &self,
        member_id: &MemberId,
        login_identifier: &str,
    ) -> Result<usize> {
        let ended = self
            .invalidate(
                InvalidationTarget::Member(member_id.clone()),
                InvalidationReason::AdminTerminated,
            )
            .await?;

        if let Err(e) = with_timeout(
            self.call_timeout,
            "sign_out_all",
            self.provider.sign_out_all(login_identifier),
        )
        .await
        {
            warn!(member_id = %member_id, error = %e, "Provider sign-out of all sessions failed");
        }

        info!(
            target: AUDIT_TARGET,
            event = "sessions_terminated",
            member_id = %member_id,
            sessions = ended,
            "All sessions terminated"
        );
        Ok(ended)
    }

    /// Member-initiated sign-out.
    ///
    /// Local state goes first; the provider call comes last and its failure
    /// only shows up in the report.
    #[instrument(
        skip(self, session_id),
        fields(session_id = %session_id),
        name = "session_sign_out"
    )]
    pub async fn sign_out(&self, session_id: &SessionId) -> Result<SignOutReport> {
        self.scoped.remove(session_id);

        let session = self.sessions.get(session_id).await?;
        let was_active = match &session {
            Some(_) => {
                self.sessions.deactivate(session_id, InvalidationReason::SignOut, Utc::now()).await?
            }
            None => false,
        };

        let mut report = SignOutReport {
            session_id: session_id.clone(),
            member_id: session.as_ref().map(|s| s.member_id.clone()),
            was_active,
            provider_signed_out: false,
            provider_error: None,
        };

        let Some(session) = session else {
            return Ok(report);
        };
        self.drop_roles_if_idle(&session.member_id).await?;
        if was_active {
            self.record_invalidated(std::slice::from_ref(&session), InvalidationReason::SignOut);
        }

        if let Some(reference) = &session.external_ref {
            let sign_out = self.provider.sign_out(reference);
            match with_timeout(self.call_timeout, "sign_out", sign_out).await {
                Ok(()) => report.provider_signed_out = true,
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "Provider sign-out failed, local session already cleared"
                    );
                    report.provider_error = Some(e.code().to_string());
                }
            }
        }

        info!(
            target: AUDIT_TARGET,
            event = "signed_out",
            member_id = %session.member_id,
            session_id = %session_id,
            provider_signed_out = report.provider_signed_out,
            "Member signed out"
        );
        Ok(report)
    }

    /// Check that the session's provider side is still alive, invalidating it
    /// with `RefreshFailed` otherwise. Returns whether the session is usable.
    #[instrument(
        skip(self, session_id),
        fields(session_id = %session_id),
        name = "session_refresh"
    )]
    pub async fn refresh(&self, session_id: &SessionId) -> Result<bool> {
        let session = match self.sessions.get(session_id).await? {
            Some(session) if session.active => session,
            _ => return Ok(false),
        };

        let alive = match &session.external_ref {
            Some(reference) => {
                with_timeout(
                    self.call_timeout,
                    "session_alive",
                    self.provider.session_alive(reference),
                )
                .await?
            }
            None => true,
        };

        if alive {
            self.sessions.touch(session_id, Utc::now()).await?;
            return Ok(true);
        }

        info!(
            session_id = %session_id,
            member_id = %session.member_id,
            "Provider session expired"
        );
        self.invalidate(
            InvalidationTarget::Session(session_id.clone()),
            InvalidationReason::RefreshFailed,
        )
        .await?;
        Ok(false)
    }

    /// Login summary for admin views
    pub async fn session_info(&self, member_id: &MemberId) -> Result<SessionInfo> {
        let sessions = self.sessions.list_for_member(member_id).await?;
        Ok(SessionInfo::from_sessions(&sessions))
    }

    pub async fn active_sessions(&self, member_id: &MemberId) -> Result<Vec<Session>> {
        let sessions = self.sessions.list_for_member(member_id).await?;
        Ok(sessions.into_iter().filter(|s| s.active).collect())
    }

    /// Cache a query result for the lifetime of a session
    pub fn cache_put(&self, session_id: &SessionId, key: impl Into<String>, value: Value) {
        self.scoped.entry(session_id.clone()).or_default().insert(key.into(), value);
    }

    pub fn cache_get(&self, session_id: &SessionId, key: &str) -> Option<Value> {
        self.scoped.get(session_id).and_then(|entries| entries.get(key).cloned())
    }

    /// Process teardown: drop every piece of locally derived state.
    pub fn clear_all_local(&self) {
        self.scoped.clear();
        self.role_cache.clear();
        debug!("Local session state cleared");
    }

    async fn drop_roles_if_idle(&self, member_id: &MemberId) -> Result<()> {
        if self.active_sessions(member_id).await?.is_empty() {
            self.role_cache.remove(member_id);
        }
        Ok(())
    }

    /// Best-effort provider sign-out for sessions that ended locally. A failed
    /// refresh means the provider side is already gone.
    async fn sign_out_external(&self, ended: &[Session], reason: InvalidationReason) {
        if reason == InvalidationReason::RefreshFailed {
            return;
        }
        for session in ended {
            let Some(reference) = &session.external_ref else {
                continue;
            };
            if let Err(e) =
                with_timeout(self.call_timeout, "sign_out", self.provider.sign_out(reference)).await
            {
                warn!(
                    session_id = %session.id,
                    reason = %reason,
                    error = %e,
                    "Provider sign-out failed during invalidation"
                );
            }
        }
    }

    fn record_invalidated(&self, ended: &[Session], reason: InvalidationReason) {
        if ended.is_empty() {
            return;
        }
        recorder().record_session_invalidated(reason.as_str(), ended.len() as u64);
        info!(
            target: AUDIT_TARGET,
            event = "sessions_invalidated",
            member_id = %ended[0].member_id,
            reason = %reason,
            count = ended.len(),
            "Sessions invalidated"
        );
    }
}
