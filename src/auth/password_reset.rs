//! Password reset coordinator.
//!
//! Three entry points share one result contract, [`PasswordResetResult`]:
//! self-service change, token-based reset (which also activates magic links)
//! and admin magic-link issuance. Input checks live in `password_policy` and run
//! before any backend call. Every backend call is bounded by the call timeout
//! and retried immediately up to the configured ceiling; exhausting it is
//! reported as `TRANSIENT_BACKEND_ERROR`.
//!
//! Once the identity provider has accepted the new password the change is
//! committed. The bookkeeping that follows is best-effort and reported in
//! `details`, never as a failure.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::identity::{Actor, IdentityProvider};
use super::password_policy::{
    check_change_request, check_token_reset_request, ChangePasswordRequest, TokenResetRequest,
};
use super::reset_tokens::ResetTokenIssuer;
use super::role_sync::RoleSyncEngine;
use super::session::SessionManager;
use crate::config::AuthConfig;
use crate::domain::{
    Capability, InvalidationReason, InvalidationTarget, IssuedToken, MemberId, MemberIdentity,
    MemberNumber, ResetTokenStatus, SessionId, TokenId, TokenKind,
};
use crate::errors::{MemberAuthError, Result};
use crate::observability::{recorder, AUDIT_TARGET};
use crate::storage::{MemberRepository, ResetTokenRepository};
use crate::utils::{retry, with_timeout, RetryPolicy};

/// Outcome shared by every reset pathway.
///
/// `error` holds the user-safe message and `code` the stable error code.
/// `details` carries diagnostics (field, rule, attempts, timestamp) and, for
/// magic links, the shareable reference. Raw backend text never appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordResetResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl PasswordResetResult {
    pub fn succeeded(details: Option<Value>) -> Self {
        Self { success: true, error: None, code: None, details }
    }

    pub fn failed(error: &MemberAuthError) -> Self {
        let mut details = json!({ "timestamp": Utc::now().to_rfc3339() });
        match error {
            MemberAuthError::Validation { field, code, .. } => {
                details["field"] = json!(field);
                details["rule"] = json!(code);
            }
            MemberAuthError::TransientBackend { attempts, .. }
            | MemberAuthError::RoleSync { attempts, .. } => {
                details["attempts"] = json!(attempts);
            }
            MemberAuthError::LockedOut { locked_until, .. } => {
                details["locked_until"] = json!(locked_until.to_rfc3339());
            }
            _ => {}
        }
        Self {
            success: false,
            error: Some(error.user_message()),
            code: Some(error.code().to_string()),
            details: Some(details),
        }
    }

    /// Shareable reference carried by a successful magic-link issuance
    pub fn link(&self) -> Option<&str> {
        self.details.as_ref().and_then(|d| d.get("link")).and_then(Value::as_str)
    }
}

/// A failed provider password update. `indeterminate` is set when an attempt
/// timed out, in which case the provider may have applied the change anyway.
struct UpdateFailure {
    error: MemberAuthError,
    indeterminate: bool,
}

pub struct PasswordResetCoordinator {
    members: Arc<dyn MemberRepository>,
    tokens: Arc<dyn ResetTokenRepository>,
    provider: Arc<dyn IdentityProvider>,
    issuer: ResetTokenIssuer,
    sessions: Arc<SessionManager>,
    roles: RoleSyncEngine,
    policy: RetryPolicy,
    call_timeout: Duration,
    reset_ttl: Duration,
    magic_link_ttl: Duration,
    auth_email_domain: String,
}

impl PasswordResetCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        members: Arc<dyn MemberRepository>,
        tokens: Arc<dyn ResetTokenRepository>,
        provider: Arc<dyn IdentityProvider>,
        issuer: ResetTokenIssuer,
        sessions: Arc<SessionManager>,
        roles: RoleSyncEngine,
        config: &AuthConfig,
    ) -> Self {
        Self {
            members,
            tokens,
            provider,
            issuer,
            sessions,
            roles,
            policy: RetryPolicy::immediate(config.reset_max_attempts),
            call_timeout: config.call_timeout(),
            reset_ttl: config.reset_token_ttl(),
            magic_link_ttl: config.magic_link_ttl(),
            auth_email_domain: config.auth_email_domain.clone(),
        }
    }

    /// Self-service change. The current password is confirmed with the identity
    /// provider; other sessions of the member end, `current_session` survives.
    #[instrument(skip(self, request), fields(member_id = %member_id), name = "password_change")]
    pub async fn change_password(
        &self,
        member_id: &MemberId,
        current_session: Option<&SessionId>,
        request: ChangePasswordRequest,
    ) -> PasswordResetResult {
        let outcome = self.apply_change(member_id, current_session, &request).await;
        self.finish("self_service", outcome)
    }

    /// Self-service "forgot password": issue a reset token for an active member.
    /// The caller hands the token to the delivery channel.
    #[instrument(skip(self), name = "password_reset_request")]
    pub async fn request_reset(&self, member_number: &str) -> Result<IssuedToken> {
        let number = MemberNumber::parse(member_number)?;
        let member = self.active_member_by_number(&number).await?;
        self.call("issue_reset_token", || {
            self.issuer.issue(&member.id, TokenKind::Reset, self.reset_ttl, None)
        })
        .await
    }

    /// Status of a token without consuming it
    #[instrument(skip(self, token), name = "validate_reset_token")]
    pub async fn validate_reset_token(&self, token: &str) -> Result<ResetTokenStatus> {
        self.call("validate_reset_token", || self.issuer.status(token)).await
    }

    /// Boolean view of [`Self::validate_reset_token`]; backend failures read as invalid.
    pub async fn is_reset_token_valid(&self, token: &str) -> bool {
        match self.validate_reset_token(token).await {
            Ok(status) => status.is_valid(),
            Err(e) => {
                warn!(error = %e, "Reset token validation failed");
                false
            }
        }
    }

    /// Token-based reset. The token is claimed before the password changes and
    /// released again if the change fails, so it authorizes at most one change.
    #[instrument(skip(self, request), name = "password_reset_with_token")]
    pub async fn reset_with_token(&self, request: TokenResetRequest) -> PasswordResetResult {
        let outcome = self.apply_token_reset(&request).await;
        self.finish("token", outcome)
    }

    /// Admin-only: issue a magic link for a member. Never changes a password.
    #[instrument(skip(self), fields(actor = %actor), name = "issue_magic_link")]
    pub async fn issue_magic_link(
        &self,
        actor: &Actor,
        member_number: &str,
    ) -> PasswordResetResult {
        let outcome = self.apply_magic_link(actor, member_number).await;
        self.finish("magic_link", outcome)
    }

    async fn apply_change(
        &self,
        member_id: &MemberId,
        current_session: Option<&SessionId>,
        request: &ChangePasswordRequest,
    ) -> Result<Value> {
        check_change_request(request)?;

        let member = self
            .call("get_member", || self.members.get(member_id))
            .await?
            .filter(MemberIdentity::is_active)
            .ok_or_else(|| MemberAuthError::not_found("member", member_id.as_str()))?;
        let identifier = member.login_identifier(&self.auth_email_domain);

        let confirmed = self
            .call("confirm_credential", || {
                self.provider.confirm_credential(&identifier, &request.current_password)
            })
            .await?;
        if !confirmed {
            warn!(
                target: AUDIT_TARGET,
                event = "password_change_rejected",
                member_id = %member.id,
                "Current password did not match"
            );
            return Err(MemberAuthError::invalid_credential(None));
        }

        self.update_password(&identifier, &request.new_password)
            .await
            .map_err(|failure| failure.error)?;
        let recorded = self.record_password_change(&member.id).await;

        let ended = match current_session {
            Some(keep) => {
                self.sessions
                    .invalidate_member_except(&member.id, keep, InvalidationReason::PasswordChanged)
                    .await
            }
            None => {
                self.sessions
                    .invalidate(
                        InvalidationTarget::Member(member.id.clone()),
                        InvalidationReason::PasswordChanged,
                    )
                    .await
            }
        };

        info!(
            target: AUDIT_TARGET,
            event = "password_changed",
            member_id = %member.id,
            path = "self_service",
            "Password changed"
        );
        Ok(json!({
            "sessions_invalidated": self.ended_count(&member.id, ended),
            "password_change_recorded": recorded,
        }))
    }

    async fn apply_token_reset(&self, request: &TokenResetRequest) -> Result<Value> {
        check_token_reset_request(request)?;

        let token = self
            .call("find_reset_token", || self.issuer.lookup(&request.token))
            .await?
            .ok_or_else(|| MemberAuthError::not_found("reset_token", "unknown"))?;
        match token.status_at(Utc::now()) {
            ResetTokenStatus::Consumed => {
                return Err(MemberAuthError::already_consumed("reset_token", token.id.as_str()))
            }
            ResetTokenStatus::Expired => {
                return Err(MemberAuthError::expired("reset_token", token.id.as_str()))
            }
            ResetTokenStatus::Valid | ResetTokenStatus::Unknown => {}
        }

        let member = self
            .call("get_member", || self.members.get(&token.member_id))
            .await?
            .filter(MemberIdentity::is_active)
            .ok_or_else(|| MemberAuthError::not_found("member", token.member_id.as_str()))?;

        let claim_ref = Uuid::new_v4().to_string();
        let claimed = self
            .call("claim_reset_token", || self.tokens.claim(&token.id, &claim_ref, Utc::now()))
            .await?;
        if !claimed {
            return Err(MemberAuthError::already_consumed("reset_token", token.id.as_str()));
        }

        let identifier = member.login_identifier(&self.auth_email_domain);
        if let Err(failure) = self.update_password(&identifier, &request.new_password).await {
            if failure.indeterminate {
                // The provider may hold the new password, so the token stays spent
                warn!(
                    token_id = %token.id,
                    error = %failure.error,
                    "Password update outcome unknown, token claim kept"
                );
            } else {
                self.release_claim(&token.id, &claim_ref, &failure.error).await;
            }
            return Err(failure.error);
        }

        let recorded = self.record_password_change(&member.id).await;

        match self
            .call("revoke_reset_tokens", || {
                self.tokens.revoke_outstanding(&member.id, Utc::now())
            })
            .await
        {
            Ok(revoked) if revoked > 0 => {
                info!(member_id = %member.id, revoked, "Outstanding reset tokens revoked")
            }
            Ok(_) => {}
            Err(e) => {
                warn!(member_id = %member.id, error = %e, "Failed to revoke outstanding tokens")
            }
        }

        let ended = self
            .sessions
            .invalidate(
                InvalidationTarget::Member(member.id.clone()),
                InvalidationReason::PasswordChanged,
            )
            .await;

        info!(
            target: AUDIT_TARGET,
            event = "password_changed",
            member_id = %member.id,
            token_id = %token.id,
            path = token.kind.as_str(),
            "Password reset with token"
        );
        Ok(json!({
            "sessions_invalidated": self.ended_count(&member.id, ended),
            "password_change_recorded": recorded,
        }))
    }

    async fn apply_magic_link(&self, actor: &Actor, member_number: &str) -> Result<Value> {
        self.roles.authorize(actor, Capability::IssueMagicLinks).await?;

        let number = MemberNumber::parse(member_number)?;
        let member = self.active_member_by_number(&number).await?;
        let issued = self
            .call("issue_magic_link", || {
                self.issuer.issue(
                    &member.id,
                    TokenKind::MagicLink,
                    self.magic_link_ttl,
                    Some(actor.audit_name()),
                )
            })
            .await?;

        Ok(json!({
            "member_number": member.member_number.as_str(),
            "link": issued.link,
            "expires_at": issued.record.expires_at.to_rfc3339(),
        }))
    }

    async fn active_member_by_number(&self, number: &MemberNumber) -> Result<MemberIdentity> {
        self.call("find_member", || self.members.find_active_by_number(number))
            .await?
            .ok_or_else(|| MemberAuthError::not_found("member", number.as_str()))
    }

    /// Apply the new password at the provider under the reset retry policy.
    async fn update_password(
        &self,
        identifier: &str,
        new_password: &str,
    ) -> std::result::Result<(), UpdateFailure> {
        let flag = AtomicBool::new(false);
        let timed_out = &flag;
        let limit = self.call_timeout;
        let provider = &self.provider;

        retry(&self.policy, "update_password", |_| async move {
            let result = with_timeout(
                limit,
                "update_password",
                provider.update_password(identifier, new_password),
            )
            .await;
            if matches!(result, Err(MemberAuthError::Timeout { .. })) {
                timed_out.store(true, Ordering::SeqCst);
            }
            result
        })
        .await
        .map_err(|error| UpdateFailure {
            indeterminate: flag.load(Ordering::SeqCst)
                || matches!(error, MemberAuthError::Timeout { .. }),
            error,
        })
    }

    async fn release_claim(&self, token_id: &TokenId, claim_ref: &str, cause: &MemberAuthError) {
        match self.tokens.release(token_id, claim_ref).await {
            Ok(released) => warn!(
                token_id = %token_id,
                released,
                error = %cause,
                "Password update failed, token claim released"
            ),
            Err(e) => error!(token_id = %token_id, error = %e, "Failed to release token claim"),
        }
    }

    /// Stamp the member row after the provider committed a new password.
    /// Returns whether the stamp was written.
    async fn record_password_change(&self, member_id: &MemberId) -> bool {
        match self
            .call("mark_password_changed", || {
                self.members.mark_password_changed(member_id, Utc::now())
            })
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    member_id = %member_id,
                    error = %e,
                    "Password changed but the member record was not updated"
                );
                false
            }
        }
    }

    /// Session teardown after a committed password change is reported, not failed.
    fn ended_count(&self, member_id: &MemberId, ended: Result<usize>) -> Option<usize> {
        match ended {
            Ok(count) => Some(count),
            Err(e) => {
                error!(
                    member_id = %member_id,
                    error = %e,
                    "Password changed but session invalidation failed"
                );
                None
            }
        }
    }

    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.call_timeout;
        retry(&self.policy, operation, |_| with_timeout(limit, operation, op())).await
    }

    fn finish(&self, path: &'static str, outcome: Result<Value>) -> PasswordResetResult {
        recorder().record_password_reset(path, outcome.is_ok());
        match outcome {
            Ok(details) => PasswordResetResult::succeeded(Some(details)),
            Err(e) => {
                match &e {
                    MemberAuthError::Validation { .. }
                    | MemberAuthError::InvalidCredential { .. }
                    | MemberAuthError::NotFound { .. }
                    | MemberAuthError::Expired { .. }
                    | MemberAuthError::AlreadyConsumed { .. } => {
                        info!(path, code = e.code(), error = %e, "Password reset rejected")
                    }
                    _ => error!(path, code = e.code(), error = %e, "Password reset failed"),
                }
                PasswordResetResult::failed(&e)
            }
        }
    }
}
