//! Credential verification for member logins.
//!
//! `authenticate` runs the checks in a fixed order: maintenance mode, member
//! lookup (active only), lockout, then the identity provider. Every outcome is
//! either an [`AuthOutcome`] or a typed error; the caller never receives a bare
//! boolean.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::identity::IdentityProvider;
use super::lockout::LockoutPolicy;
use super::role_sync::RoleSyncEngine;
use super::session::SessionManager;
use crate::config::AuthConfig;
use crate::domain::{Capability, LockoutState, MemberIdentity, MemberNumber, RoleSet, Session};
use crate::errors::{MemberAuthError, Result};
use crate::observability::{recorder, AUDIT_TARGET};
use crate::storage::{MaintenanceRepository, MemberRepository};
use crate::utils::{retry, with_timeout, RetryPolicy};

/// A successful login with its session. Role synchronization runs in the
/// background; await `role_sync` before trusting role-gated decisions.
#[derive(Debug)]
pub struct AuthenticatedLogin {
    pub member: MemberIdentity,
    pub session: Session,
    pub role_sync: JoinHandle<Result<RoleSet>>,
}

#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated(AuthenticatedLogin),
    /// Credentials were correct but the member must set a new password first.
    /// No session is established.
    PasswordResetRequired { member: MemberIdentity },
}

impl AuthOutcome {
    pub fn member(&self) -> &MemberIdentity {
        match self {
            AuthOutcome::Authenticated(login) => &login.member,
            AuthOutcome::PasswordResetRequired { member } => member,
        }
    }
}

/// Metrics label for a finished attempt
pub fn outcome_label(result: &Result<AuthOutcome>) -> &'static str {
    match result {
        Ok(AuthOutcome::Authenticated(_)) => "authenticated",
        Ok(AuthOutcome::PasswordResetRequired { .. }) => "password_reset_required",
        Err(MemberAuthError::LockedOut { .. }) => "locked_out",
        Err(MemberAuthError::InvalidCredential { .. }) => "invalid_credentials",
        Err(MemberAuthError::NotFound { .. }) => "member_not_found",
        Err(MemberAuthError::MaintenanceBlocked { .. }) => "maintenance_blocked",
        Err(MemberAuthError::Validation { .. }) => "invalid_input",
        Err(_) => "error",
    }
}

pub struct CredentialVerifier {
    members: Arc<dyn MemberRepository>,
    maintenance: Arc<dyn MaintenanceRepository>,
    provider: Arc<dyn IdentityProvider>,
    lockout: Arc<LockoutPolicy>,
    sessions: Arc<SessionManager>,
    roles: RoleSyncEngine,
    policy: RetryPolicy,
    call_timeout: Duration,
    auth_email_domain: String,
    default_maintenance_message: String,
}

impl CredentialVerifier {
    pub fn new(
        members: Arc<dyn MemberRepository>,
        maintenance: Arc<dyn MaintenanceRepository>,
        provider: Arc<dyn IdentityProvider>,
        lockout: Arc<LockoutPolicy>,
        sessions: Arc<SessionManager>,
        roles: RoleSyncEngine,
        config: &AuthConfig,
    ) -> Self {
        Self {
            members,
            maintenance,
            provider,
            lockout,
            sessions,
            roles,
            policy: RetryPolicy::immediate(config.reset_max_attempts),
            call_timeout: config.call_timeout(),
            auth_email_domain: config.auth_email_domain.clone(),
            default_maintenance_message: config.default_maintenance_message.clone(),
        }
    }

    /// Authenticate a member number and password.
    #[instrument(
        skip(self, password),
        fields(member_number = %member_number.trim()),
        name = "authenticate"
    )]
    pub async fn authenticate(&self, member_number: &str, password: &str) -> Result<AuthOutcome> {
        let result = self.run(member_number, password).await;
        recorder().record_authentication(outcome_label(&result));
        result
    }

    async fn run(&self, member_number: &str, password: &str) -> Result<AuthOutcome> {
        let number = MemberNumber::parse(member_number)?;
        if password.is_empty() {
            return Err(MemberAuthError::validation_rule(
                "Password is required",
                "password",
                "required",
            ));
        }

        self.check_maintenance(&number).await?;

        let mut member = self
            .call("find_member", || self.members.find_active_by_number(&number))
            .await?
            .ok_or_else(|| MemberAuthError::not_found("member", number.as_str()))?;

        let now = Utc::now();
        if let Some(locked_until) = self.lockout.lock_status(&member.id).await? {
            info!(
                target: AUDIT_TARGET,
                event = "login_refused_locked",
                member_id = %member.id,
                member_number = %number,
                locked_until = %locked_until,
                "Login refused during lockout window"
            );
            return Err(MemberAuthError::locked_out(locked_until, now));
        }

        let identifier = member.login_identifier(&self.auth_email_domain);
        let verified = self
            .call("verify_credential", || self.provider.verify_credential(&identifier, password))
            .await?;

        let Some(external) = verified else {
            let decision = self.lockout.record_failure(&member.id).await?;
            return Err(decision.to_error());
        };

        self.lockout.reset(&member.id).await?;
        member.lockout = LockoutState::default();

        if member.password_reset_required {
            if let Err(e) = with_timeout(
                self.call_timeout,
                "sign_out",
                self.provider.sign_out(&external.reference),
            )
            .await
            {
                warn!(member_id = %member.id, error = %e, "Failed to close provider session");
            }
            info!(
                target: AUDIT_TARGET,
                event = "login_password_reset_required",
                member_id = %member.id,
                member_number = %number,
                "Password reset required before sign-in"
            );
            return Ok(AuthOutcome::PasswordResetRequired { member });
        }

        let session = self.sessions.establish(&member, Some(external)).await?;
        let role_sync = self.roles.spawn_sync(member.id.clone());

        info!(
            target: AUDIT_TARGET,
            event = "login_succeeded",
            member_id = %member.id,
            member_number = %number,
            session_id = %session.id,
            "Member authenticated"
        );
        Ok(AuthOutcome::Authenticated(AuthenticatedLogin { member, session, role_sync }))
    }

    /// While maintenance is on, only identities whose resolved roles allow
    /// bypassing it get through. Any doubt (unknown member, role lookup
    /// failure) keeps the door closed.
    async fn check_maintenance(&self, number: &MemberNumber) -> Result<()> {
        let status = self.call("maintenance_status", || self.maintenance.status()).await?;
        if !status.is_enabled {
            return Ok(());
        }

        let message = status
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_maintenance_message.clone());

        let member = self.call("find_member", || self.members.find_active_by_number(number)).await?;
        if let Some(member) = member {
            match self.roles.resolve(&member.id).await {
                Ok(resolved) if resolved.allows(Capability::BypassMaintenance) => {
                    debug!(
                        member_id = %member.id,
                        stale = resolved.stale,
                        "Maintenance bypass granted"
                    );
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        member_id = %member.id,
                        error = %e,
                        "Role lookup failed during maintenance"
                    );
                }
            }
        }

        info!(
            target: AUDIT_TARGET,
            event = "login_refused_maintenance",
            member_number = %number,
            "Login refused during maintenance"
        );
        Err(MemberAuthError::maintenance(message))
    }

    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.call_timeout;
        retry(&self.policy, operation, |_| with_timeout(limit, operation, op())).await
    }
}
