//! Administrative security operations on member accounts.
//!
//! Every operation requires `ManageMemberSecurity`, resolved through the role
//! cache. The local operator actor is trusted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use super::identity::Actor;
use super::lockout::LockoutPolicy;
use super::role_sync::RoleSyncEngine;
use super::session::SessionManager;
use crate::domain::{Capability, MemberIdentity, MemberNumber, RoleSet, SessionInfo};
use crate::errors::{MemberAuthError, Result};
use crate::observability::AUDIT_TARGET;
use crate::storage::{MaintenanceRepository, MaintenanceStatus, MemberRepository};

/// Security state of one member as shown to admins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityOverview {
    pub member_number: MemberNumber,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub password_reset_required: bool,
    pub password_age_days: Option<i64>,
    pub sessions: SessionInfo,
    /// `None` when roles could not be resolved
    pub roles: Option<RoleSet>,
    pub roles_stale: bool,
    pub security_health_score: u8,
}

pub struct AdminService {
    members: Arc<dyn MemberRepository>,
    maintenance: Arc<dyn MaintenanceRepository>,
    lockout: Arc<LockoutPolicy>,
    sessions: Arc<SessionManager>,
    roles: RoleSyncEngine,
    auth_email_domain: String,
}

impl AdminService {
    pub fn new(
        members: Arc<dyn MemberRepository>,
        maintenance: Arc<dyn MaintenanceRepository>,
        lockout: Arc<LockoutPolicy>,
        sessions: Arc<SessionManager>,
        roles: RoleSyncEngine,
        auth_email_domain: impl Into<String>,
    ) -> Self {
        Self {
            members,
            maintenance,
            lockout,
            sessions,
            roles,
            auth_email_domain: auth_email_domain.into(),
        }
    }

    /// Admin unlock: zero the failure counter and drop any lock.
    #[instrument(skip(self), fields(actor = %actor), name = "admin_reset_login_state")]
    pub async fn reset_login_state(&self, actor: &Actor, member_number: &str) -> Result<()> {
        let member = self.authorized_member(actor, member_number).await?;
        self.lockout.reset(&member.id).await?;

        info!(
            target: AUDIT_TARGET,
            event = "login_state_reset",
            actor = %actor,
            member_id = %member.id,
            member_number = %member.member_number,
            "Login state reset by admin"
        );
        Ok(())
    }

    /// Forced sign-out of every session of a member
    #[instrument(skip(self), fields(actor = %actor), name = "admin_terminate_all")]
    pub async fn terminate_all(&self, actor: &Actor, member_number: &str) -> Result<usize> {
        let member = self.authorized_member(actor, member_number).await?;
        let identifier = member.login_identifier(&self.auth_email_domain);
        let ended = self.sessions.terminate_all(&member.id, &identifier).await?;

        info!(
            target: AUDIT_TARGET,
            event = "sessions_terminated_by_admin",
            actor = %actor,
            member_id = %member.id,
            sessions = ended,
            "Admin terminated all sessions"
        );
        Ok(ended)
    }

    pub async fn session_info(&self, actor: &Actor, member_number: &str) -> Result<SessionInfo> {
        let member = self.authorized_member(actor, member_number).await?;
        self.sessions.session_info(&member.id).await
    }

    #[instrument(skip(self), fields(actor = %actor), name = "admin_security_overview")]
    pub async fn security_overview(
        &self,
        actor: &Actor,
        member_number: &str,
    ) -> Result<SecurityOverview> {
        let member = self.authorized_member(actor, member_number).await?;
        let now = Utc::now();
        let sessions = self.sessions.session_info(&member.id).await?;
        let resolved = self.roles.resolve(&member.id).await.ok();
        let lockout = member.lockout.effective_at(now);

        Ok(SecurityOverview {
            member_number: member.member_number.clone(),
            failed_attempts: lockout.failed_attempts,
            locked_until: lockout.locked_until.filter(|_| lockout.is_locked_at(now)),
            password_reset_required: member.password_reset_required,
            password_age_days: member.password_age_days(now),
            sessions,
            roles_stale: resolved.as_ref().is_some_and(|r| r.stale),
            roles: resolved.map(|r| r.roles),
            security_health_score: member.security_health_score(now),
        })
    }

    /// Require the member to set a new password at next sign-in
    #[instrument(skip(self), fields(actor = %actor), name = "admin_require_password_reset")]
    pub async fn require_password_reset(
        &self,
        actor: &Actor,
        member_number: &str,
        required: bool,
    ) -> Result<()> {
        let member = self.authorized_member(actor, member_number).await?;
        self.members.set_password_reset_required(&member.id, required).await?;

        info!(
            target: AUDIT_TARGET,
            event = "password_reset_flag_changed",
            actor = %actor,
            member_id = %member.id,
            required,
            "Password reset requirement updated"
        );
        Ok(())
    }

    /// The member's roles changed in the ledger; refresh the cache in the background.
    pub async fn roles_changed(
        &self,
        actor: &Actor,
        member_number: &str,
    ) -> Result<JoinHandle<Result<RoleSet>>> {
        let member = self.authorized_member(actor, member_number).await?;
        info!(actor = %actor, member_id = %member.id, "Role change notified");
        Ok(self.roles.roles_changed(&member.id))
    }

    pub async fn maintenance_status(&self) -> Result<MaintenanceStatus> {
        self.maintenance.status().await
    }

    #[instrument(skip(self, message), fields(actor = %actor), name = "admin_set_maintenance")]
    pub async fn set_maintenance(
        &self,
        actor: &Actor,
        enabled: bool,
        message: Option<String>,
    ) -> Result<()> {
        self.roles.authorize(actor, Capability::ManageMemberSecurity).await?;
        self.maintenance.set(enabled, message).await?;

        info!(
            target: AUDIT_TARGET,
            event = "maintenance_toggled",
            actor = %actor,
            enabled,
            "Maintenance mode updated"
        );
        Ok(())
    }

    async fn authorized_member(
        &self,
        actor: &Actor,
        member_number: &str,
    ) -> Result<MemberIdentity> {
        self.roles.authorize(actor, Capability::ManageMemberSecurity).await?;
        let number = MemberNumber::parse(member_number)?;
        self.members
            .find_by_number(&number)
            .await?
            .ok_or_else(|| MemberAuthError::not_found("member", number.as_str()))
    }
}
