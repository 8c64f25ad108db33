//! Authentication core entry point.
//!
//! [`AuthCore`] wires the lockout policy, credential verifier, password reset
//! coordinator, session manager and role synchronization engine over one
//! database pool and one pair of external collaborators.

pub mod admin;
pub mod credential_verifier;
pub mod identity;
pub mod lockout;
pub mod login_state;
pub mod password_policy;
pub mod password_reset;
pub mod reset_tokens;
pub mod role_sync;
pub mod session;

pub use admin::{AdminService, SecurityOverview};
pub use credential_verifier::{AuthOutcome, AuthenticatedLogin, CredentialVerifier};
pub use identity::{
    Actor, ExternalSession, IdentityProvider, OfflineIdentityProvider, OfflineRoleLedger,
    RoleLedger,
};
pub use lockout::{LockoutDecision, LockoutPolicy};
pub use login_state::{LoginEvent, LoginFlow, LoginState};
pub use password_policy::{
    password_violations, validate_password, ChangePasswordRequest, TokenResetRequest,
};
pub use password_reset::{PasswordResetCoordinator, PasswordResetResult};
pub use reset_tokens::ResetTokenIssuer;
pub use role_sync::{ResolvedRoles, RoleCache, RoleCacheEntry, RoleSyncEngine};
pub use session::{SessionManager, SignOutReport};

use std::sync::Arc;
use tracing::info;

use crate::config::AuthConfig;
use crate::errors::Result;
use crate::storage::{
    DbPool, SqlxMaintenanceRepository, SqlxMemberRepository, SqlxResetTokenRepository,
    SqlxSessionRepository,
};

/// The process-owned authentication services.
pub struct AuthCore {
    pub verifier: CredentialVerifier,
    pub resets: PasswordResetCoordinator,
    pub sessions: Arc<SessionManager>,
    pub roles: RoleSyncEngine,
    pub lockout: Arc<LockoutPolicy>,
    pub admin: AdminService,
}

impl AuthCore {
    pub fn new(
        pool: DbPool,
        config: &AuthConfig,
        provider: Arc<dyn IdentityProvider>,
        ledger: Arc<dyn RoleLedger>,
    ) -> Result<Self> {
        let members = Arc::new(SqlxMemberRepository::new(pool.clone()));
        let maintenance = Arc::new(SqlxMaintenanceRepository::new(pool.clone()));
        let tokens = Arc::new(SqlxResetTokenRepository::new(pool.clone()));

        let role_cache = Arc::new(RoleCache::new());
        let roles = RoleSyncEngine::from_config(ledger, role_cache.clone(), config);
        let lockout = Arc::new(LockoutPolicy::from_config(members.clone(), config));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(SqlxSessionRepository::new(pool)),
            provider.clone(),
            role_cache,
            config.call_timeout(),
        ));
        let issuer = ResetTokenIssuer::new(tokens.clone(), &config.public_base_url)?;

        let verifier = CredentialVerifier::new(
            members.clone(),
            maintenance.clone(),
            provider.clone(),
            lockout.clone(),
            sessions.clone(),
            roles.clone(),
            config,
        );
        let resets = PasswordResetCoordinator::new(
            members.clone(),
            tokens,
            provider,
            issuer,
            sessions.clone(),
            roles.clone(),
            config,
        );
        let admin = AdminService::new(
            members,
            maintenance,
            lockout.clone(),
            sessions.clone(),
            roles.clone(),
            config.auth_email_domain.clone(),
        );

        info!(
            lockout_threshold = config.lockout_threshold,
            lockout_window_seconds = config.lockout_window_seconds,
            "Authentication core initialized"
        );
        Ok(Self { verifier, resets, sessions, roles, lockout, admin })
    }

    /// Core for storage-only tooling: no identity provider, no role ledger.
    pub fn offline(pool: DbPool, config: &AuthConfig) -> Result<Self> {
        Self::new(pool, config, Arc::new(OfflineIdentityProvider), Arc::new(OfflineRoleLedger))
    }

    /// Drop all locally derived state. Call once at process shutdown.
    pub fn shutdown(&self) {
        self.sessions.clear_all_local();
        info!("Authentication core shut down");
    }
}
