//! External collaborators of the auth core.
//!
//! The identity provider owns credentials; this crate never stores or hashes a
//! secret. The role ledger is the authoritative source of role assignments.
//! Deployments supply implementations of both traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::domain::{MemberId, RoleAssignment};
use crate::errors::{MemberAuthError, Result};

/// A session opened at the identity provider by a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSession {
    /// Provider handle used to sign the session out later
    pub reference: String,
    /// Provider-side subject identifier
    pub subject: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Compare a secret. `Ok(None)` means the secret was wrong; `Err` is reserved
    /// for backend failures.
    async fn verify_credential(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<Option<ExternalSession>>;

    /// Replace the stored secret of an identity
    async fn update_password(&self, identifier: &str, new_secret: &str) -> Result<()>;

    /// End one provider session
    async fn sign_out(&self, reference: &str) -> Result<()>;

    /// End every provider session of an identity
    async fn sign_out_all(&self, identifier: &str) -> Result<()>;

    /// Whether a provider session can still be used
    async fn session_alive(&self, reference: &str) -> Result<bool>;

    /// Check a secret without keeping the session it opens.
    async fn confirm_credential(&self, identifier: &str, secret: &str) -> Result<bool> {
        match self.verify_credential(identifier, secret).await? {
            Some(session) => {
                if let Err(e) = self.sign_out(&session.reference).await {
                    debug!(error = %e, "Failed to close confirmation session");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
pub trait RoleLedger: Send + Sync {
    /// Every role currently assigned to a member
    async fn fetch_roles(&self, member_id: &MemberId) -> Result<Vec<RoleAssignment>>;
}

/// Who is asking for a privileged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// A signed-in member whose roles are resolved through the role cache
    Member(MemberId),
    /// Local tooling with direct storage access
    Operator,
}

impl Actor {
    /// Value recorded as `issued_by` on tokens and in audit events
    pub fn audit_name(&self) -> String {
        match self {
            Actor::Member(id) => id.to_string(),
            Actor::Operator => "operator".to_string(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Member(id) => write!(f, "member:{}", id),
            Actor::Operator => f.write_str("operator"),
        }
    }
}

/// Provider for storage-only tooling. Every credential operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineIdentityProvider;

fn offline(operation: &str) -> MemberAuthError {
    MemberAuthError::internal(format!("Identity provider is not available for {}", operation))
}

#[async_trait]
impl IdentityProvider for OfflineIdentityProvider {
    async fn verify_credential(&self, _: &str, _: &str) -> Result<Option<ExternalSession>> {
        Err(offline("verify_credential"))
    }

    async fn update_password(&self, _: &str, _: &str) -> Result<()> {
        Err(offline("update_password"))
    }

    async fn sign_out(&self, _: &str) -> Result<()> {
        Err(offline("sign_out"))
    }

    async fn sign_out_all(&self, _: &str) -> Result<()> {
        Err(offline("sign_out_all"))
    }

    async fn session_alive(&self, _: &str) -> Result<bool> {
        Err(offline("session_alive"))
    }
}

/// Ledger for storage-only tooling. Role lookups fail, so nothing is cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRoleLedger;

#[async_trait]
impl RoleLedger for OfflineRoleLedger {
    async fn fetch_roles(&self, _: &MemberId) -> Result<Vec<RoleAssignment>> {
        Err(offline("fetch_roles"))
    }
}
