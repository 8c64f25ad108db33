//! Roles and the capability set derived from them.
//!
//! Call sites ask a [`RoleSet`] whether a [`Capability`] is allowed instead of
//! checking role names inline. Role sets are only obtained through the role
//! synchronization engine's cache.

use crate::errors::MemberAuthError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::id::MemberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Collector,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Collector => "collector",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MemberAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "collector" => Ok(Role::Collector),
            "member" => Ok(Role::Member),
            other => Err(MemberAuthError::validation_field(
                format!("Unknown role '{}'", other),
                "role",
            )),
        }
    }
}

/// Actions gated on roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Sign in while maintenance mode is enabled
    BypassMaintenance,
    /// Member security administration such as unlocks and forced sign-out
    ManageMemberSecurity,
    /// Issue magic links on behalf of members
    IssueMagicLinks,
    /// Record payments for assigned members
    CollectPayments,
    /// Use the member portal
    AccessPortal,
}

/// An immutable snapshot of a member's roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new<I: IntoIterator<Item = Role>>(roles: I) -> Self {
        Self(roles.into_iter().collect())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.0.iter()
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::BypassMaintenance
            | Capability::ManageMemberSecurity
            | Capability::IssueMagicLinks => self.contains(Role::Admin),
            Capability::CollectPayments => {
                self.contains(Role::Collector) || self.contains(Role::Admin)
            }
            Capability::AccessPortal => !self.is_empty(),
        }
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Role::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// One row of the authoritative role ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub member_id: MemberId,
    pub role: Role,
    pub assigned_at: DateTime<Utc>,
}
