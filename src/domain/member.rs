//! Member identity and lockout state.

use super::id::MemberId;
use crate::errors::{MemberAuthError, Result};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref MEMBER_NUMBER_REGEX: Regex = Regex::new(r"^[A-Z]{2}\d{5}$")
        .expect("MEMBER_NUMBER_REGEX should be a valid regex pattern");
}

/// Days after which a password is considered due for rotation
pub const PASSWORD_MAX_AGE_DAYS: i64 = 90;

/// A validated member number such as `AB12345`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberNumber(String);

impl MemberNumber {
    /// Trim, upper-case and validate raw input.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(MemberAuthError::validation_rule(
                "Member number is required",
                "member_number",
                "required",
            ));
        }
        if !MEMBER_NUMBER_REGEX.is_match(&normalized) {
            return Err(MemberAuthError::validation_rule(
                "Member number must be two letters followed by five digits",
                "member_number",
                "invalid_format",
            ));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Synthetic identity-provider login for members without an explicit reference
    pub fn auth_email(&self, domain: &str) -> String {
        format!("{}@{}", self.0.to_lowercase(), domain)
    }
}

impl fmt::Display for MemberNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MemberNumber {
    type Err = MemberAuthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MemberNumber {
    type Error = MemberAuthError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MemberNumber> for String {
    fn from(number: MemberNumber) -> Self {
        number.0
    }
}

/// Account status; only `Active` members can authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Pending,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Inactive => "inactive",
            MemberStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = MemberAuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(MemberStatus::Active),
            "inactive" => Ok(MemberStatus::Inactive),
            "pending" => Ok(MemberStatus::Pending),
            other => Err(MemberAuthError::validation_field(
                format!("Unknown member status '{}'", other),
                "status",
            )),
        }
    }
}

/// Failed-attempt counter and lockout window for one identity.
///
/// A `locked_until` in the past is equivalent to unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// Time left on an active lock
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.locked_until.filter(|until| *until > now).map(|until| until - now)
    }

    /// The counter as seen by the policy: an elapsed lock restarts from zero.
    pub fn effective_at(&self, now: DateTime<Utc>) -> Self {
        match self.locked_until {
            Some(until) if until <= now => Self::default(),
            _ => *self,
        }
    }
}

/// The authenticable account record for a member, collector or admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberIdentity {
    pub id: MemberId,
    pub member_number: MemberNumber,
    pub status: MemberStatus,
    pub verified: bool,
    pub lockout: LockoutState,
    pub password_reset_required: bool,
    /// External identity-provider login; derived from the member number when absent
    pub auth_identity: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemberIdentity {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Identifier handed to the identity provider
    pub fn login_identifier(&self, auth_email_domain: &str) -> String {
        match &self.auth_identity {
            Some(identity) if !identity.trim().is_empty() => identity.clone(),
            _ => self.member_number.auth_email(auth_email_domain),
        }
    }

    pub fn password_age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.password_changed_at.map(|changed| (now - changed).num_days())
    }

    /// Account hygiene score in `[0, 100]`.
    ///
    /// Second-factor authentication is not supported, so its deduction always applies.
    pub fn security_health_score(&self, now: DateTime<Utc>) -> u8 {
        let mut score: i64 = 100;
        score -= 10 * i64::from(self.lockout.effective_at(now).failed_attempts);
        if !self.verified {
            score -= 20;
        }
        score -= 20;
        let rotation_due = PASSWORD_MAX_AGE_DAYS * 8 / 10;
        match self.password_age_days(now) {
            Some(age) if age <= rotation_due => {}
            _ => score -= 20,
        }
        score.clamp(0, 100) as u8
    }
}

/// Fields required to register a member identity.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub member_number: MemberNumber,
    pub status: MemberStatus,
    pub verified: bool,
    pub password_reset_required: bool,
    pub auth_identity: Option<String>,
}

impl NewMember {
    pub fn active(member_number: MemberNumber) -> Self {
        Self {
            member_number,
            status: MemberStatus::Active,
            verified: true,
            password_reset_required: false,
            auth_identity: None,
        }
    }
}
