//! Failed-login lockout policy.
//!
//! Per member: `Unlocked(n) --failure--> Unlocked(n+1)` until the threshold,
//! then `Locked(until = now + window)`. An elapsed lock or an explicit reset
//! returns the member to `Unlocked(0)`.
//!
//! Check-and-increment is serialized per member in process and persisted with
//! a versioned compare-and-swap, so two simultaneous failures can never both
//! observe the same count.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::AuthConfig;
use crate::domain::{LockoutState, MemberId};
use crate::errors::{MemberAuthError, Result};
use crate::observability::{recorder, AUDIT_TARGET};
use crate::storage::{DbPool, LockoutStore, SqlxMemberRepository};
use crate::utils::KeyedLock;

/// Bound on compare-and-swap retries when another process wins the race
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Result of recording one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutDecision {
    pub locked: bool,
    /// Time left on the lock when `locked`
    pub lockout_duration: Option<Duration>,
    pub locked_until: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    /// Failures left before the threshold trips
    pub attempts_remaining: u32,
}

impl LockoutDecision {
    /// The error a login attempt ends with after this decision
    pub fn to_error(&self) -> MemberAuthError {
        match (self.locked, self.locked_until) {
            (true, Some(locked_until)) => MemberAuthError::LockedOut {
                locked_until,
                remaining: self.lockout_duration.unwrap_or_default(),
            },
            _ => MemberAuthError::invalid_credential(Some(self.attempts_remaining)),
        }
    }
}

pub struct LockoutPolicy {
    store: Arc<dyn LockoutStore>,
    locks: KeyedLock<MemberId>,
    threshold: u32,
    window: Duration,
}

impl LockoutPolicy {
    pub fn new(store: Arc<dyn LockoutStore>, threshold: u32, window: Duration) -> Self {
        Self { store, locks: KeyedLock::new(), threshold: threshold.max(1), window }
    }

    pub fn from_config(store: Arc<dyn LockoutStore>, config: &AuthConfig) -> Self {
        Self::new(store, config.lockout_threshold, config.lockout_window())
    }

    pub fn with_sqlx(pool: DbPool, config: &AuthConfig) -> Self {
        Self::from_config(Arc::new(SqlxMemberRepository::new(pool)), config)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count one failed attempt and lock the member when the threshold is reached.
    ///
    /// A member that is already locked is reported as locked without the
    /// counter moving.
    #[instrument(skip(self), fields(member_id = %member_id), name = "lockout_record_failure")]
    pub async fn record_failure(&self, member_id: &MemberId) -> Result<LockoutDecision> {
        let _guard = self.locks.lock(member_id).await;
        let window = chrono::Duration::from_std(self.window).map_err(|e| {
            MemberAuthError::config(format!("Lockout window out of range: {}", e))
        })?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let now = Utc::now();
            let current = self
                .store
                .load(member_id)
                .await?
                .ok_or_else(|| MemberAuthError::not_found("member", member_id.as_str()))?;

            if let Some(remaining) = current.state.remaining_at(now) {
                return Ok(LockoutDecision {
                    locked: true,
                    lockout_duration: remaining.to_std().ok(),
                    locked_until: current.state.locked_until,
                    failed_attempts: current.state.failed_attempts,
                    attempts_remaining: 0,
                });
            }

            let failed_attempts = current.state.effective_at(now).failed_attempts.saturating_add(1);
            let locked = failed_attempts >= self.threshold;
            let next =
                LockoutState { failed_attempts, locked_until: locked.then(|| now + window) };

            if !self.store.compare_and_set(member_id, current.version, next).await? {
                debug!(attempt, "Lockout counter changed concurrently, re-reading");
                continue;
            }

            if locked {
                recorder().record_lockout();
                warn!(
                    target: AUDIT_TARGET,
                    event = "account_locked",
                    member_id = %member_id,
                    failed_attempts,
                    window_seconds = self.window.as_secs(),
                    "Account locked after repeated failed logins"
                );
            } else {
                info!(
                    target: AUDIT_TARGET,
                    event = "login_failed",
                    member_id = %member_id,
                    failed_attempts,
                    "Failed login recorded"
                );
            }

            return Ok(LockoutDecision {
                locked,
                lockout_duration: locked.then_some(self.window),
                locked_until: next.locked_until,
                failed_attempts,
                attempts_remaining: self.threshold.saturating_sub(failed_attempts),
            });
        }

        Err(MemberAuthError::transient(
            "record_failure",
            "lockout counter kept changing under concurrent updates",
        )
        .with_attempts(MAX_CAS_ATTEMPTS))
    }

    /// Zero the counter and drop any lock.
    #[instrument(skip(self), fields(member_id = %member_id), name = "lockout_reset")]
    pub async fn reset(&self, member_id: &MemberId) -> Result<()> {
        let _guard = self.locks.lock(member_id).await;
        if !self.store.clear(member_id).await? {
            return Err(MemberAuthError::not_found("member", member_id.as_str()));
        }
        debug!("Lockout state cleared");
        Ok(())
    }

    /// Whether authentication is currently refused. Never mutates state.
    pub async fn is_locked(&self, member_id: &MemberId) -> Result<bool> {
        Ok(self.lock_status(member_id).await?.is_some())
    }

    /// Expiry of the active lock, `None` when unlocked or the lock has elapsed.
    pub async fn lock_status(&self, member_id: &MemberId) -> Result<Option<DateTime<Utc>>> {
        let current = self
            .store
            .load(member_id)
            .await?
            .ok_or_else(|| MemberAuthError::not_found("member", member_id.as_str()))?;
        let now = Utc::now();
        Ok(current.state.locked_until.filter(|_| current.state.is_locked_at(now)))
    }
}
