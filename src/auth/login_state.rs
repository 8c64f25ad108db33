//! Login flow state machine.
//!
//! ```text
//! Idle -> Authenticating -> {LockedOut, InvalidCredentials, MemberNotFound,
//!                            MaintenanceBlocked, PasswordResetRequired, Authenticated}
//! Authenticated -> RoleSyncing -> Ready
//! ```
//!
//! Failure terminals return to `Idle` once acknowledged.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::credential_verifier::AuthOutcome;
use crate::errors::{MemberAuthError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    #[default]
    Idle,
    Authenticating,
    LockedOut,
    InvalidCredentials,
    MemberNotFound,
    MaintenanceBlocked,
    PasswordResetRequired,
    Authenticated,
    RoleSyncing,
    Ready,
}

impl LoginState {
    /// States an authentication attempt can end in
    pub fn is_attempt_result(&self) -> bool {
        self.is_failure() || matches!(self, LoginState::Authenticated)
    }

    /// Terminals that wait for the caller to acknowledge them
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LoginState::LockedOut
                | LoginState::InvalidCredentials
                | LoginState::MemberNotFound
                | LoginState::MaintenanceBlocked
                | LoginState::PasswordResetRequired
        )
    }

    /// The state an attempt result leads to. Errors outside the login
    /// taxonomy (invalid input, backend failures) abort back to `Idle`.
    pub fn after_attempt(result: &Result<AuthOutcome>) -> Self {
        match result {
            Ok(AuthOutcome::Authenticated(_)) => LoginState::Authenticated,
            Ok(AuthOutcome::PasswordResetRequired { .. }) => LoginState::PasswordResetRequired,
            Err(MemberAuthError::LockedOut { .. }) => LoginState::LockedOut,
            Err(MemberAuthError::InvalidCredential { .. }) => LoginState::InvalidCredentials,
            Err(MemberAuthError::NotFound { .. }) => LoginState::MemberNotFound,
            Err(MemberAuthError::MaintenanceBlocked { .. }) => LoginState::MaintenanceBlocked,
            Err(_) => LoginState::Idle,
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEvent {
    Submit,
    /// The attempt finished in the given state
    Resolved(LoginState),
    /// The attempt failed outside the login taxonomy
    Aborted,
    SyncStarted,
    /// Role sync finished; `stale` when the last known set is in use
    SyncCompleted { stale: bool },
    Acknowledge,
    SignedOut,
}

/// Apply `event` to `state`, rejecting transitions the flow does not allow.
pub fn transition(state: LoginState, event: LoginEvent) -> Result<LoginState> {
    use LoginEvent as E;
    use LoginState as S;

    let next = match (state, event) {
        (S::Idle, E::Submit) => Some(S::Authenticating),
        (S::Authenticating, E::Resolved(result)) if result.is_attempt_result() => Some(result),
        (S::Authenticating, E::Resolved(S::Idle)) | (S::Authenticating, E::Aborted) => {
            Some(S::Idle)
        }
        (S::Authenticated, E::SyncStarted) => Some(S::RoleSyncing),
        (S::RoleSyncing, E::SyncCompleted { .. }) => Some(S::Ready),
        (failed, E::Acknowledge) if failed.is_failure() => Some(S::Idle),
        (S::Authenticated | S::RoleSyncing | S::Ready, E::SignedOut) => Some(S::Idle),
        _ => None,
    };

    next.ok_or_else(|| {
        MemberAuthError::validation_field(
            format!("Invalid login transition from {} on {:?}", state, event),
            "login_state",
        )
    })
}

/// Tracks one login flow.
#[derive(Debug, Clone, Default)]
pub struct LoginFlow {
    state: LoginState,
    stale_roles: bool,
}

impl LoginFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Whether the flow reached `Ready` with a last known role set
    pub fn stale_roles(&self) -> bool {
        self.stale_roles
    }

    pub fn apply(&mut self, event: LoginEvent) -> Result<LoginState> {
        let next = transition(self.state, event)?;
        if let LoginEvent::SyncCompleted { stale } = event {
            self.stale_roles = stale;
        }
        if next == LoginState::Idle {
            self.stale_roles = false;
        }
        self.state = next;
        Ok(next)
    }

    /// Feed the result of `authenticate` into a flow that is `Authenticating`.
    pub fn record_attempt(&mut self, result: &Result<AuthOutcome>) -> Result<LoginState> {
        match LoginState::after_attempt(result) {
            LoginState::Idle => self.apply(LoginEvent::Aborted),
            state => self.apply(LoginEvent::Resolved(state)),
        }
    }
}
