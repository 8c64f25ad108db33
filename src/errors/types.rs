//! # Error Types
//!
//! Error taxonomy for the member authentication core using `thiserror`.
//!
//! Every variant carries enough detail for internal diagnostics (`Display`,
//! tracing fields), while [`MemberAuthError::user_message`] yields the safe,
//! generic text that may be shown to a non-admin caller.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Custom result type for member authentication operations
pub type Result<T> = std::result::Result<T, MemberAuthError>;

/// Main error type for the member authentication core
#[derive(thiserror::Error, Debug)]
pub enum MemberAuthError {
    /// Member or token does not exist (or is not visible, e.g. inactive member)
    #[error("Resource not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Token exists but its time-to-live has elapsed
    #[error("{resource_type} '{id}' has expired")]
    Expired { resource_type: String, id: String },

    /// Token exists but has already authorized a password change
    #[error("{resource_type} '{id}' has already been used")]
    AlreadyConsumed { resource_type: String, id: String },

    /// The external identity provider rejected the secret
    #[error("Invalid credentials")]
    InvalidCredential {
        /// Failures left before the lockout threshold trips
        attempts_remaining: Option<u32>,
    },

    /// Authentication refused during a lockout window
    #[error("Account locked until {locked_until}")]
    LockedOut { locked_until: DateTime<Utc>, remaining: Duration },

    /// Maintenance mode is enabled and the identity is not an admin
    #[error("Maintenance mode: {message}")]
    MaintenanceBlocked { message: String },

    /// Input policy violation, scoped to a field and a rule code
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String>, code: Option<String> },

    /// Backend contention that survived the retry ceiling (or is about to be retried)
    #[error("Transient backend error during {operation} after {attempts} attempt(s): {message}")]
    TransientBackend { operation: String, attempts: u32, message: String },

    /// Role synchronization exhausted its retries
    #[error("Role sync failed after {attempts} attempt(s): {message}")]
    RoleSync { attempts: u32, message: String },

    /// Actor lacks the capability required for the operation
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// An external call exceeded its deadline
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Anything not covered above
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MemberAuthError {
    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an expired error
    pub fn expired<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::Expired { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an already-consumed error
    pub fn already_consumed<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::AlreadyConsumed { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an invalid credential error
    pub fn invalid_credential(attempts_remaining: Option<u32>) -> Self {
        Self::InvalidCredential { attempts_remaining }
    }

    /// Create a lockout error from the lock expiry
    pub fn locked_out(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = (locked_until - now).to_std().unwrap_or_default();
        Self::LockedOut { locked_until, remaining }
    }

    /// Create a maintenance error carrying the configured message
    pub fn maintenance<S: Into<String>>(message: S) -> Self {
        Self::MaintenanceBlocked { message: message.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None, code: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()), code: None }
    }

    /// Create a validation error with field and rule code
    pub fn validation_rule<S, F, C>(message: S, field: F, code: C) -> Self
    where
        S: Into<String>,
        F: Into<String>,
        C: Into<String>,
    {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
            code: Some(code.into()),
        }
    }

    /// Create a transient backend error
    pub fn transient<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::TransientBackend { operation: operation.into(), attempts: 1, message: message.into() }
    }

    /// Create a role sync error
    pub fn role_sync<S: Into<String>>(attempts: u32, message: S) -> Self {
        Self::RoleSync { attempts, message: message.into() }
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create an internal server error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Record how many attempts were spent before surfacing a transient error
    pub fn with_attempts(self, attempts: u32) -> Self {
        match self {
            Self::TransientBackend { operation, message, .. } => {
                Self::TransientBackend { operation, attempts, message }
            }
            other => other,
        }
    }

    /// Stable machine-readable code, used in the password reset result contract
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Expired { .. } => "EXPIRED",
            Self::AlreadyConsumed { .. } => "ALREADY_CONSUMED",
            Self::InvalidCredential { .. } => "INVALID_CREDENTIALS",
            Self::LockedOut { .. } => "LOCKED_OUT",
            Self::MaintenanceBlocked { .. } => "MAINTENANCE",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::TransientBackend { .. } | Self::Timeout { .. } => "TRANSIENT_BACKEND_ERROR",
            Self::RoleSync { .. } => "ROLE_SYNC_FAILED",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Config { .. }
            | Self::Database { .. }
            | Self::Io { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => "UNEXPECTED_ERROR",
        }
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Expired { .. } | Self::AlreadyConsumed { .. } => 410,
            Self::InvalidCredential { .. } => 401,
            Self::LockedOut { .. } => 423,
            Self::MaintenanceBlocked { .. } => 503,
            Self::Validation { .. } => 400,
            Self::TransientBackend { .. } => 503,
            Self::RoleSync { .. } => 503,
            Self::Unauthorized { .. } => 403,
            Self::Timeout { .. } => 504,
            Self::Serialization { .. } => 400,
            Self::Config { .. }
            | Self::Database { .. }
            | Self::Io { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientBackend { .. } | Self::Timeout { .. } => true,
            Self::Database { source, .. } => is_transient_sqlx(source),
            _ => false,
        }
    }

    /// Text that is safe to show to a non-admin user.
    ///
    /// Validation, lockout and maintenance messages are user-facing by nature;
    /// everything else collapses into a generic sentence.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { resource_type, .. } if resource_type == "member" => {
                "Member not found or inactive".to_string()
            }
            Self::NotFound { .. } | Self::AlreadyConsumed { .. } => {
                "This password reset link is invalid or has expired.".to_string()
            }
            Self::Expired { .. } => {
                "This password reset link has expired. Please request a new one.".to_string()
            }
            Self::InvalidCredential { .. } => {
                "Invalid member number or password. Please check your credentials and try again."
                    .to_string()
            }
            Self::LockedOut { remaining, .. } => format!(
                "Account locked. Too many failed attempts. Please try again in {} minute(s).",
                remaining.as_secs().div_ceil(60).max(1)
            ),
            Self::MaintenanceBlocked { message } => message.clone(),
            Self::Validation { message, .. } => message.clone(),
            Self::Unauthorized { .. } => "You are not allowed to perform this action.".to_string(),
            Self::TransientBackend { .. } | Self::Timeout { .. } | Self::RoleSync { .. } => {
                "The service is temporarily unavailable. Please try again later.".to_string()
            }
            _ => "An unexpected error occurred".to_string(),
        }
    }

    /// Add context to an error (used by ErrorContext trait)
    pub(crate) fn add_context(&mut self, context: String) {
        match self {
            Self::Io { context: ref mut ctx, .. }
            | Self::Database { context: ref mut ctx, .. }
            | Self::Serialization { context: ref mut ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            Self::TransientBackend { operation, .. } => {
                *operation = format!("{}: {}", context, operation);
            }
            _ => {}
        }
    }
}

/// SQLite busy/locked and pool exhaustion are contention, not failures.
fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => {
            let message = db.message();
            message.contains("database is locked") || message.contains("database is busy")
        }
        _ => false,
    }
}

/// Extension trait to attach context to fallible results
pub trait ErrorContext<T> {
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|mut err| {
            err.add_context(context.into());
            err
        })
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for MemberAuthError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<std::io::Error> for MemberAuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for MemberAuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for MemberAuthError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<sqlx::migrate::MigrateError> for MemberAuthError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Internal {
            message: "Database migration failed".to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<validator::ValidationErrors> for MemberAuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // Only one field is reported; sort so the choice is deterministic.
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.first().and_then(|(field, errs)| errs.first().map(|e| (field, e))) {
            Some((field, err)) => {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for {}", field));
                Self::validation_rule(message, field.to_string(), err.code.to_string())
            }
            None => Self::validation("Validation failed"),
        }
    }
}
