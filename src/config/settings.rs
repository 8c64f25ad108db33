//! # Configuration Settings
//!
//! Defines the configuration structure for the member authentication core.

use crate::errors::{MemberAuthError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Authentication policy configuration
    #[validate(nested)]
    pub auth: AuthConfig,

    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(MemberAuthError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Cross-field rules the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(MemberAuthError::validation_field(
                "Database URL must start with 'sqlite:'",
                "database.url",
            ));
        }

        if url::Url::parse(&self.auth.public_base_url).is_err() {
            return Err(MemberAuthError::validation_field(
                "Public base URL must be an absolute URL",
                "auth.public_base_url",
            ));
        }

        if self.auth.reset_token_ttl_seconds > self.auth.magic_link_ttl_seconds {
            return Err(MemberAuthError::validation_field(
                "Reset token TTL cannot exceed magic link TTL",
                "auth.reset_token_ttl_seconds",
            ));
        }

        Ok(())
    }
}

/// Lockout, retry and token policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// Consecutive failures that trip the lockout
    #[validate(range(min = 1, max = 100, message = "Lockout threshold must be between 1 and 100"))]
    pub lockout_threshold: u32,

    /// Length of the lockout window in seconds
    #[validate(range(
        min = 1,
        max = 604800,
        message = "Lockout window must be between 1 second and 7 days"
    ))]
    pub lockout_window_seconds: u64,

    /// Attempts for password reset backend calls (immediate retry)
    #[validate(range(min = 1, max = 10, message = "Reset attempts must be between 1 and 10"))]
    pub reset_max_attempts: u32,

    /// Attempts for role synchronization (exponential backoff)
    #[validate(range(min = 1, max = 10, message = "Sync attempts must be between 1 and 10"))]
    pub sync_max_attempts: u32,

    /// Base backoff for role synchronization in milliseconds, doubled per attempt
    pub sync_backoff_base_ms: u64,

    /// Deadline applied to each external call
    #[validate(range(
        min = 1,
        max = 120,
        message = "Call timeout must be between 1 and 120 seconds"
    ))]
    pub call_timeout_seconds: u64,

    /// Self-service reset token time-to-live
    #[validate(range(min = 60, message = "Reset token TTL must be at least 60 seconds"))]
    pub reset_token_ttl_seconds: u64,

    /// Admin-issued magic link time-to-live
    #[validate(range(min = 60, message = "Magic link TTL must be at least 60 seconds"))]
    pub magic_link_ttl_seconds: u64,

    /// Origin used to build shareable reset links
    #[validate(length(min = 1, message = "Public base URL cannot be empty"))]
    pub public_base_url: String,

    /// Domain of the synthetic identity-provider login derived from a member number
    #[validate(length(min = 1, message = "Auth email domain cannot be empty"))]
    pub auth_email_domain: String,

    /// Shown when maintenance mode is enabled without a message
    pub default_maintenance_message: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lockout_threshold: 5,
            lockout_window_seconds: 30 * 60,
            reset_max_attempts: 3,
            sync_max_attempts: 3,
            sync_backoff_base_ms: 1000,
            call_timeout_seconds: 10,
            reset_token_ttl_seconds: 60 * 60,
            magic_link_ttl_seconds: 24 * 60 * 60,
            public_base_url: "http://localhost:5173".to_string(),
            auth_email_domain: "temp.com".to_string(),
            default_maintenance_message: "System is temporarily offline for maintenance"
                .to_string(),
        }
    }
}

impl AuthConfig {
    /// Get the lockout window as Duration
    pub fn lockout_window(&self) -> Duration {
        Duration::from_secs(self.lockout_window_seconds)
    }

    /// Get the external call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Get the role sync base backoff as Duration
    pub fn sync_backoff_base(&self) -> Duration {
        Duration::from_millis(self.sync_backoff_base_ms)
    }

    /// Get the reset token TTL as Duration
    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_ttl_seconds)
    }

    /// Get the magic link TTL as Duration
    pub fn magic_link_ttl(&self) -> Duration {
        Duration::from_secs(self.magic_link_ttl_seconds)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Apply embedded migrations when the pool is created
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/memberauth.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// In-memory databases vanish with their last connection
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Single-connection in-memory database, used by tests and dry runs
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            idle_timeout_seconds: 0,
            auto_migrate: true,
            ..Default::default()
        }
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing service name
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics exporter port (0 = disabled)
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "memberauth".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
