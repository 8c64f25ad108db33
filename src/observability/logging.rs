//! # Structured Logging
//!
//! Subscriber setup and span macros built on the tracing ecosystem.
//!
//! Security-relevant events (lockouts, resets, terminations, maintenance
//! rejections) are emitted under the [`AUDIT_TARGET`] target so they can be
//! routed separately with a filter such as `RUST_LOG=info,memberauth::audit=info`.

use crate::config::ObservabilityConfig;
use crate::errors::{MemberAuthError, Result};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tracing target for security audit events
pub const AUDIT_TARGET: &str = "memberauth::audit";

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this more than once is a
/// no-op so tests and the CLI can both call it freely.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            MemberAuthError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    // Another subscriber may already be installed (test harnesses do this).
    if let Err(e) = result {
        tracing::debug!(error = %e, "Global subscriber already installed");
    }

    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}

/// Create a tracing span for an authentication operation.
///
/// ```rust,ignore
/// let span = auth_span!("authenticate", member_number = %number);
/// ```
#[macro_export]
macro_rules! auth_span {
    ($operation:expr) => {
        tracing::info_span!(
            "auth_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "auth_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for database operations.
///
/// ```rust,ignore
/// let span = db_span!("record_failure", member_id = %id);
/// ```
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        database_in_memory = %config.database.is_in_memory(),
        lockout_threshold = config.auth.lockout_threshold,
        lockout_window_seconds = config.auth.lockout_window_seconds,
        reset_max_attempts = config.auth.reset_max_attempts,
        sync_max_attempts = config.auth.sync_max_attempts,
        metrics_enabled = %config.observability.enable_metrics,
        "Member authentication core configuration"
    );
}
