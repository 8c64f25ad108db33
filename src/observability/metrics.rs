//! # Metrics Collection
//!
//! Counters for authentication outcomes. The `metrics` facade records into a
//! no-op sink until an exporter is installed, so these calls are always safe.

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics recorder that tracks authentication metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record the outcome of an authentication attempt
    pub fn record_authentication(&self, outcome: &str) {
        counter!("auth_attempts_total", "outcome" => outcome.to_string()).increment(1);
    }

    /// Record a lockout being applied
    pub fn record_lockout(&self) {
        counter!("auth_lockouts_total").increment(1);
    }

    /// Record a password reset completion by path
    pub fn record_password_reset(&self, path: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!(
            "password_resets_total",
            "path" => path.to_string(),
            "status" => status
        )
        .increment(1);
    }

    /// Record a reset token or magic link being issued
    pub fn record_token_issued(&self, kind: &str) {
        counter!("reset_tokens_issued_total", "kind" => kind.to_string()).increment(1);
    }

    /// Record a session invalidation by reason
    pub fn record_session_invalidated(&self, reason: &str, count: u64) {
        counter!("sessions_invalidated_total", "reason" => reason.to_string()).increment(count);
    }

    /// Record the outcome of a role synchronization run
    pub fn record_role_sync(&self, success: bool, attempts: u32, duration: f64) {
        let status = if success { "success" } else { "error" };
        counter!("role_sync_total", "status" => status).increment(1);
        histogram!("role_sync_attempts").record(attempts as f64);
        histogram!("role_sync_duration_seconds").record(duration);
    }

    /// Record a retry of an external call
    pub fn record_backend_retry(&self, operation: &str) {
        counter!("backend_retries_total", "operation" => operation.to_string()).increment(1);
    }

    /// Register metric descriptions
    pub fn register_auth_metrics(&self) {
        describe_counter!(
            "auth_attempts_total",
            Unit::Count,
            "Authentication attempts by outcome"
        );
        describe_counter!("auth_lockouts_total", Unit::Count, "Lockouts applied");
        describe_counter!(
            "password_resets_total",
            Unit::Count,
            "Password changes and resets by path and status"
        );
        describe_counter!(
            "reset_tokens_issued_total",
            Unit::Count,
            "Reset tokens and magic links issued"
        );
        describe_counter!(
            "sessions_invalidated_total",
            Unit::Count,
            "Sessions invalidated by reason"
        );
        describe_counter!("role_sync_total", Unit::Count, "Role synchronization runs");
        describe_histogram!(
            "role_sync_attempts",
            Unit::Count,
            "Attempts used per role synchronization run"
        );
        describe_histogram!(
            "role_sync_duration_seconds",
            Unit::Seconds,
            "Wall time of a role synchronization run including backoff"
        );
        describe_counter!(
            "backend_retries_total",
            Unit::Count,
            "Retries of external calls by operation"
        );
    }
}

/// Process-wide recorder handle
pub fn recorder() -> MetricsRecorder {
    MetricsRecorder::new()
}

/// Initialize metrics collection and, with the `prometheus` feature, the exporter
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    install_exporter(config, &metrics_addr)?;
    recorder().register_auth_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

#[cfg(feature = "prometheus")]
fn install_exporter(config: &ObservabilityConfig, metrics_addr: &str) -> Result<()> {
    use crate::errors::MemberAuthError;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        MemberAuthError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            MemberAuthError::config(format!("Failed to initialize metrics exporter: {}", e))
        })
}

#[cfg(not(feature = "prometheus"))]
fn install_exporter(_config: &ObservabilityConfig, metrics_addr: &str) -> Result<()> {
    warn!(
        metrics_addr = %metrics_addr,
        "Metrics enabled but built without the prometheus feature; counters are not exported"
    );
    Ok(())
}
