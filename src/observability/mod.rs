//! # Observability Infrastructure
//!
//! Structured logging, audit events and metrics for the authentication core.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info, AUDIT_TARGET};
pub use metrics::{init_metrics, recorder, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and metrics
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;
    init_metrics(config)?;

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = %config.json_logging,
        metrics_enabled = %config.enable_metrics,
        "Observability initialized"
    );

    Ok(())
}
