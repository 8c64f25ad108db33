//! Bounded retries and per-call deadlines for external operations.

use crate::errors::{MemberAuthError, Result};
use crate::observability::recorder;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry schedule for a class of operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; zero retries immediately
    pub initial_backoff: Duration,
    /// Multiplier applied per further attempt (2.0 doubles)
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Retry without delay
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Exponential backoff starting at `base`, doubling per attempt
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), initial_backoff: base, backoff_multiplier: 2.0 }
    }

    /// Backoff before the given attempt (0-indexed); the first attempt never waits.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_millis((self.initial_backoff.as_millis() as f64 * multiplier) as u64)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy
/// is exhausted. Exhaustion always surfaces as `TransientBackend` carrying the
/// attempt count.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let backoff = policy.backoff_for_attempt(attempt);
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }

        match op(attempt + 1).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    error!(
                        operation = %operation,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retries"
                    );
                    return Err(exhausted(operation, attempt, e));
                }
                recorder().record_backend_retry(operation);
                warn!(
                    operation = %operation,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = policy.backoff_for_attempt(attempt).as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
            }
        }
    }
}

fn exhausted(operation: &str, attempts: u32, e: MemberAuthError) -> MemberAuthError {
    match e {
        MemberAuthError::TransientBackend { .. } => e.with_attempts(attempts),
        other => MemberAuthError::transient(operation, other.to_string()).with_attempts(attempts),
    }
}

/// Bound a single external call by `limit`.
pub async fn with_timeout<T, Fut>(limit: Duration, operation: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MemberAuthError::timeout(operation, limit.as_millis() as u64)),
    }
}
