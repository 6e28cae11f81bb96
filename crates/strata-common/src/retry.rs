//! Fixed-interval retry and polling.
//!
//! Every blocking point in a lifecycle run goes through one of these helpers.
//! Intervals are constant so the worst-case wall-clock time of a run is
//! `attempts * interval`, which is what operators plan maintenance windows on.
//! All helpers observe a [`CancellationToken`] before each attempt and while
//! sleeping.
//!
//! # Example
//!
//! ```ignore
//! use strata_common::retry::{retry_fixed, RetryPolicy};
//!
//! let applied = retry_fixed(&RetryPolicy::EXECUTION, "apply", &cancel, || async {
//!     kube_utils::apply_manifest(&client, &doc).await
//! }).await?;
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use crate::Error;

/// Bounded retry with a constant delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay between attempts
    pub interval: Duration,
}

impl RetryPolicy {
    /// Policy for infrastructure calls (apply, query, clusterctl)
    pub const EXECUTION: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_secs(5),
    };

    /// Create a policy with the given attempts and interval
    pub const fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::EXECUTION
    }
}

/// Ceiling for a convergence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollCeiling {
    /// Give up once this much wall-clock time has elapsed
    Elapsed(Duration),
    /// Give up after this many checks
    Attempts(u32),
}

/// Interval and ceiling for a convergence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between checks
    pub interval: Duration,
    /// When to stop waiting
    pub ceiling: PollCeiling,
}

impl PollConfig {
    /// Control plane bring-up: 10 minutes, checked every 10 seconds
    pub const CONTROL_PLANE: PollConfig = PollConfig {
        interval: Duration::from_secs(10),
        ceiling: PollCeiling::Elapsed(Duration::from_secs(600)),
    };

    /// Version rollout: 180 checks one second apart
    pub const VERSION_CONVERGENCE: PollConfig = PollConfig {
        interval: Duration::from_secs(1),
        ceiling: PollCeiling::Attempts(180),
    };

    /// Wait bounded by wall-clock time
    pub const fn elapsed(timeout: Duration, interval: Duration) -> Self {
        Self {
            interval,
            ceiling: PollCeiling::Elapsed(timeout),
        }
    }

    /// Wait bounded by a number of checks
    pub const fn attempts(attempts: u32, interval: Duration) -> Self {
        Self {
            interval,
            ceiling: PollCeiling::Attempts(attempts),
        }
    }
}

/// Sleep for `interval` unless cancelled first.
async fn sleep_or_cancel(
    interval: Duration,
    cancel: &CancellationToken,
    operation: &str,
) -> Result<(), Error> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::cancelled(operation)),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

/// Execute an async operation, retrying retryable failures at a fixed interval.
///
/// Non-retryable errors (see [`Error::is_retryable`]) are returned at once.
/// When attempts run out the last error is returned unchanged so callers see
/// the underlying failure rather than a retry counter.
pub async fn retry_fixed<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation_name));
        }
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = policy.interval.as_millis() as u64,
                    "operation failed, retrying"
                );
                sleep_or_cancel(policy.interval, cancel, operation_name).await?;
            }
        }
    }
}

/// Poll until a condition is met or the ceiling is reached
///
/// `check_fn` returns `Ok(true)` when the condition holds and `Ok(false)` to
/// keep waiting. Errors from `check_fn` are treated as "not yet" since
/// convergence checks routinely hit objects that do not exist yet.
///
/// # Returns
/// `Ok(())` once the condition holds, [`Error::Timeout`] when the ceiling is
/// reached, or [`Error::Cancelled`] if `cancel` fires first.
pub async fn poll_until<F, Fut>(
    config: &PollConfig,
    operation: &str,
    cancel: &CancellationToken,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();
    let mut checks = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation));
        }

        checks += 1;
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(operation = %operation, checks, "condition not yet met"),
            Err(e) => {
                trace!(operation = %operation, checks, error = %e, "check failed, polling again");
                last_error = Some(e.to_string());
            }
        }

        let exhausted = match config.ceiling {
            PollCeiling::Elapsed(timeout) => start.elapsed() + config.interval > timeout,
            PollCeiling::Attempts(max) => checks >= max,
        };
        if exhausted {
            let mut message = format!("condition not met after {:?}", start.elapsed());
            if let Some(e) = last_error {
                message.push_str(&format!(" (last error: {})", e));
            }
            return Err(Error::timeout(operation, message));
        }

        sleep_or_cancel(config.interval, cancel, operation).await?;
    }
}
