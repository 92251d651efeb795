//! Bounded completion-polling supervisor.
//!
//! Several remote front ends finish their processing at an unpredictable
//! time with no push signal: a download control becomes clickable, or a new
//! file appears in a watched directory. This module provides the generic
//! bounded-retry loop those call sites share.
//!
//! # Overview
//!
//! A probe is invoked up to `max_attempts` times, spaced by `interval`.
//! Each invocation reports one of three outcomes:
//! - [`ProbeOutcome::Ready`] - done; the loop short-circuits with the value
//! - [`ProbeOutcome::Pending`] - still waiting; the loop sleeps and retries
//! - [`ProbeOutcome::Rejected`] - the remote side refused terminally (e.g.
//!   an error banner); the loop short-circuits with [`PollError::Rejected`]
//!
//! A probe that returns an error aborts the loop immediately — an unrelated
//! failure is fatal, not "still waiting". Exhausting the attempt budget
//! yields [`PollError::Timeout`], distinct from rejection. A cancellation
//! token is observed before each attempt and during the inter-attempt sleep
//! so an external deadline can stop the loop early.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default maximum probe attempts (mirrors the 20-attempt control wait).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default spacing between probe attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Outcome reported by a single probe invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome<T> {
    /// The awaited condition holds; carries the probe's result value.
    Ready(T),
    /// The condition does not hold yet; wait and retry.
    Pending,
    /// The remote side signalled a terminal rejection; carries its message.
    Rejected(String),
}

/// Configuration for a polling loop.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Maximum number of probe invocations (must be >= 1).
    pub max_attempts: u32,
    /// Delay between consecutive probe invocations.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl PollPolicy {
    /// Creates a policy with explicit settings.
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }
}

/// Errors produced by a polling loop.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The attempt budget was exhausted without the condition holding.
    #[error("condition not met after {attempts} attempts")]
    Timeout {
        /// Number of probe invocations made.
        attempts: u32,
    },

    /// The remote side rejected the operation terminally.
    #[error("rejected by remote: {reason}")]
    Rejected {
        /// Message extracted from the rejection signal.
        reason: String,
    },

    /// The loop was cancelled externally.
    #[error("polling cancelled")]
    Cancelled,

    /// A probe invocation failed with an unrelated error (fatal abort).
    #[error("probe failed: {source}")]
    Probe {
        /// The underlying probe error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Runs `probe` until it reports [`ProbeOutcome::Ready`], up to
/// `policy.max_attempts` invocations spaced by `policy.interval`.
///
/// # Errors
///
/// Returns [`PollError::Timeout`] when the budget is exhausted,
/// [`PollError::Rejected`] on a terminal remote rejection,
/// [`PollError::Cancelled`] when `cancel` fires, and [`PollError::Probe`]
/// when the probe itself errors.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ProbeOutcome<T>, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        match probe().await {
            Ok(ProbeOutcome::Ready(value)) => {
                debug!(attempt, "probe condition met");
                return Ok(value);
            }
            Ok(ProbeOutcome::Pending) => {
                debug!(attempt, max_attempts = policy.max_attempts, "still waiting");
            }
            Ok(ProbeOutcome::Rejected(reason)) => {
                debug!(attempt, %reason, "remote rejected");
                return Err(PollError::Rejected { reason });
            }
            Err(e) => {
                return Err(PollError::Probe {
                    source: Box::new(e),
                });
            }
        }

        // No sleep after the final attempt; the budget is already spent.
        if attempt < policy.max_attempts {
            tokio::select! {
                () = cancel.cancelled() => return Err(PollError::Cancelled),
                () = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    Err(PollError::Timeout {
        attempts: policy.max_attempts,
    })
}
