//! Bounded suspend/retry primitive.
//!
//! Waits for an externally observable condition that can only be seen by
//! probing repeatedly. Each tick suspends for the interval, runs the probe
//! once and classifies the result:
//!
//! ```text
//! Polling ──Success──────────────▶ Succeeded
//!    │ ▲
//!    │ └─Retryable (attempts left)
//!    ├──Retryable (bound reached)──▶ Failed(Timeout)
//!    ├──Failed─────────────────────▶ Failed(Probe)
//!    └──cancel token fired─────────▶ Failed(Cancelled)
//! ```
//!
//! The primitive knows nothing about what is being probed; callers supply a
//! closure returning a [`PollOutcome`].

use std::{future::Future, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

/// Classification of a single probe.
#[derive(Debug)]
pub enum PollOutcome<T, E> {
    /// The condition holds; stop polling and return the value.
    Success(T),
    /// The condition does not hold yet, or the probe hit a transient error.
    Retryable(String),
    /// The probe hit a terminal error; stop polling immediately.
    Failed(E),
}

/// Interval and bound for one poll run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Suspension before every probe, including the first.
    pub interval: Duration,
    /// Maximum number of probes. Values below one are treated as one.
    pub max_attempts: u32,
}

impl PollOptions {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on the time spent suspended, ignoring probe latency.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts.max(1))
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

/// Terminal failure of a poll run.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("condition not met within {attempts} attempts ({budget_ms} ms)")]
    Timeout {
        attempts: u32,
        budget_ms: u128,
        last_reason: Option<String>,
    },

    #[error("{0}")]
    Probe(E),

    #[error("polling cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Map the probe error type, keeping timeout and cancellation as is.
    pub fn map_probe<F, E2>(self, f: F) -> PollError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Timeout {
                attempts,
                budget_ms,
                last_reason,
            } => PollError::Timeout {
                attempts,
                budget_ms,
                last_reason,
            },
            Self::Probe(e) => PollError::Probe(f(e)),
            Self::Cancelled { attempts } => PollError::Cancelled { attempts },
        }
    }
}

/// Probe until the condition holds, the bound is exhausted, a probe fails
/// terminally, or `cancel` fires.
///
/// The probe closure receives the 1-based attempt number. It is never invoked
/// more than `options.max_attempts` times.
pub async fn poll_with_timeout<T, E, F, Fut>(
    options: PollOptions,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollOutcome<T, E>>,
{
    let max_attempts = options.max_attempts.max(1);
    let mut last_reason = None;

    for attempt in 1..=max_attempts {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(attempt, "poll cancelled while waiting");
                return Err(PollError::Cancelled { attempts: attempt - 1 });
            },
            () = tokio::time::sleep(options.interval) => {},
        }

        match probe(attempt).await {
            PollOutcome::Success(value) => {
                debug!(attempt, "poll condition met");
                return Ok(value);
            },
            PollOutcome::Retryable(reason) => {
                debug!(attempt, max_attempts, %reason, "poll condition not met yet");
                last_reason = Some(reason);
            },
            PollOutcome::Failed(err) => {
                debug!(attempt, "poll probe failed");
                return Err(PollError::Probe(err));
            },
        }
    }

    let budget_ms = options.budget().as_millis();
    warn!(attempts = max_attempts, budget_ms, "poll bound exhausted");
    Err(PollError::Timeout {
        attempts: max_attempts,
        budget_ms,
        last_reason,
    })
}
