//! Bounded status polling shared by the asynchronous-processing adapters
//!
//! Each attempt sleeps the configured interval and then asks the caller's
//! check for the remote status. The loop ends on the first terminal status,
//! after `max_attempts` attempts (`TimedOut`), or when the [`CancelFlag`] is
//! raised (`Cancelled`). A check may ask for a specific delay before the
//! next attempt ([`PollStatus::Retry`]); such hints are capped at
//! [`MAX_HINTED_DELAY`]. Without hints, total wait is bounded by
//! `max_attempts × interval`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{PlatformError, Result};

/// Longest server-suggested delay honoured between two attempts
pub const MAX_HINTED_DELAY: Duration = Duration::from_secs(60);

/// How long and how often to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Upper bound on the time spent sleeping
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(5))
    }
}

/// Shared shutdown flag checked between poll attempts
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What one status check observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    Failed(String),
    /// Not terminal yet; the string is the raw remote status for logging
    Pending(String),
    /// Not terminal yet, and the remote asked to wait `after` before checking again
    Retry { status: String, after: Duration },
}

/// Terminal result of a poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { attempts: u32 },
    Failed { attempts: u32, detail: String },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    /// Convert to the adapter error taxonomy; `Ready` is `Ok`
    pub fn into_result(self, what: &str) -> Result<()> {
        match self {
            PollOutcome::Ready { .. } => Ok(()),
            PollOutcome::Failed { detail, .. } => {
                Err(PlatformError::Processing(format!("{} failed: {}", what, detail)).into())
            }
            PollOutcome::TimedOut { attempts } => Err(PlatformError::Timeout(format!(
                "{} not ready after {} polls",
                what, attempts
            ))
            .into()),
            PollOutcome::Cancelled { attempts } => Err(PlatformError::Cancelled(format!(
                "{} polling stopped after {} polls",
                what, attempts
            ))
            .into()),
        }
    }
}

/// Poll `check` until it reports a terminal status or the budget runs out.
///
/// A check that returns `Err` is logged and treated like a non-terminal
/// status: it consumes one attempt and polling continues.
pub async fn poll_until<F, Fut>(
    what: &str,
    policy: PollPolicy,
    cancel: &CancelFlag,
    check: F,
) -> PollOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus>>,
{
    poll_until_after(what, policy, policy.interval, cancel, check).await
}

/// [`poll_until`] with an explicit delay before the first attempt, for when
/// the call that started the job already suggested one
pub async fn poll_until_after<F, Fut>(
    what: &str,
    policy: PollPolicy,
    first_delay: Duration,
    cancel: &CancelFlag,
    mut check: F,
) -> PollOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus>>,
{
    let mut delay = first_delay.min(MAX_HINTED_DELAY);
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled {
                attempts: attempt - 1,
            };
        }

        sleep(delay).await;
        delay = policy.interval;

        if cancel.is_cancelled() {
            return PollOutcome::Cancelled {
                attempts: attempt - 1,
            };
        }

        match check(attempt).await {
            Ok(PollStatus::Ready) => {
                debug!("{} poll {}/{}: ready", what, attempt, policy.max_attempts);
                return PollOutcome::Ready { attempts: attempt };
            }
            Ok(PollStatus::Failed(detail)) => {
                warn!("{} poll {}/{}: failed ({})", what, attempt, policy.max_attempts, detail);
                return PollOutcome::Failed {
                    attempts: attempt,
                    detail,
                };
            }
            Ok(PollStatus::Pending(status)) => {
                debug!("{} poll {}/{}: {}", what, attempt, policy.max_attempts, status);
            }
            Ok(PollStatus::Retry { status, after }) => {
                debug!(
                    "{} poll {}/{}: {}, next check in {:?}",
                    what, attempt, policy.max_attempts, status, after
                );
                delay = after.min(MAX_HINTED_DELAY);
            }
            Err(e) => {
                warn!("{} poll {}/{} error: {}", what, attempt, policy.max_attempts, e);
            }
        }
    }

    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
