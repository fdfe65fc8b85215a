//! Readiness polling.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::Health;

/// How a monitored wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorResult {
    Ready,
    /// The ceiling elapsed before a check confirmed readiness.
    TimedOut(Duration),
    /// A check reported an unrecoverable condition.
    Failed(String),
    /// The handle or driver was destroyed; no further checks fired.
    Cancelled,
}

/// Repeatedly runs a readiness check at a fixed interval, up to a maximum
/// wait. Waiting between checks is an async sleep; no worker is occupied
/// while idle. Cancelling the token stops the wait immediately and
/// guarantees no further check fires.
#[derive(Debug, Clone, Copy)]
pub struct PullingMonitor {
    interval: Duration,
    max_wait: Duration,
}

impl PullingMonitor {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    pub async fn watch<F, Fut>(&self, cancel: &CancellationToken, mut check: F) -> MonitorResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Health>,
    {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return MonitorResult::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return MonitorResult::TimedOut(self.max_wait),
                outcome = check() => outcome,
            };
            match outcome {
                Health::Ready => return MonitorResult::Ready,
                Health::Failed(message) => return MonitorResult::Failed(message),
                Health::NotReady => {
                    debug!("environment not ready yet; rescheduling check");
                    tokio::select! {
                        _ = cancel.cancelled() => return MonitorResult::Cancelled,
                        _ = tokio::time::sleep_until(deadline) => {
                            return MonitorResult::TimedOut(self.max_wait);
                        }
                        _ = tokio::time::sleep(self.interval) => {}
                    }
                }
            }
        }
    }
}
