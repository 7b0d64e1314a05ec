//! Deadline-bounded, cancellable polling used while a command runs.

use std::time::{Duration, Instant};

use shellbridge_core::Result;
pub use tokio_util::sync::CancellationToken;

/// How long and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCondition {
    /// Maximum time to wait
    pub timeout: Duration,

    /// Polling interval between checks
    pub poll_interval: Duration,
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WaitCondition {
    /// Create a new wait condition with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The check returned true
    Met,
    /// The deadline passed first
    TimedOut,
    /// The token was cancelled first
    Cancelled,
}

/// Result of a wait operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    /// How the wait ended
    pub outcome: WaitOutcome,

    /// Time waited in milliseconds
    pub waited_ms: u64,
}

impl WaitResult {
    /// Whether the condition was met.
    pub fn condition_met(&self) -> bool {
        self.outcome == WaitOutcome::Met
    }
}

/// Poll `check` until it returns true, the timeout elapses, or `token` is
/// cancelled.
///
/// `check` runs once before the deadline is consulted, so a condition that
/// already holds is reported as met even with a zero timeout. A timeout too
/// large to add to the current instant never expires. Errors from `check`
/// end the wait immediately.
pub fn wait_for<F>(condition: &WaitCondition, token: &CancellationToken, mut check: F) -> Result<WaitResult>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    let deadline = start.checked_add(condition.timeout);

    loop {
        let finish = |outcome| WaitResult {
            outcome,
            waited_ms: start.elapsed().as_millis() as u64,
        };

        if check()? {
            return Ok(finish(WaitOutcome::Met));
        }
        if token.is_cancelled() {
            return Ok(finish(WaitOutcome::Cancelled));
        }

        let now = Instant::now();
        let nap = match deadline {
            Some(deadline) if now >= deadline => return Ok(finish(WaitOutcome::TimedOut)),
            // Never sleep past the deadline.
            Some(deadline) => condition.poll_interval.min(deadline - now),
            None => condition.poll_interval,
        };
        std::thread::sleep(nap);
    }
}
