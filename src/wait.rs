//! Time budgeting for polling loops.
//!
//! Every wait in this crate is bounded by a [`TimeBudget`]: an absolute
//! deadline captured once at the start of an operation. Retries inside the
//! operation draw down the same budget, so worst-case wall time equals the
//! caller's timeout rather than timeout × retry-count.

use std::future::Future;
use std::time::{Duration, Instant};

/// Interval between resolution attempts inside a bounded wait.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Wait applied when the caller does not pass an explicit timeout.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(300);
/// Pause between consecutive steps in an orchestrated sequence.
pub const STEP_DELAY: Duration = Duration::from_secs(2);
/// Pause between validation attempts.
pub const VALIDATION_INTERVAL: Duration = Duration::from_secs(2);
/// Validation attempts per pass when the caller does not override.
pub const VALIDATION_ATTEMPTS: u32 = 3;
/// Granularity of the whole-second countdown used by text-match waits.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Absolute wall-clock deadline over a monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    timeout: Duration,
}

impl TimeBudget {
    /// Start a budget of `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    /// Time left before the deadline. Never negative; monotonically
    /// non-increasing across calls within one wait.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }

    /// The total budget this wait started with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Suspend for `interval`, clamped to the remaining budget so a final
    /// short sleep lands on the deadline instead of overshooting it.
    pub async fn tick(&self, interval: Duration) {
        tokio::time::sleep(interval.min(self.remaining())).await;
    }
}

/// State of one bounded polling operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState<T> {
    /// The predicate has not been satisfied yet; keep going.
    Polling,
    /// The predicate was satisfied.
    Succeeded(T),
    /// The budget ran out before the predicate was satisfied.
    TimedOut,
}

impl<T> PollState<T> {
    pub fn succeeded(self) -> Option<T> {
        match self {
            PollState::Succeeded(value) => Some(value),
            _ => None,
        }
    }
}

/// Drive `probe` every `interval` until it reports success, it aborts, or
/// `budget` is exhausted. The probe runs at least once even on a zero budget,
/// and once more at the deadline after a clamped final sleep, so a wait that
/// never succeeds returns within timeout + interval of the start.
pub async fn poll_until<T, E, F, Fut>(
    budget: &TimeBudget,
    interval: Duration,
    mut probe: F,
) -> Result<PollState<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollState<T>, E>>,
{
    loop {
        match probe().await? {
            PollState::Succeeded(value) => return Ok(PollState::Succeeded(value)),
            PollState::TimedOut => return Ok(PollState::TimedOut),
            PollState::Polling => {}
        }
        if budget.is_exhausted() {
            return Ok(PollState::TimedOut);
        }
        budget.tick(interval).await;
    }
}
