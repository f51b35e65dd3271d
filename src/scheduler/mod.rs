pub mod backoff;

use std::fmt::{self, Display};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use crate::endpoint::BridgeEndpoint;

pub use backoff::{BackoffPolicy, ExponentialBackoff};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    #[default]
    Idle,
    Polling,
    Applying,
    Failed,
}

impl Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Applying => "applying",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Decides when the next full poll of a bridge is due.
///
/// Cycle: `Idle -> Polling -> (Applying -> Idle | Failed)`. The scheduler
/// owns the endpoint's failure counter and connectivity flag: every outcome
/// of a cycle, command or push connection is recorded through it.
#[derive(Debug)]
pub struct PollScheduler {
    phase: PollPhase,
    interval: Option<Duration>,
    next_due: Option<Instant>,
    policy: BackoffPolicy,
}

impl PollScheduler {
    #[must_use]
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            phase: PollPhase::Idle,
            interval,
            next_due: None,
            policy: BackoffPolicy::default(),
        }
    }

    #[must_use]
    pub const fn phase(&self) -> PollPhase {
        self.phase
    }

    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    #[must_use]
    pub const fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| due <= now)
    }

    /// Cancel the pending timer and make a cycle due right away. The
    /// resulting cycle counts as the periodic one.
    pub fn preempt(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    /// Start a cycle. Returns false if one is already running.
    pub fn begin(&mut self) -> bool {
        if matches!(self.phase, PollPhase::Polling | PollPhase::Applying) {
            return false;
        }
        self.phase = PollPhase::Polling;
        self.next_due = None;
        true
    }

    /// Every snapshot of the cycle has arrived.
    pub fn fetched(&mut self) {
        self.phase = PollPhase::Applying;
    }

    pub fn applied(&mut self, now: Instant, endpoint: &mut BridgeEndpoint) {
        endpoint.record_success(Utc::now());
        self.phase = PollPhase::Idle;
        self.next_due = self.interval.map(|interval| now + interval);
    }

    /// The cycle failed. Returns the delay until the next attempt.
    pub fn failed(&mut self, now: Instant, endpoint: &mut BridgeEndpoint) -> Duration {
        endpoint.record_failure();
        self.phase = PollPhase::Failed;

        let delay = self
            .policy
            .delay(endpoint.failures)
            .max(self.interval.unwrap_or_default());
        self.next_due = Some(now + delay);

        log::warn!(
            "[{}] Poll failed ({} in a row), retrying in {}s",
            endpoint.name,
            endpoint.failures,
            delay.as_secs()
        );
        delay
    }

    /// Successful contact outside a poll cycle (a command or push event).
    ///
    /// Resets the failure counter. A poll held back by backoff falls back to
    /// the regular interval.
    pub fn record_contact(&mut self, now: Instant, endpoint: &mut BridgeEndpoint) {
        endpoint.record_success(Utc::now());
        if self.phase == PollPhase::Failed {
            self.phase = PollPhase::Idle;
            if let Some(interval) = self.interval {
                let regular = now + interval;
                self.next_due = Some(self.next_due.map_or(regular, |due| due.min(regular)));
            }
        }
    }

    /// Failed contact outside a poll cycle. Counted, but does not move the
    /// poll timer.
    pub fn record_failure(&mut self, endpoint: &mut BridgeEndpoint) {
        endpoint.record_failure();
    }

    pub fn set_interval(&mut self, now: Instant, interval: Option<Duration>) {
        if self.interval == interval {
            return;
        }
        self.interval = interval;
        if self.phase == PollPhase::Idle {
            self.next_due = interval.map(|interval| now + interval);
        }
    }
}
