use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// `(failures up to, delay)`, checked in order.
const TIERS: &[(u32, Duration)] = &[
    (2, Duration::from_secs(5 * 60)),
    (3, Duration::from_secs(10 * 60)),
    (5, Duration::from_secs(20 * 60)),
    (17, HOUR),
];

/// Staged retry delays for a bridge that keeps failing.
///
/// The delay stays short for the first few failures and grows to a capped
/// maximum once failures persist.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    tiers: &'static [(u32, Duration)],
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            tiers: TIERS,
            max: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Retry delay after `failures` consecutive failures.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        self.tiers
            .iter()
            .find(|(limit, _)| failures <= *limit)
            .map_or(self.max, |(_, delay)| *delay)
    }
}

/// Exponential delay for push reconnects: `initial * 2^attempt`, capped.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), MINUTE)
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// The delay before the next attempt. Each call doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}
