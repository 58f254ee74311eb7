/// Retry pacing for the relay connection.
///
/// The n-th delay is `initial * multiplier^n`, capped at `max`. The
/// attempt counter is public so callers can log it and give up after a
/// fixed number of tries.
use std::time::Duration;

pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    /// Delays handed out so far.
    pub attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1),
            attempt: 0,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn exhausted(&self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }
}
