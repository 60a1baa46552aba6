use std::time::Duration;

/// Exponential backoff schedule for transient remote failures.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl Backoff {
    /// Schedule with the given base delay, delay cap, and retry budget.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before retry number `attempt` (zero-based), or `None` once
    /// the retry budget is exhausted.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    /// Delay before retry number `attempt`, clamped at the cap past the
    /// retry budget, for loops that never give up.
    #[must_use]
    pub fn delay_or_cap(&self, attempt: u32) -> Duration {
        self.delay(attempt).unwrap_or(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8), 5)
    }
}
