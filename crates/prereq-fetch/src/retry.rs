use std::time::Duration;

/// Bounded exponential backoff: one initial attempt plus `retries` more,
/// sleeping `initial_delay`, then twice that, and so on in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_delay: Duration) -> Self {
        Self {
            retries,
            initial_delay,
        }
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Sleep durations between consecutive attempts.
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.retries)
            .map(|i| self.initial_delay.saturating_mul(1u32 << i.min(31)))
            .collect()
    }
}
