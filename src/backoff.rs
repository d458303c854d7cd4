use std::time::Duration;

/// Delay before the first poll of a healthy run and after every success.
pub const BASE_DELAY: Duration = Duration::from_millis(800);
/// Upper bound on any single wait.
pub const MAX_DELAY: Duration = Duration::from_millis(15_000);
/// Failure count past which the exponent stops growing.
pub const BACKOFF_CAP: u32 = 5;

/// Maps consecutive poll failures to the wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub cap: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: BASE_DELAY,
            max: MAX_DELAY,
            cap: BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    /// `min(max, base * 2^min(failures, cap))`
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.min(self.cap).min(30);
        self.base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max)
            .min(self.max)
    }
}
