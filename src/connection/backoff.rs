use std::time::Duration;

use rand::Rng;

use crate::config::IngestSettings;

/// Exponential reconnect policy with relative jitter and an optional cap on
/// the number of attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Relative jitter, 0.2 means every delay lands within ±20% of its base.
    pub jitter: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl Backoff {
    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self {
            initial: Duration::from_millis(settings.backoff_initial_ms),
            max: Duration::from_millis(settings.backoff_max_ms),
            multiplier: settings.backoff_multiplier,
            jitter: settings.backoff_jitter.clamp(0.0, 1.0),
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter:
    /// `initial * multiplier^(attempt-1)`, capped at `max`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// `base_delay` with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }

    /// Whether `retries` reconnect attempts use up the retry budget.
    pub fn exhausted(&self, retries: u32) -> bool {
        self.max_attempts.is_some_and(|max| retries >= max)
    }
}
