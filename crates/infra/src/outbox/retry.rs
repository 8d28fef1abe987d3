//! Backoff policy for failed outbox deliveries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear backoff: base * attempt
    #[default]
    Linear,
    /// Exponential backoff: base * 2^(attempt - 1)
    Exponential,
}

/// Retry delay configuration. Every strategy is capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before the next attempt after `attempt` failures (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> chrono::Duration {
        if attempt == 0 {
            return chrono::Duration::zero();
        }

        let base_ms = self.base_delay.as_millis();
        let max_ms = self.max_delay.as_millis().max(base_ms);

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms.saturating_mul(u128::from(attempt)),
            BackoffStrategy::Exponential => {
                let factor = 1u128.checked_shl(attempt - 1).unwrap_or(u128::MAX);
                base_ms.saturating_mul(factor)
            }
        }
        .min(max_ms);

        chrono::Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX))
    }
}
