//! Retry policy with exponential backoff for provider calls.

use std::time::Duration;

use crate::config::PricingConfig;

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed { delay: Duration },
    /// Delay is `base * factor^retry`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, factor, max } => {
                let scale = factor.powi(retry.min(i32::MAX as u32) as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                Duration::from_secs_f64(seconds.max(0.0))
            }
        }
    }
}

/// How many times to try each provider and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per provider, the first one included.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            attempts: config.provider_attempts.max(1),
            backoff: Backoff::Exponential {
                base: config.provider_backoff_base,
                factor: 2.0,
                max: config.provider_backoff_max,
            },
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Backoff::Fixed { delay },
        }
    }
}
