//! Reconnection Policy
//!
//! Backoff schedule for stream reconnection. The default is linear: the
//! k-th consecutive attempt waits `base_delay * k`, and after
//! `max_attempts` consecutive failures no further attempt is scheduled.
//! Exponential backoff with jitter is available for feeds that need it.

use std::time::Duration;

use rand::Rng;

/// Growth of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// `base_delay * attempt`.
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay unit of the schedule.
    pub base_delay: Duration,
    /// Upper bound for a single exponential delay. Linear delays are uncapped.
    pub max_delay: Duration,
    /// Delay growth.
    pub strategy: BackoffStrategy,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum consecutive reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Linear,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Linear schedule without jitter.
    #[must_use]
    pub fn linear(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            ..Self::default()
        }
    }

    /// Exponential schedule with ±10% jitter.
    #[must_use]
    pub const fn exponential(
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential { multiplier },
            jitter_factor: 0.1,
            max_attempts,
        }
    }
}

/// Reconnection policy state for one connection.
///
/// # Example
///
/// ```rust
/// use market_feed::infrastructure::stream::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::linear(Duration::from_secs(3), 5));
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(6)));
///
/// // Session reached OPEN
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.scheduled_delay(self.attempt_count);
        Some(self.apply_jitter(delay))
    }

    /// Reset after a session reached `OPEN`.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt bound (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether another attempt may be scheduled.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn scheduled_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay;
        match self.config.strategy {
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Exponential { multiplier } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                #[allow(clippy::cast_precision_loss)]
                let max_millis = self.config.max_delay.as_millis() as f64;
                #[allow(clippy::cast_precision_loss)]
                let scaled = (base.as_millis() as f64 * multiplier.powi(exponent)).round();
                if scaled.is_finite() && scaled >= 0.0 {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let millis = scaled.min(max_millis) as u64;
                    Duration::from_millis(millis)
                } else {
                    self.config.max_delay
                }
            }
        }
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
