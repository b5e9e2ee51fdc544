//! Retry With Delay
//!
//! Fixed-delay retry loop with an explicit attempt bound (possibly
//! unbounded) and a cancellation token. Tests inject a zero delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between attempts.
    pub delay: Duration,
    /// Attempt bound; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    #[must_use]
    pub const fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Retry at most `max_attempts` times in total.
    #[must_use]
    pub const fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    const fn exhausted(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts >= max,
            None => false,
        }
    }
}

/// Why a retry loop stopped without a result.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The cancellation token fired.
    #[error("retry cancelled")]
    Cancelled,

    /// The attempt bound was reached.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: E,
    },
}

/// Run `op` until it succeeds, the policy is exhausted or `cancel` fires.
///
/// `op` receives the 1-based attempt number. Each failure is logged at
/// `warn`.
///
/// # Errors
///
/// Returns [`RetryError::Cancelled`] or [`RetryError::Exhausted`].
pub async fn retry_with_delay<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);

        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = op(attempt) => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if policy.exhausted(attempt) {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        tracing::warn!(
            attempt,
            delay_ms = u64::try_from(policy.delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Attempt failed, retrying"
        );

        tokio::select! {
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(policy.delay) => {}
        }
    }
}
