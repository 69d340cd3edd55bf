/// Bounded retry with linear backoff
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Treated as at least 1.
    pub max_attempts: u32,
    /// Wait after failed attempt `n` is `base_delay * n`
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Connection bootstrap (probe, resolve): waits 1s then 2s.
    pub const BOOTSTRAP: Self = Self::new(3, Duration::from_secs(1));

    /// Per-message delivery from the composer. Kept short so a failing send
    /// surfaces quickly instead of inheriting the bootstrap backoff.
    pub const MESSAGE_SEND: Self = Self::new(3, Duration::from_millis(250));

    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::BOOTSTRAP
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed,
/// in which case the last error is returned.
pub async fn with_retry<F, Fut, T, E>(policy: RetryPolicy, label: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_observed(policy, label, op, |_, _| {}).await
}

/// [`with_retry`] that also reports every failed attempt (1-based) to
/// `on_failure`, including the last one.
pub async fn with_retry_observed<F, Fut, T, E, O>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
    mut on_failure: O,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    O: FnMut(u32, &E),
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                on_failure(attempt, &e);
                if attempt >= max_attempts {
                    warn!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
