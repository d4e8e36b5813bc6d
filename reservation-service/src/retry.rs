use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::SchedulerError;

/// Jittered exponential backoff for units of work that lose a serialization race.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        let delay = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or runs out of attempts.
    ///
    /// `op` receives the attempt number and must rebuild its work from the original request.
    /// Running out of attempts on a conflict is reported as a persistence failure.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut op: F) -> Result<T, SchedulerError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, SchedulerError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!("{} gave up after {} conflicting attempts", operation, attempt);
                        return Err(SchedulerError::Persistence(format!(
                            "{operation} kept conflicting after {attempt} attempts"
                        )));
                    }
                    let delay = self.next_delay(attempt - 1);
                    warn!(
                        "{} hit a serialization conflict, retrying in {:?} (attempt {})",
                        operation, delay, attempt
                    );
                    sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 20, 500, 0.25)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, 1, 2, 0.0)
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicUsize::new(0);
        let result = quick()
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(SchedulerError::ConcurrencyConflict)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_conflicts_become_persistence_errors() {
        let result: Result<(), _> = quick()
            .run("test", |_| async { Err(SchedulerError::ConcurrencyConflict) })
            .await;
        assert!(matches!(result, Err(SchedulerError::Persistence(_))));
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = quick()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SchedulerError::NoAvailability) }
            })
            .await;
        assert_eq!(result, Err(SchedulerError::NoAvailability));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(10, 10, 50, 0.0);
        assert_eq!(policy.next_delay(0), Duration::from_millis(10));
        assert_eq!(policy.next_delay(8), Duration::from_millis(50));
    }
}
