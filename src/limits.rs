//! Rate limiting and retry policy for provider calls.
//!
//! Every LLM and embedding call in the pipeline goes through a [`RateGate`]:
//! a token-bucket rate limiter (sustained requests-per-second with burst) in
//! front of a capped exponential-backoff retry loop. Only transient failures
//! are retried; once the retry budget is exhausted the unit is skipped by the
//! caller (fail-soft), never escalated into a pipeline abort.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use rand::Rng;
use tracing::warn;

use crate::config::ConcurrencyConfig;
use crate::error::ProviderError;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Shared gate for outbound provider traffic.
pub struct RateGate {
    limiter: DirectRateLimiter,
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RateGate {
    /// Build a gate from the concurrency configuration.
    ///
    /// # Panics
    ///
    /// Panics if `requests_per_second` is zero; [`crate::config::PipelineConfig::validate`]
    /// rejects that before a gate is ever constructed.
    #[must_use]
    pub fn new(config: &ConcurrencyConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).expect("requests_per_second must be > 0"),
        );
        Self {
            limiter: RateLimiter::direct(quota),
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        }
    }

    /// Run `op` under the rate limiter, retrying transient failures with
    /// exponential backoff and jitter up to the configured budget.
    ///
    /// `unit` names the work item for log lines only.
    pub async fn call<T, F, Fut>(&self, unit: &str, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.limiter.until_ready().await;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        unit,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .backoff_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.backoff_max);
        let jitter_ceiling = (exponential.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
        exponential + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> ConcurrencyConfig {
        ConcurrencyConfig {
            requests_per_second: 1_000,
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            ..ConcurrencyConfig::default()
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let gate = RateGate::new(&fast_config());
        let result = gate.call("unit", || async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let gate = RateGate::new(&fast_config());
        let attempts = AtomicU32::new(0);
        let result = gate
            .call("unit", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transient("429".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let gate = RateGate::new(&fast_config());
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = gate
            .call("unit", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient("still down".into()))
            })
            .await;
        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let gate = RateGate::new(&fast_config());
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = gate
            .call("unit", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Fatal("bad credentials".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
