//! Retry policy shared by every outbound generation call.
//!
//! Rate-limit responses back off geometrically (`base * multiplier^attempt`),
//! transport failures retry on a short fixed delay, everything else is fatal.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::LlmError;

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Rate limited: exponential backoff.
    Backoff,
    /// Connection error or timeout: fixed delay.
    Fixed,
    /// Not worth retrying.
    Fatal,
}

/// Bounded retry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after a rate-limit response.
    pub max_rate_limit_retries: u32,
    /// First backoff wait.
    pub base_delay: Duration,
    /// Growth factor between consecutive backoff waits.
    pub multiplier: u32,
    /// Retries allowed after a transport failure.
    pub max_transport_retries: u32,
    /// Wait between transport retries.
    pub transport_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 5,
            base_delay: Duration::from_secs(4),
            multiplier: 2,
            max_transport_retries: 2,
            transport_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// The retryable-error predicate.
    pub fn classify(err: &LlmError) -> RetryClass {
        match err {
            LlmError::RateLimited { .. } => RetryClass::Backoff,
            LlmError::Transport { .. } | LlmError::Timeout { .. } => RetryClass::Fixed,
            _ => RetryClass::Fatal,
        }
    }

    /// Wait before rate-limit retry number `attempt` (zero based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.multiplier.saturating_pow(attempt))
    }

    /// Every backoff wait the policy would take before giving up.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (0..self.max_rate_limit_retries)
            .map(|attempt| self.backoff_delay(attempt))
            .collect()
    }

    /// Run `op` until it succeeds, fails fatally, or a retry budget runs out.
    ///
    /// When a budget is exhausted the last error is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut rate_limited = 0u32;
        let mut transport = 0u32;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let wait = match Self::classify(&err) {
                RetryClass::Fatal => return Err(err),
                RetryClass::Backoff => {
                    if rate_limited >= self.max_rate_limit_retries {
                        warn!(
                            provider,
                            retries = rate_limited,
                            "Rate limit retries exhausted"
                        );
                        return Err(err);
                    }
                    let mut wait = self.backoff_delay(rate_limited);
                    if let LlmError::RateLimited {
                        retry_after: Some(hint),
                        ..
                    } = &err
                    {
                        wait = wait.max(*hint);
                    }
                    rate_limited += 1;
                    wait
                }
                RetryClass::Fixed => {
                    if transport >= self.max_transport_retries {
                        warn!(provider, retries = transport, error = %err, "Transport retries exhausted");
                        return Err(err);
                    }
                    transport += 1;
                    self.transport_delay
                }
            };

            warn!(
                provider,
                error = %err,
                wait_secs = wait.as_secs_f64(),
                "Generation call failed, retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn rate_limited() -> LlmError {
        LlmError::RateLimited {
            provider: "test".into(),
            retry_after: None,
        }
    }

    #[test]
    fn default_schedule_is_geometric() {
        let schedule: Vec<u64> = RetryPolicy::default()
            .backoff_schedule()
            .into_iter()
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(schedule, vec![4, 8, 16, 32, 64]);
    }

    #[test]
    fn classify_errors() {
        assert_eq!(RetryPolicy::classify(&rate_limited()), RetryClass::Backoff);
        assert_eq!(
            RetryPolicy::classify(&LlmError::Timeout {
                provider: "t".into(),
                timeout: Duration::from_secs(30)
            }),
            RetryClass::Fixed
        );
        assert_eq!(
            RetryPolicy::classify(&LlmError::RequestFailed {
                provider: "t".into(),
                reason: "500".into()
            }),
            RetryClass::Fatal
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ceiling_with_last_error() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result: Result<(), LlmError> = policy
            .execute("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(rate_limited())
                }
            })
            .await;

        assert!(matches!(result, Err(LlmError::RateLimited { .. })));
        // One initial attempt plus five retries.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(4 + 8 + 16 + 32 + 64));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_use_fixed_delay() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result: Result<(), LlmError> = policy
            .execute("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::Transport {
                        provider: "test".into(),
                        reason: "connection reset".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(LlmError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), LlmError> = policy
            .execute("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::AuthFailed {
                        provider: "test".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_rate_limit() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy
            .execute("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(rate_limited())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
