//! Process-wide request spacing and the throttled caller built on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::llm::retry::RetryPolicy;

/// Minimum-interval limiter shared by every caller in the process.
///
/// The last-call marker sits behind an async mutex that is held across the
/// spacing sleep, so concurrent callers queue up instead of racing.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the spacing interval has passed, then stamp the marker.
    ///
    /// Returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_call.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                debug!(wait_ms = waited.as_millis() as u64, "Throttling generation call");
                tokio::time::sleep(waited).await;
            }
        }
        *last = Some(Instant::now());
        waited
    }
}

/// Wraps a provider with global spacing and the shared retry policy.
pub struct ThrottledCaller {
    inner: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl ThrottledCaller {
    pub fn new(inner: Arc<dyn LlmProvider>, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dispatch one request. Every attempt, retries included, passes the limiter first.
    pub async fn call(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let inner = &self.inner;
        let limiter = &self.limiter;
        self.policy
            .execute(inner.model_name(), || {
                let request = request.clone();
                async move {
                    limiter.acquire().await;
                    inner.complete(request).await
                }
            })
            .await
    }
}

#[async_trait]
impl LlmProvider for ThrottledCaller {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.inner.cost_per_token()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.call(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::llm::provider::{ChatMessage, FinishReason};

    /// Provider that records when it was called and fails the first `fail_first` times.
    struct RecordingLlm {
        calls: StdMutex<Vec<Instant>>,
        fail_first: usize,
    }

    impl RecordingLlm {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                fail_first,
            }
        }

        fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            calls.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };
            if n <= self.fail_first {
                return Err(LlmError::RateLimited {
                    provider: "recording".into(),
                    retry_after: None,
                });
            }
            Ok(CompletionResponse {
                content: "{}".into(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("ping")])
    }

    #[tokio::test(start_paused = true)]
    async fn first_acquire_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(1500));
        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert_eq!(limiter.acquire().await, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_spaced() {
        let inner = Arc::new(RecordingLlm::new(0));
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(1500)));
        let caller = Arc::new(ThrottledCaller::new(
            inner.clone(),
            limiter,
            RetryPolicy::default(),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let caller = Arc::clone(&caller);
            handles.push(tokio::spawn(async move { caller.call(request()).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let gaps = inner.gaps();
        assert_eq!(gaps.len(), 3);
        for gap in gaps {
            assert!(gap >= Duration::from_millis(1500), "gap {gap:?} too short");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_follows_backoff_schedule() {
        let inner = Arc::new(RecordingLlm::new(usize::MAX));
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(1500)));
        let caller = ThrottledCaller::new(inner.clone(), limiter, RetryPolicy::default());

        let result = caller.call(request()).await;
        assert!(matches!(result, Err(LlmError::RateLimited { .. })));

        let gaps: Vec<u64> = inner.gaps().into_iter().map(|g| g.as_secs()).collect();
        assert_eq!(gaps, vec![4, 8, 16, 32, 64]);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_is_shared_across_callers() {
        let inner = Arc::new(RecordingLlm::new(0));
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(2)));
        let a = ThrottledCaller::new(inner.clone(), Arc::clone(&limiter), RetryPolicy::default());
        let b = ThrottledCaller::new(inner.clone(), limiter, RetryPolicy::default());

        a.call(request()).await.unwrap();
        b.call(request()).await.unwrap();

        assert_eq!(inner.gaps(), vec![Duration::from_secs(2)]);
    }
}
