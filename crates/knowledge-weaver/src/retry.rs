//! Bounded retry with exponential backoff and jitter for provider calls.
//!
//! Every embedding and analysis request goes through one [`RetryPolicy`].
//! Each attempt runs under its own timeout; a timeout counts as a transient
//! failure. Non-transient errors are returned immediately.
//!
//! Backoff for attempt `n` (1-based, after a failure) is
//! `min(base_delay * 2^(n-1), max_delay)` plus a uniform random jitter in
//! `[0, jitter]`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use knowledge_weaver_core::embedding::{AnalysisProvider, EmbeddingProvider};
use knowledge_weaver_core::models::{Classification, CorrectionEvent};
use knowledge_weaver_core::{Result, WeaverError};

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay before retrying after the `attempt`-th failure, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(extra)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, timeout: Duration, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(WeaverError::Timeout {
                    operation: operation.to_string(),
                    secs: timeout.as_secs(),
                }),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "provider call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }

            let wait = self.jittered(attempt);
            warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "transient provider failure, retrying after backoff"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

/// [`EmbeddingProvider`] decorator that applies a [`RetryPolicy`] and timeout.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RetryingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.policy
            .run("embed", self.timeout, || self.inner.embed(text))
            .await
    }
}

/// [`AnalysisProvider`] decorator that applies a [`RetryPolicy`] and timeout.
pub struct RetryingAnalyzer {
    inner: Arc<dyn AnalysisProvider>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryingAnalyzer {
    pub fn new(inner: Arc<dyn AnalysisProvider>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }
}

#[async_trait]
impl AnalysisProvider for RetryingAnalyzer {
    async fn analyze(&self, text: &str, few_shot: &[CorrectionEvent]) -> Result<Classification> {
        self.policy
            .run("analyze", self.timeout, || self.inner.analyze(text, few_shot))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            jitter: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(9), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(3)
            .run("embed", Duration::from_secs(5), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WeaverError::transient("503 Service Unavailable"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = policy(5)
            .run("analyze", Duration::from_secs(5), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(WeaverError::permanent("400 Bad Request"))
            })
            .await;
        assert!(matches!(result, Err(WeaverError::Provider { transient: false, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient_and_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = policy(2)
            .run("analyze", Duration::from_secs(1), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(WeaverError::Timeout { secs: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
