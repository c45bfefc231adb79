use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use super::{EmbeddingClient, GenerationRequest, ServiceError, TextGenerator};

const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter; `max_attempts` counts the first call.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(MAX_DELAY.max(self.base_delay))
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

/// Decorator that retries retryable [`ServiceError`]s of the wrapped client.
pub struct Retrying<C> {
    inner: C,
    backoff: ExponentialBuilder,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self {
            inner,
            backoff: policy.backoff(),
        }
    }
}

fn log_retry(operation: &'static str) -> impl Fn(&ServiceError, Duration) {
    move |err: &ServiceError, delay: Duration| {
        warn!(
            operation,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "service call failed; retrying"
        );
    }
}

#[async_trait]
impl<C: TextGenerator> TextGenerator for Retrying<C> {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        (|| self.inner.generate(request.clone()))
            .retry(self.backoff.clone())
            .when(ServiceError::is_retryable)
            .notify(log_retry("generate"))
            .await
    }
}

#[async_trait]
impl<C: EmbeddingClient> EmbeddingClient for Retrying<C> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        (|| self.inner.embed(text))
            .retry(self.backoff.clone())
            .when(ServiceError::is_retryable)
            .notify(log_retry("embed"))
            .await
    }
}
