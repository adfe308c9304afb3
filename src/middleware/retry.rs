//! Retry middleware: exponential backoff with jitter, gated on the error's
//! retryable bit, honoring provider `Retry-After` hints.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::middleware::{
    AudioHandler, EmbeddingsHandler, Handler, ImageHandler, Middleware, StreamHandler,
    StructuredHandler, TextHandler,
};

/// Backoff configuration shared by the retry middleware and the per-provider
/// transport retry.
///
/// The delay before attempt `n + 1` is
/// `min(max_delay, initial_delay · 2^n)` plus up to `jitter` of itself, and
/// a provider `Retry-After` hint supersedes the computed value (still capped
/// at `max_delay`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total invocation budget, first attempt included. `1` disables
    /// retrying.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter fraction in `0.0..=1.0` added to each computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Disables retrying altogether.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Computed delay before the retry following failed attempt `attempt`
    /// (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * 2f64.powi(attempt.min(30) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = capped * (1.0 + rand::random::<f64>() * self.jitter);
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }

    /// The wait after a failure: the error's `Retry-After` hint when
    /// present, the computed backoff otherwise, capped at `max_delay`.
    pub fn wait_after(&self, err: &crate::WormholeError, attempt: u32) -> Duration {
        err.retry_after()
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.delay_for(attempt))
    }
}

/// Wraps a handler in the retry loop. Non-retryable errors pass through on
/// the first failure; retryable ones are reattempted until the budget runs
/// out, with the last error surfaced.
pub(crate) fn retry_handler<Req, Resp>(
    policy: RetryPolicy,
    next: Handler<Req, Resp>,
) -> Handler<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    Arc::new(move |req: Req| {
        let next = Arc::clone(&next);
        let policy = policy.clone();
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                let result: Result<Resp> = next(req.clone()).await;
                match result {
                    Ok(resp) => return Ok(resp),
                    Err(err) => {
                        attempt += 1;
                        if !err.retryable() || attempt >= policy.max_attempts.max(1) {
                            return Err(err);
                        }
                        let wait = policy.wait_after(&err, attempt - 1);
                        tracing::debug!(
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            error = %err,
                            "retrying after failure"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        })
    })
}

/// Middleware applying [`RetryPolicy`] uniformly across all six
/// capabilities.
///
/// For streaming, only the stream *open* is retried; failures after the
/// first chunk surface as error items on the stream. When per-provider
/// transport retry is configured, leave this middleware out (or set one of
/// the two to a single attempt) to avoid geometric attempt counts.
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        retry_handler(self.policy.clone(), next)
    }

    fn wrap_stream(&self, next: StreamHandler) -> StreamHandler {
        retry_handler(self.policy.clone(), next)
    }

    fn wrap_structured(&self, next: StructuredHandler) -> StructuredHandler {
        retry_handler(self.policy.clone(), next)
    }

    fn wrap_embeddings(&self, next: EmbeddingsHandler) -> EmbeddingsHandler {
        retry_handler(self.policy.clone(), next)
    }

    fn wrap_audio(&self, next: AudioHandler) -> AudioHandler {
        retry_handler(self.policy.clone(), next)
    }

    fn wrap_image(&self, next: ImageHandler) -> ImageHandler {
        retry_handler(self.policy.clone(), next)
    }
}
