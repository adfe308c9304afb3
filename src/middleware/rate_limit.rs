//! Token-bucket rate limiter applied uniformly across capabilities.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::middleware::{
    AudioHandler, EmbeddingsHandler, Handler, ImageHandler, Middleware, StreamHandler,
    StructuredHandler, TextHandler,
};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token if available, otherwise reports how long until one
    /// accrues.
    fn try_take(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

/// Awaits a bucket token before every call. Dropping a waiting caller
/// abandons the wait without consuming a token.
pub struct RateLimitMiddleware {
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimitMiddleware {
    /// `rate` tokens per second, up to `burst` accumulated.
    pub fn new(rate: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                capacity,
                rate: rate.max(f64::MIN_POSITIVE),
                last_refill: Instant::now(),
            })),
        }
    }

    fn wrap<Req, Resp>(&self, next: Handler<Req, Resp>) -> Handler<Req, Resp>
    where
        Req: Send + 'static,
        Resp: 'static,
    {
        let bucket = Arc::clone(&self.bucket);
        Arc::new(move |req: Req| {
            let bucket = Arc::clone(&bucket);
            let next = Arc::clone(&next);
            Box::pin(async move {
                loop {
                    let wait = bucket
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .try_take();
                    match wait {
                        None => break,
                        Some(delay) => tokio::time::sleep(delay).await,
                    }
                }
                next(req).await
            })
        })
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        self.wrap(next)
    }

    fn wrap_stream(&self, next: StreamHandler) -> StreamHandler {
        self.wrap(next)
    }

    fn wrap_structured(&self, next: StructuredHandler) -> StructuredHandler {
        self.wrap(next)
    }

    fn wrap_embeddings(&self, next: EmbeddingsHandler) -> EmbeddingsHandler {
        self.wrap(next)
    }

    fn wrap_audio(&self, next: AudioHandler) -> AudioHandler {
        self.wrap(next)
    }

    fn wrap_image(&self, next: ImageHandler) -> ImageHandler {
        self.wrap(next)
    }
}
