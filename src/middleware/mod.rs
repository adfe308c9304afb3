//! Typed middleware chain over the six capability handlers.
//!
//! A handler is an `Arc`'d async function from request to response. A
//! [`Middleware`] wraps handlers, one `wrap_*` method per capability each
//! defaulting to identity, and a [`Chain`] composes middlewares in
//! declaration order: the first-declared middleware sees the request first
//! and the response last.
//!
//! Chains are built once when the client assembles a provider and reused
//! for every call through it; per-call dispatch is a plain function call.

mod breaker;
mod cache;
mod logging;
mod metrics;
mod rate_limit;
mod retry;
mod timeout;

pub use breaker::CircuitBreakerMiddleware;
pub use cache::CacheMiddleware;
pub use logging::LoggingMiddleware;
pub use metrics::{MethodMetrics, MetricsMiddleware, MetricsSnapshot};
pub use rate_limit::RateLimitMiddleware;
pub use retry::{RetryMiddleware, RetryPolicy};
pub use timeout::TimeoutMiddleware;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::request::{
    AudioRequest, AudioResponse, ChunkStream, EmbeddingsRequest, EmbeddingsResponse, ImageRequest,
    ImageResponse, StructuredRequest, StructuredResponse, TextRequest, TextResponse,
};

/// Boxed future used by all handler types.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An async request handler for one capability.
pub type Handler<Req, Resp> = Arc<dyn Fn(Req) -> BoxFuture<Result<Resp>> + Send + Sync>;

pub type TextHandler = Handler<TextRequest, TextResponse>;
pub type StreamHandler = Handler<TextRequest, ChunkStream>;
pub type StructuredHandler = Handler<StructuredRequest, StructuredResponse>;
pub type EmbeddingsHandler = Handler<EmbeddingsRequest, EmbeddingsResponse>;
pub type AudioHandler = Handler<AudioRequest, AudioResponse>;
pub type ImageHandler = Handler<ImageRequest, ImageResponse>;

tokio::task_local! {
    /// Name of the provider a dispatch is bound for. Builders establish the
    /// scope; metrics and logging read it for their labels.
    static CURRENT_PROVIDER: String;
}

/// Runs `fut` with the provider label set for metrics and logging.
pub async fn with_provider_label<F: Future>(name: String, fut: F) -> F::Output {
    CURRENT_PROVIDER.scope(name, fut).await
}

/// The provider label of the current dispatch, `"unknown"` outside one.
pub fn provider_label() -> String {
    CURRENT_PROVIDER
        .try_with(Clone::clone)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Builds a handler from a plain async closure.
pub fn handler_fn<Req, Resp, F, Fut>(f: F) -> Handler<Req, Resp>
where
    Req: Send + 'static,
    Resp: 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// A wrapper observing or modifying one handler per capability.
///
/// Implementations override only the capabilities they care about; the
/// defaults pass the inner handler through untouched, so an empty
/// implementation is a no-op middleware.
pub trait Middleware: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str {
        "middleware"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        next
    }

    fn wrap_stream(&self, next: StreamHandler) -> StreamHandler {
        next
    }

    fn wrap_structured(&self, next: StructuredHandler) -> StructuredHandler {
        next
    }

    fn wrap_embeddings(&self, next: EmbeddingsHandler) -> EmbeddingsHandler {
        next
    }

    fn wrap_audio(&self, next: AudioHandler) -> AudioHandler {
        next
    }

    fn wrap_image(&self, next: ImageHandler) -> ImageHandler {
        next
    }
}

/// An ordered middleware list. Empty chains are identity.
#[derive(Clone, Default)]
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    // Composition folds from the inside out: the last-declared middleware
    // wraps the provider handler first, so the first-declared one ends up
    // outermost and observes the request first.

    pub fn wrap_text(&self, inner: TextHandler) -> TextHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(inner, |next, m| m.wrap_text(next))
    }

    pub fn wrap_stream(&self, inner: StreamHandler) -> StreamHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(inner, |next, m| m.wrap_stream(next))
    }

    pub fn wrap_structured(&self, inner: StructuredHandler) -> StructuredHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(inner, |next, m| m.wrap_structured(next))
    }

    pub fn wrap_embeddings(&self, inner: EmbeddingsHandler) -> EmbeddingsHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(inner, |next, m| m.wrap_embeddings(next))
    }

    pub fn wrap_audio(&self, inner: AudioHandler) -> AudioHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(inner, |next, m| m.wrap_audio(next))
    }

    pub fn wrap_image(&self, inner: ImageHandler) -> ImageHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(inner, |next, m| m.wrap_image(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records before/after observations so ordering is checkable.
    struct Probe {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Probe {
        fn wrap_text(&self, next: TextHandler) -> TextHandler {
            let label = self.label;
            let log = Arc::clone(&self.log);
            Arc::new(move |req| {
                let log = Arc::clone(&log);
                let next = Arc::clone(&next);
                Box::pin(async move {
                    log.lock().unwrap().push(format!("before:{label}"));
                    let resp = next(req).await;
                    log.lock().unwrap().push(format!("after:{label}"));
                    resp
                })
            })
        }
    }

    fn echo_handler() -> TextHandler {
        handler_fn(|req: TextRequest| async move {
            Ok(TextResponse {
                text: req.model.clone(),
                model: req.model,
                ..TextResponse::default()
            })
        })
    }

    #[tokio::test]
    async fn test_declaration_order_outside_in() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(vec![
            Arc::new(Probe {
                label: "m1",
                log: Arc::clone(&log),
            }),
            Arc::new(Probe {
                label: "m2",
                log: Arc::clone(&log),
            }),
            Arc::new(Probe {
                label: "m3",
                log: Arc::clone(&log),
            }),
        ]);

        let handler = chain.wrap_text(echo_handler());
        let resp = handler(TextRequest {
            model: "m".into(),
            ..TextRequest::default()
        })
        .await
        .unwrap();
        assert_eq!(resp.text, "m");

        let observed = log.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![
                "before:m1",
                "before:m2",
                "before:m3",
                "after:m3",
                "after:m2",
                "after:m1"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let chain = Chain::default();
        assert!(chain.is_empty());
        let handler = chain.wrap_text(echo_handler());
        let resp = handler(TextRequest {
            model: "id".into(),
            ..TextRequest::default()
        })
        .await
        .unwrap();
        assert_eq!(resp.text, "id");
    }

    #[tokio::test]
    async fn test_unimplemented_capability_passes_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(vec![Arc::new(Probe {
            label: "m1",
            log: Arc::clone(&log),
        })]);

        // Probe only wraps text; embeddings goes straight through.
        let inner = handler_fn(|req: crate::request::EmbeddingsRequest| async move {
            Ok(crate::request::EmbeddingsResponse {
                model: req.model,
                ..Default::default()
            })
        });
        let handler = chain.wrap_embeddings(inner);
        let resp = handler(crate::request::EmbeddingsRequest {
            model: "e".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(resp.model, "e");
        assert!(log.lock().unwrap().is_empty());
    }
}
