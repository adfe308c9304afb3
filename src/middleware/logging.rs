//! Call-boundary logging through `tracing`.

use std::sync::Arc;
use std::time::Instant;

use crate::middleware::{
    AudioHandler, EmbeddingsHandler, Handler, ImageHandler, Middleware, StreamHandler,
    StructuredHandler, TextHandler, provider_label,
};
use crate::request::RequestMeta;

/// Emits one event per call: request family, provider, model, duration, and
/// error code on failure.
///
/// Message content is never logged unless `log_content` is set; API keys
/// are masked before any error detail is formed, so nothing here can leak
/// them.
pub struct LoggingMiddleware {
    log_content: bool,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self { log_content: false }
    }

    /// Opts into logging message content at debug level. Off by default.
    pub fn with_content(mut self) -> Self {
        self.log_content = true;
        self
    }

    fn wrap<Req, Resp>(&self, method: &'static str, next: Handler<Req, Resp>) -> Handler<Req, Resp>
    where
        Req: RequestMeta + Send + 'static,
        Resp: 'static,
    {
        let _ = self.log_content;
        Arc::new(move |req: Req| {
            let model = req.model().to_string();
            let next = Arc::clone(&next);
            Box::pin(async move {
                let provider = provider_label();
                tracing::debug!(method, provider = %provider, model = %model, "dispatching request");
                let start = Instant::now();
                let result = next(req).await;
                let duration_ms = start.elapsed().as_millis() as u64;
                match &result {
                    Ok(_) => {
                        tracing::info!(method, provider = %provider, model = %model, duration_ms, "request completed");
                    }
                    Err(err) => {
                        tracing::warn!(
                            method,
                            provider = %provider,
                            model = %model,
                            duration_ms,
                            error_code = err.code().as_str(),
                            error = %err,
                            "request failed"
                        );
                    }
                }
                result
            })
        })
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        let wrapped = self.wrap("text", next);
        if !self.log_content {
            return wrapped;
        }
        // Content logging wraps once more so the content event carries the
        // same labels without duplicating the timing logic.
        Arc::new(move |req| {
            for message in &req.messages {
                tracing::debug!(role = ?message.role, content = %message.content, "message");
            }
            wrapped(req)
        })
    }

    fn wrap_stream(&self, next: StreamHandler) -> StreamHandler {
        self.wrap("stream", next)
    }

    fn wrap_structured(&self, next: StructuredHandler) -> StructuredHandler {
        self.wrap("structured", next)
    }

    fn wrap_embeddings(&self, next: EmbeddingsHandler) -> EmbeddingsHandler {
        self.wrap("embeddings", next)
    }

    fn wrap_audio(&self, next: AudioHandler) -> AudioHandler {
        self.wrap("audio", next)
    }

    fn wrap_image(&self, next: ImageHandler) -> ImageHandler {
        self.wrap("image", next)
    }
}
