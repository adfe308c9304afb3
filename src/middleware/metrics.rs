//! Per-(provider, model, method) call metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::middleware::{
    AudioHandler, EmbeddingsHandler, Handler, ImageHandler, Middleware, StreamHandler,
    StructuredHandler, TextHandler, provider_label,
};
use crate::request::{RequestMeta, Usage};

/// Counters for one (provider, model, method) label set.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MethodMetrics {
    pub requests: u64,
    pub errors: u64,
    /// Error counts keyed by [`ErrorCode`](crate::ErrorCode) label.
    pub errors_by_code: HashMap<String, u64>,
    pub total_duration: Duration,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Point-in-time copy of every label set's counters.
pub type MetricsSnapshot = HashMap<(String, String, String), MethodMetrics>;

/// Collects request counts, error counts by code, cumulative duration, and
/// token totals for every call that passes through it. The collector is the
/// in-scope surface; serializing a snapshot to Prometheus or JSON is the
/// embedder's concern.
pub struct MetricsMiddleware {
    metrics: Arc<DashMap<(String, String, String), MethodMetrics>>,
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(DashMap::new()),
        }
    }

    /// Copies out every label set's counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Counters for one (provider, model, method) label set.
    pub fn get(&self, provider: &str, model: &str, method: &str) -> Option<MethodMetrics> {
        self.metrics
            .get(&(provider.to_string(), model.to_string(), method.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn wrap<Req, Resp>(
        &self,
        method: &'static str,
        next: Handler<Req, Resp>,
        usage_fn: impl Fn(&Resp) -> Option<Usage> + Send + Sync + 'static,
    ) -> Handler<Req, Resp>
    where
        Req: RequestMeta + Send + 'static,
        Resp: 'static,
    {
        let metrics = Arc::clone(&self.metrics);
        let usage_fn = Arc::new(usage_fn);

        Arc::new(move |req: Req| {
            let model = req.model().to_string();
            let metrics = Arc::clone(&metrics);
            let usage_fn = Arc::clone(&usage_fn);
            let next = Arc::clone(&next);
            Box::pin(async move {
                // The provider label is read at poll time so it sees the
                // dispatch scope the builder established.
                let key = (provider_label(), model, method.to_string());
                let start = Instant::now();
                let result = next(req).await;
                let elapsed = start.elapsed();

                let mut entry = metrics.entry(key).or_default();
                entry.requests += 1;
                entry.total_duration += elapsed;
                match &result {
                    Ok(resp) => {
                        if let Some(usage) = usage_fn(resp) {
                            entry.input_tokens += usage.input_tokens;
                            entry.output_tokens += usage.output_tokens;
                        }
                    }
                    Err(err) => {
                        entry.errors += 1;
                        *entry
                            .errors_by_code
                            .entry(err.code().as_str().to_string())
                            .or_default() += 1;
                    }
                }
                result
            })
        })
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        self.wrap("text", next, |resp| resp.usage)
    }

    fn wrap_stream(&self, next: StreamHandler) -> StreamHandler {
        // Stream opens are counted; per-chunk token accounting would need
        // provider usage frames, which not all providers emit.
        self.wrap("stream", next, |_| None)
    }

    fn wrap_structured(&self, next: StructuredHandler) -> StructuredHandler {
        self.wrap("structured", next, |resp| resp.usage)
    }

    fn wrap_embeddings(&self, next: EmbeddingsHandler) -> EmbeddingsHandler {
        self.wrap("embeddings", next, |resp| resp.usage)
    }

    fn wrap_audio(&self, next: AudioHandler) -> AudioHandler {
        self.wrap("audio", next, |_| None)
    }

    fn wrap_image(&self, next: ImageHandler) -> ImageHandler {
        self.wrap("image", next, |_| None)
    }
}
