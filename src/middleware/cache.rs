//! Response cache for deterministic calls.
//!
//! Keys are `(capability, model, stable-hash(request))`. Only calls whose
//! responses are reproducible get cached: text without tools, structured
//! output, and embeddings. Streaming, audio, and image requests bypass the
//! cache entirely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::middleware::{
    EmbeddingsHandler, Handler, Middleware, StructuredHandler, TextHandler,
};
use crate::request::{EmbeddingsRequest, RequestMeta, StructuredRequest, TextRequest};
use crate::util::stable_hash;

struct Entry {
    value: Value,
    inserted: Instant,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<u64, Entry>,
    clock: u64,
}

/// TTL + LRU response cache.
pub struct CacheMiddleware {
    ttl: Duration,
    capacity: usize,
    state: Arc<Mutex<CacheState>>,
}

impl CacheMiddleware {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Number of live entries, for tests and introspection.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wrap_cacheable<Req, Resp>(
        &self,
        next: Handler<Req, Resp>,
        key_fn: impl Fn(&Req) -> Option<u64> + Send + Sync + 'static,
    ) -> Handler<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Serialize + DeserializeOwned + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let ttl = self.ttl;
        let capacity = self.capacity;

        Arc::new(move |req: Req| {
            let key = key_fn(&req);
            let state = Arc::clone(&state);
            let next = Arc::clone(&next);
            Box::pin(async move {
                let Some(key) = key else {
                    return next(req).await;
                };

                if let Some(hit) = lookup::<Resp>(&state, key, ttl) {
                    tracing::debug!(key, "cache hit");
                    return Ok(hit);
                }

                let resp = next(req).await?;
                store(&state, key, &resp, capacity);
                Ok(resp)
            })
        })
    }
}

fn lookup<Resp: DeserializeOwned>(
    state: &Mutex<CacheState>,
    key: u64,
    ttl: Duration,
) -> Option<Resp> {
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    state.clock += 1;
    let clock = state.clock;

    let expired = match state.entries.get(&key) {
        None => return None,
        Some(entry) => entry.inserted.elapsed() > ttl,
    };
    if expired {
        state.entries.remove(&key);
        return None;
    }

    let entry = state.entries.get_mut(&key)?;
    entry.last_used = clock;
    serde_json::from_value(entry.value.clone()).ok()
}

fn store<Resp: Serialize>(state: &Mutex<CacheState>, key: u64, resp: &Resp, capacity: usize) {
    let Ok(value) = serde_json::to_value(resp) else {
        return;
    };
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    state.clock += 1;
    let clock = state.clock;

    if state.entries.len() >= capacity && !state.entries.contains_key(&key) {
        if let Some(victim) = state
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k)
        {
            state.entries.remove(&victim);
        }
    }

    state.entries.insert(
        key,
        Entry {
            value,
            inserted: Instant::now(),
            last_used: clock,
        },
    );
}

fn hash_parts(capability: &str, model: &str, body: &str) -> u64 {
    stable_hash(format!("{capability}\u{1f}{model}\u{1f}{body}").as_bytes())
}

fn text_key(req: &TextRequest) -> Option<u64> {
    // Tool-calling turns are not deterministic: the handler output depends
    // on the embedder's code, not just the request.
    if !req.tools.is_empty() {
        return None;
    }
    let body = serde_json::to_string(req).ok()?;
    Some(hash_parts("text", req.model(), &body))
}

fn structured_key(req: &StructuredRequest) -> Option<u64> {
    let body = serde_json::to_string(&serde_json::json!({
        "text": req.text,
        "schema": req.schema.to_json(),
        "mode": format!("{:?}", req.mode),
    }))
    .ok()?;
    Some(hash_parts("structured", req.model(), &body))
}

fn embeddings_key(req: &EmbeddingsRequest) -> Option<u64> {
    let body = serde_json::to_string(req).ok()?;
    Some(hash_parts("embeddings", req.model(), &body))
}

impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    fn wrap_text(&self, next: TextHandler) -> TextHandler {
        self.wrap_cacheable(next, text_key)
    }

    fn wrap_structured(&self, next: StructuredHandler) -> StructuredHandler {
        self.wrap_cacheable(next, structured_key)
    }

    fn wrap_embeddings(&self, next: EmbeddingsHandler) -> EmbeddingsHandler {
        self.wrap_cacheable(next, embeddings_key)
    }

    // stream, audio, and image keep the default pass-through: their
    // responses are either lazy or not meaningfully reproducible.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::request::{TextResponse, ToolSpec};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_handler(calls: Arc<AtomicU32>) -> TextHandler {
        handler_fn(move |req: TextRequest| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(TextResponse {
                    text: format!("reply {n}"),
                    model: req.model,
                    ..TextResponse::default()
                })
            }
        })
    }

    fn request(model: &str, prompt: &str) -> TextRequest {
        TextRequest {
            model: model.into(),
            messages: vec![crate::Message::user(prompt)],
            ..TextRequest::default()
        }
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = CacheMiddleware::new(Duration::from_secs(60), 16);
        let handler = cache.wrap_text(counting_handler(Arc::clone(&calls)));

        let a = handler(request("m", "hi")).await.unwrap();
        let b = handler(request("m", "hi")).await.unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Different prompt misses.
        handler(request("m", "bye")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tool_requests_bypass() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = CacheMiddleware::new(Duration::from_secs(60), 16);
        let handler = cache.wrap_text(counting_handler(Arc::clone(&calls)));

        let mut req = request("m", "hi");
        req.tools.push(ToolSpec {
            name: "t".into(),
            description: "d".into(),
            input_schema: serde_json::json!({}),
        });

        handler(req.clone()).await.unwrap();
        handler(req).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = CacheMiddleware::new(Duration::from_millis(30), 16);
        let handler = cache.wrap_text(counting_handler(Arc::clone(&calls)));

        handler(request("m", "hi")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handler(request("m", "hi")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = CacheMiddleware::new(Duration::from_secs(60), 2);
        let handler = cache.wrap_text(counting_handler(Arc::clone(&calls)));

        handler(request("m", "a")).await.unwrap();
        handler(request("m", "b")).await.unwrap();
        // Touch "a" so "b" is the LRU victim.
        handler(request("m", "a")).await.unwrap();
        handler(request("m", "c")).await.unwrap();
        assert_eq!(cache.len(), 2);

        // "a" is still cached; "b" was evicted.
        handler(request("m", "a")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        handler(request("m", "b")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
