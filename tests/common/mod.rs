//! Shared test fixtures: a scriptable in-memory provider.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use wormhole::{
    ChunkStream, Client, ClientBuilder, EmbeddingsRequest, EmbeddingsResponse, Provider,
    ProviderConfig, Result, StreamChunk, TextRequest, TextResponse, WormholeError,
};

/// One scripted provider response, consumed in order.
pub enum MockTurn {
    /// `text()` returns this response.
    Text(TextResponse),
    /// `text()` or `stream()` fails with this error.
    Error(WormholeError),
    /// `stream()` yields these items, then ends.
    Chunks(Vec<Result<StreamChunk>>),
    /// `stream()` yields these chunks, then stalls forever. The provider's
    /// `stream_dropped` flag flips when the stream is dropped.
    StallAfter(Vec<StreamChunk>),
    /// `embeddings()` returns this response.
    Embeddings(EmbeddingsResponse),
}

/// Scriptable provider: pops one [`MockTurn`] per call and records every
/// request it sees.
pub struct MockProvider {
    name: String,
    turns: Mutex<VecDeque<MockTurn>>,
    pub text_calls: AtomicU32,
    pub stream_calls: AtomicU32,
    pub embeddings_calls: AtomicU32,
    pub requests: Mutex<Vec<TextRequest>>,
    pub stream_dropped: Arc<AtomicBool>,
    pub closed: AtomicBool,
}

impl MockProvider {
    pub fn new(turns: Vec<MockTurn>) -> Arc<Self> {
        Arc::new(Self {
            name: "mock".to_string(),
            turns: Mutex::new(turns.into()),
            text_calls: AtomicU32::new(0),
            stream_calls: AtomicU32::new(0),
            embeddings_calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn push_turn(&self, turn: MockTurn) {
        self.turns.lock().unwrap().push_back(turn);
    }

    fn pop(&self) -> MockTurn {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockTurn::Error(WormholeError::unknown(
                "mock script exhausted",
            )))
    }

    /// The messages the provider saw on its `n`-th text/stream call.
    pub fn request(&self, n: usize) -> TextRequest {
        self.requests.lock().unwrap()[n].clone()
    }

    pub fn text_call_count(&self) -> u32 {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn stream_call_count(&self) -> u32 {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

/// Keeps a drop flag alive inside a stream's closure so tests can observe
/// producer teardown.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn text(&self, request: TextRequest) -> Result<TextResponse> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match self.pop() {
            MockTurn::Text(response) => Ok(response),
            MockTurn::Error(err) => Err(err),
            _ => Err(WormholeError::unknown("mock scripted a non-text turn")),
        }
    }

    async fn stream(&self, request: TextRequest) -> Result<ChunkStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match self.pop() {
            MockTurn::Chunks(chunks) => {
                let guard = DropFlag(Arc::clone(&self.stream_dropped));
                let stream = futures::stream::iter(chunks).map(move |item| {
                    let _ = &guard;
                    item
                });
                Ok(Box::pin(stream))
            }
            MockTurn::StallAfter(chunks) => {
                let guard = DropFlag(Arc::clone(&self.stream_dropped));
                let stream = futures::stream::iter(chunks.into_iter().map(Ok))
                    .chain(futures::stream::pending())
                    .map(move |item| {
                        let _ = &guard;
                        item
                    });
                Ok(Box::pin(stream))
            }
            MockTurn::Error(err) => Err(err),
            _ => Err(WormholeError::unknown("mock scripted a non-stream turn")),
        }
    }

    async fn embeddings(&self, _request: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        self.embeddings_calls.fetch_add(1, Ordering::SeqCst);
        match self.pop() {
            MockTurn::Embeddings(response) => Ok(response),
            MockTurn::Error(err) => Err(err),
            _ => Err(WormholeError::unknown("mock scripted a non-embeddings turn")),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Response helpers.
pub fn text_response(text: &str) -> TextResponse {
    TextResponse {
        text: text.to_string(),
        model: "mock-model".to_string(),
        ..TextResponse::default()
    }
}

pub fn tool_call_response(calls: Vec<wormhole::ToolCall>) -> TextResponse {
    TextResponse {
        tool_calls: calls,
        finish_reason: wormhole::FinishReason::ToolCalls,
        model: "mock-model".to_string(),
        ..TextResponse::default()
    }
}

/// A client over one scripted mock provider, customizable via `configure`.
pub fn mock_client_with(
    turns: Vec<MockTurn>,
    configure: impl FnOnce(ClientBuilder) -> ClientBuilder,
) -> (Client, Arc<MockProvider>) {
    let provider = MockProvider::new(turns);
    let factory_provider = Arc::clone(&provider);
    let builder = Client::builder().provider(
        "mock",
        Arc::new(move |_config| Ok(Arc::clone(&factory_provider) as Arc<dyn Provider>)),
        ProviderConfig::new().dynamic_models(true),
    );
    let client = configure(builder).build().expect("mock client builds");
    (client, provider)
}

/// A client over one scripted mock provider with default options.
pub fn mock_client(turns: Vec<MockTurn>) -> (Client, Arc<MockProvider>) {
    mock_client_with(turns, |builder| builder)
}
