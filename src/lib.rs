//! # Wormhole
//!
//! A provider-agnostic LLM client runtime: one surface for six request
//! families (text, streaming text, structured output, embeddings, audio,
//! and image generation) dispatched to whichever backend you configure
//! (OpenAI, Anthropic, Ollama, or any OpenAI-compatible endpoint behind a
//! base URL).
//!
//! ## Key Features
//!
//! - **One client, many providers**: configure providers once, route per
//!   call with `.using("name")` or a per-call base URL
//! - **Typed errors**: a closed taxonomy with retryable bits, HTTP status,
//!   provider/model tags, and masked secrets
//! - **Resilience middleware**: retry with `Retry-After` support, circuit
//!   breaker, rate limiter, timeout, response cache, metrics, and logging,
//!   composed in declaration order across all six capabilities
//! - **Tool calling**: register async Rust handlers; the agent loop
//!   executes tool calls in parallel under safety caps and feeds results
//!   back to the model over multiple turns
//! - **Streaming-first**: SSE and NDJSON stream parsing with bounded
//!   channels, clean cancellation, and a streaming agent loop
//! - **Model registry**: capability validation, per-model constraints, and
//!   cost estimation, with a per-test escape hatch
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use wormhole::Client;
//!
//! #[tokio::main]
//! async fn main() -> wormhole::Result<()> {
//!     let client = Client::builder()
//!         .openai("sk-test-0000-demo")
//!         .build()?;
//!
//!     let response = client
//!         .text()
//!         .model("gpt-4o-mini")
//!         .prompt("What is the capital of France?")
//!         .generate()
//!         .await?;
//!
//!     println!("{}", response.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use wormhole::Client;
//!
//! # async fn demo(client: Client) -> wormhole::Result<()> {
//! let mut stream = client
//!     .text()
//!     .model("gpt-4o-mini")
//!     .prompt("Tell me a story")
//!     .stream()
//!     .await?;
//!
//! while let Some(chunk) = stream.next().await {
//!     if let Some(delta) = chunk?.delta {
//!         print!("{delta}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Tools
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wormhole::{Client, tool};
//!
//! # async fn demo() -> wormhole::Result<()> {
//! let add = tool("add", "Add two numbers")
//!     .param("a", "number")
//!     .param("b", "number")
//!     .build(|args| async move {
//!         Ok(json!(args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0)))
//!     });
//!
//! let client = Client::builder()
//!     .openai("sk-test-0000-demo")
//!     .tool(add)
//!     .build()?;
//!
//! // The agent loop executes `add` and feeds the result back.
//! let response = client
//!     .text()
//!     .model("gpt-4o-mini")
//!     .prompt("What is 2 + 3?")
//!     .generate()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **client**: option-driven assembly, provider cache with reference
//!   counting, the six builder constructors
//! - **builder**: fluent per-capability request construction, validation,
//!   model constraints, the agent loop
//! - **provider**: the uniform capability surface, shared HTTP transport,
//!   and the OpenAI / Anthropic / Ollama implementations
//! - **middleware**: the typed chain plus retry, circuit breaker, rate
//!   limiter, timeout, cache, metrics, and logging
//! - **tools**: tool definitions, the thread-safe registry, and the
//!   bounded parallel executor
//! - **registry**: the in-memory model catalog
//! - **error / message / schema / request**: the type model

mod builder;
mod client;
mod error;
mod message;
mod middleware;
mod provider;
mod registry;
mod request;
mod schema;
mod tools;
mod util;

// --- Client root ---

pub use client::{Client, ClientBuilder};

// --- Builders ---

pub use builder::{
    AudioBuilder, EmbeddingsBuilder, ImageBuilder, StreamAccumulator, StructuredBuilder,
    TextBuilder,
};

// --- Type model ---

pub use error::{ErrorCode, ErrorTags, Result, WormholeError};
pub use message::{FinishReason, Message, Role, ToolCall, ToolResult};
pub use request::{
    AudioKind, AudioRequest, AudioResponse, ChunkStream, EmbeddingsRequest, EmbeddingsResponse,
    GeneratedImage, ImageRequest, ImageResponse, RequestMeta, StreamChunk, StructuredRequest,
    StructuredResponse, TextRequest, TextResponse, ToolCallDelta, ToolChoice, ToolSpec, Usage,
};
pub use schema::{Schema, SchemaNode, StructuredMode, validate_raw};

// --- Model registry ---

pub use registry::{
    Capability, CostTable, ModelInfo, ModelRegistry, default_registry, registry_or_default,
};

// --- Providers ---

pub use provider::{
    AnthropicProvider, ApiKey, AuthStyle, OllamaProvider, OpenAiProvider, Provider,
    ProviderConfig, ProviderFactory,
};

// --- Middleware ---

pub use middleware::{
    AudioHandler, BoxFuture, CacheMiddleware, Chain, CircuitBreakerMiddleware, EmbeddingsHandler,
    Handler, ImageHandler, LoggingMiddleware, MethodMetrics, MetricsMiddleware, MetricsSnapshot,
    Middleware, RateLimitMiddleware, RetryMiddleware, RetryPolicy, StreamHandler,
    StructuredHandler, TextHandler, TimeoutMiddleware, handler_fn,
};

// --- Tool system ---

pub use tools::{Tool, ToolBuilder, ToolExecutor, ToolHandler, ToolRegistry, ToolSafetyConfig, tool};

/// The most commonly used types and functions in one import.
///
/// ```rust
/// use wormhole::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Capability, Client, ClientBuilder, ErrorCode, FinishReason, Message, ProviderConfig,
        Result, Role, Schema, SchemaNode, StreamChunk, StructuredMode, TextResponse, Tool,
        ToolCall, ToolResult, WormholeError, tool,
    };
}
