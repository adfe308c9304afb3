//! Ollama provider: the native `/api/chat`, `/api/generate`, and
//! `/api/embed` endpoints.
//!
//! Single-prompt conversations without tools go through `/api/generate`;
//! anything with history, a system prompt, or tools uses `/api/chat`.
//! Streaming is newline-delimited JSON rather than SSE. Sampling parameters
//! ride in the `options` object, and tool-call arguments arrive as decoded
//! objects without call ids, so ids are synthesized positionally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WormholeError};
use crate::message::{FinishReason, Message, Role, ToolCall};
use crate::provider::transport::{AuthStyle, LineStream, Transport};
use crate::provider::{Provider, ProviderConfig};
use crate::request::{
    ChunkStream, EmbeddingsRequest, EmbeddingsResponse, RequestMeta, StreamChunk, TextRequest,
    TextResponse, ToolCallDelta, Usage,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Provider speaking the native Ollama shape. Text, streaming, and
/// embeddings; audio and image keep the unsupported default.
pub struct OllamaProvider {
    transport: Transport,
    params: Map<String, Value>,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let transport = Transport::new("ollama", AuthStyle::None, DEFAULT_BASE_URL, &config)?;
        Ok(Self {
            transport,
            params: config.params,
        })
    }

    /// `/api/generate` handles the bare prompt case; everything else needs
    /// the chat endpoint.
    fn is_bare_prompt(request: &TextRequest) -> bool {
        request.tools.is_empty()
            && request.messages.len() == 1
            && request.messages[0].role == Role::User
    }

    fn sampling_options(&self, request: &TextRequest) -> Map<String, Value> {
        let mut options = self.params.clone();
        for (key, value) in &request.options {
            options.insert(key.clone(), value.clone());
        }
        if let Some(t) = request.temperature {
            options.insert("temperature".into(), Value::from(t));
        }
        if let Some(p) = request.top_p {
            options.insert("top_p".into(), Value::from(p));
        }
        if let Some(n) = request.max_tokens {
            options.insert("num_predict".into(), Value::from(n));
        }
        if let Some(s) = request.seed {
            options.insert("seed".into(), Value::from(s));
        }
        if !request.stop.is_empty() {
            options.insert("stop".into(), Value::from(request.stop.clone()));
        }
        options
    }

    fn chat_body(&self, request: &TextRequest, stream: bool) -> ChatBody {
        ChatBody {
            model: request.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            stream,
            tools: wire_tools(request),
            options: self.sampling_options(request),
        }
    }

    fn generate_body(&self, request: &TextRequest, stream: bool) -> GenerateBody {
        GenerateBody {
            model: request.model.clone(),
            prompt: request.messages[0].content.clone(),
            stream,
            options: self.sampling_options(request),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn text(&self, request: TextRequest) -> Result<TextResponse> {
        if Self::is_bare_prompt(&request) {
            let url = self.transport.url("/api/generate", request.base_url_override());
            let body = self.generate_body(&request, false);
            let response: GenerateWire = self.transport.post_json(&url, &body).await?;
            return Ok(TextResponse {
                text: response.response,
                tool_calls: Vec::new(),
                finish_reason: finish_from(response.done_reason.as_deref()),
                usage: usage_from(response.prompt_eval_count, response.eval_count),
                model: request.model,
            });
        }

        let url = self.transport.url("/api/chat", request.base_url_override());
        let body = self.chat_body(&request, false);
        let response: ChatWire = self.transport.post_json(&url, &body).await?;

        let tool_calls = decode_tool_calls(response.message.tool_calls.unwrap_or_default());
        let finish_reason = if tool_calls.is_empty() {
            finish_from(response.done_reason.as_deref())
        } else {
            FinishReason::ToolCalls
        };
        Ok(TextResponse {
            text: response.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason,
            usage: usage_from(response.prompt_eval_count, response.eval_count),
            model: request.model,
        })
    }

    async fn stream(&self, request: TextRequest) -> Result<ChunkStream> {
        if Self::is_bare_prompt(&request) {
            let url = self.transport.url("/api/generate", request.base_url_override());
            let body = self.generate_body(&request, true);
            let lines = self.transport.post_ndjson(&url, &body).await?;
            return Ok(decode_generate_stream(lines));
        }

        let url = self.transport.url("/api/chat", request.base_url_override());
        let body = self.chat_body(&request, true);
        let lines = self.transport.post_ndjson(&url, &body).await?;
        Ok(decode_chat_stream(lines))
    }

    async fn embeddings(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let url = self.transport.url("/api/embed", request.base_url_override());
        let body = EmbedBody {
            model: request.model.clone(),
            input: request.inputs.clone(),
        };
        let response: EmbedWire = self.transport.post_json(&url, &body).await?;
        if response.embeddings.len() != request.inputs.len() {
            return Err(WormholeError::provider(format!(
                "expected {} embeddings, got {}",
                request.inputs.len(),
                response.embeddings.len()
            ))
            .with_provider("ollama"));
        }
        Ok(EmbeddingsResponse {
            embeddings: response.embeddings,
            usage: None,
            model: request.model,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    options: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct GenerateBody {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Map::is_empty")]
    options: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(
                message
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };
        WireMessage {
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_calls,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// Already a decoded object on this wire, unlike the OpenAI shape.
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatWire {
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamWire {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateWire {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GenerateStreamWire {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedBody {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedWire {
    embeddings: Vec<Vec<f32>>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn wire_tools(request: &TextRequest) -> Option<Vec<Value>> {
    if request.tools.is_empty() {
        return None;
    }
    Some(
        request
            .tools
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.input_schema,
                    },
                })
            })
            .collect(),
    )
}

fn finish_from(done_reason: Option<&str>) -> FinishReason {
    match done_reason {
        Some(reason) => FinishReason::parse(reason),
        None => FinishReason::Stop,
    }
}

fn usage_from(prompt: Option<u64>, eval: Option<u64>) -> Option<Usage> {
    match (prompt, eval) {
        (None, None) => None,
        (input, output) => Some(Usage {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
        }),
    }
}

/// This wire has no call ids; synthesize them positionally so the agent
/// loop can correlate results.
fn decode_tool_calls(calls: Vec<WireToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| ToolCall::new(format!("call_{i}"), call.function.name, call.function.arguments))
        .collect()
}

fn decode_chat_stream(lines: LineStream) -> ChunkStream {
    use futures::StreamExt;

    let chunks = lines.flat_map(|line| {
        let out: Vec<Result<StreamChunk>> = match line {
            Err(err) => vec![Err(err)],
            Ok(data) => match serde_json::from_str::<ChatStreamWire>(&data) {
                Err(_) => Vec::new(),
                Ok(wire) => {
                    let mut out = Vec::new();
                    if let Some(message) = wire.message {
                        if let Some(content) = message.content {
                            if !content.is_empty() {
                                out.push(Ok(StreamChunk::delta(content)));
                            }
                        }
                        for (i, call) in message.tool_calls.unwrap_or_default().into_iter().enumerate()
                        {
                            out.push(Ok(StreamChunk::tool_call(ToolCallDelta {
                                index: i as u32,
                                id: Some(format!("call_{i}")),
                                name: Some(call.function.name),
                                arguments_fragment: call.function.arguments.to_string(),
                            })));
                        }
                    }
                    if wire.done {
                        out.push(Ok(StreamChunk::finish(finish_from(
                            wire.done_reason.as_deref(),
                        ))));
                    }
                    out
                }
            },
        };
        futures::stream::iter(out)
    });
    Box::pin(chunks)
}

fn decode_generate_stream(lines: LineStream) -> ChunkStream {
    use futures::StreamExt;

    let chunks = lines.flat_map(|line| {
        let out: Vec<Result<StreamChunk>> = match line {
            Err(err) => vec![Err(err)],
            Ok(data) => match serde_json::from_str::<GenerateStreamWire>(&data) {
                Err(_) => Vec::new(),
                Ok(wire) => {
                    let mut out = Vec::new();
                    if !wire.response.is_empty() {
                        out.push(Ok(StreamChunk::delta(wire.response)));
                    }
                    if wire.done {
                        out.push(Ok(StreamChunk::finish(finish_from(
                            wire.done_reason.as_deref(),
                        ))));
                    }
                    out
                }
            },
        };
        futures::stream::iter(out)
    });
    Box::pin(chunks)
}
