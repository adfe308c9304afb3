//! Anthropic provider: the Messages API.
//!
//! Differences from the OpenAI shape the transport has to absorb: auth via
//! `x-api-key` plus a pinned `anthropic-version` header, a required
//! `max_tokens`, a top-level `system` field, content blocks instead of a
//! content string, and tool results travelling as user-role content blocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WormholeError};
use crate::message::{FinishReason, Message, Role, ToolCall};
use crate::provider::transport::{AuthStyle, LineStream, Transport};
use crate::provider::{Provider, ProviderConfig};
use crate::request::{
    ChunkStream, RequestMeta, StreamChunk, TextRequest, TextResponse, ToolCallDelta, ToolChoice,
    Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Provider speaking the Anthropic Messages shape. Text, streaming, and
/// tool calling; embeddings, audio, and image keep the unsupported default.
pub struct AnthropicProvider {
    transport: Transport,
    params: Map<String, Value>,
}

impl AnthropicProvider {
    pub fn new(mut config: ProviderConfig) -> Result<Self> {
        if !config
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("anthropic-version"))
        {
            config
                .headers
                .push(("anthropic-version".to_string(), API_VERSION.to_string()));
        }
        let transport = Transport::new(
            "anthropic",
            AuthStyle::ApiKeyHeader,
            DEFAULT_BASE_URL,
            &config,
        )?;
        Ok(Self {
            transport,
            params: config.params,
        })
    }

    fn body(&self, request: &TextRequest, stream: bool) -> MessagesRequest {
        let (system, messages) = convert_messages(&request.messages);
        let mut extra = self.params.clone();
        for (key, value) in &request.options {
            extra.insert(key.clone(), value.clone());
        }

        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: if request.stop.is_empty() {
                None
            } else {
                Some(request.stop.clone())
            },
            stream,
            tools: wire_tools(request),
            tool_choice: request.tool_choice.as_ref().map(wire_tool_choice),
            extra,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn text(&self, request: TextRequest) -> Result<TextResponse> {
        let url = self
            .transport
            .url("/v1/messages", request.base_url_override());
        let body = self.body(&request, false);
        let response: MessagesResponse = self.transport.post_json(&url, &body).await?;
        decode_response(response, &request.model)
            .map_err(|e| e.with_provider("anthropic").with_model(&request.model))
    }

    async fn stream(&self, request: TextRequest) -> Result<ChunkStream> {
        let url = self
            .transport
            .url("/v1/messages", request.base_url_override());
        let body = self.body(&request, true);
        let lines = self.transport.post_sse(&url, &body).await?;
        Ok(decode_stream(lines))
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// One SSE event from the Messages streaming API. Unknown event types are
/// skipped rather than failing the stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockStart {
        index: u32,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: DeltaBlock,
    },
    MessageDelta {
        delta: MessageDeltaBody,
    },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaBlock {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Splits out the system prompt (a top-level field on this wire) and maps
/// the rest: assistant tool calls become `tool_use` blocks, tool-role
/// results become user-role `tool_result` blocks.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system = None;
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => {
                system = Some(message.content.clone());
            }
            Role::User => {
                wire.push(WireMessage {
                    role: "user",
                    content: Value::String(message.content.clone()),
                });
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(serde_json::json!({
                        "type": "text",
                        "text": message.content,
                    }));
                }
                for call in &message.tool_calls {
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                wire.push(WireMessage {
                    role: "assistant",
                    content: Value::Array(blocks),
                });
            }
            Role::Tool => {
                wire.push(WireMessage {
                    role: "user",
                    content: serde_json::json!([{
                        "type": "tool_result",
                        "tool_use_id": message.tool_call_id,
                        "content": message.content,
                    }]),
                });
            }
        }
    }
    (system, wire)
}

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
                    "name": spec.name,
                    "description": spec.description,
                    "input_schema": spec.input_schema,
                })
            })
            .collect(),
    )
}

fn wire_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto | ToolChoice::None => serde_json::json!({"type": "auto"}),
        ToolChoice::Required => serde_json::json!({"type": "any"}),
        ToolChoice::Tool(name) => serde_json::json!({"type": "tool", "name": name}),
    }
}

fn decode_response(response: MessagesResponse, requested_model: &str) -> Result<TextResponse> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input));
            }
            ContentBlock::Unknown => {}
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return Err(WormholeError::provider("response contained no content"));
    }

    let finish_reason = match response.stop_reason.as_deref() {
        Some(reason) => FinishReason::parse(reason),
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };

    Ok(TextResponse {
        text,
        tool_calls,
        finish_reason,
        usage: response.usage.map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
    })
}

/// Maps Messages SSE events to stream chunks. `tool_use` block starts carry
/// the id and name for their index; `input_json_delta` events carry the
/// argument fragments; the stop reason arrives in `message_delta`.
fn decode_stream(lines: LineStream) -> ChunkStream {
    use futures::StreamExt;

    let chunks = lines.flat_map(|line| {
        let out: Vec<Result<StreamChunk>> = match line {
            Err(err) => vec![Err(err)],
            Ok(data) => match serde_json::from_str::<StreamEvent>(&data) {
                Err(_) => Vec::new(),
                Ok(StreamEvent::ContentBlockStart {
                    index,
                    content_block: StartBlock::ToolUse { id, name },
                }) => vec![Ok(StreamChunk::tool_call(ToolCallDelta {
                    index,
                    id: Some(id),
                    name: Some(name),
                    arguments_fragment: String::new(),
                }))],
                Ok(StreamEvent::ContentBlockStart { .. }) => Vec::new(),
                Ok(StreamEvent::ContentBlockDelta { index, delta }) => match delta {
                    DeltaBlock::TextDelta { text } => vec![Ok(StreamChunk::delta(text))],
                    DeltaBlock::InputJsonDelta { partial_json } => {
                        vec![Ok(StreamChunk::tool_call(ToolCallDelta {
                            index,
                            id: None,
                            name: None,
                            arguments_fragment: partial_json,
                        }))]
                    }
                    DeltaBlock::Other => Vec::new(),
                },
                Ok(StreamEvent::MessageDelta { delta }) => match delta.stop_reason {
                    Some(reason) => vec![Ok(StreamChunk::finish(FinishReason::parse(&reason)))],
                    None => Vec::new(),
                },
                Ok(StreamEvent::MessageStop) | Ok(StreamEvent::Other) => Vec::new(),
            },
        };
        futures::stream::iter(out)
    });
    Box::pin(chunks)
}
