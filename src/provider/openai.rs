//! OpenAI provider: chat/completions, embeddings, images, and audio over
//! the OpenAI wire shape.
//!
//! This provider also serves any OpenAI-compatible endpoint (LM Studio,
//! vLLM, llama.cpp, a gateway) via [`OpenAiProvider::compatible`] with a
//! base URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WormholeError};
use crate::message::{FinishReason, Message, Role, ToolCall};
use crate::provider::transport::{AuthStyle, LineStream, Transport};
use crate::provider::{Provider, ProviderConfig};
use crate::request::{
    AudioKind, AudioRequest, AudioResponse, ChunkStream, EmbeddingsRequest, EmbeddingsResponse,
    ImageRequest, ImageResponse, GeneratedImage, RequestMeta, StreamChunk, StructuredRequest,
    StructuredResponse, TextRequest, TextResponse, ToolCallDelta, ToolChoice, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider speaking the OpenAI wire shape.
pub struct OpenAiProvider {
    name: String,
    transport: Transport,
    params: Map<String, Value>,
}

impl OpenAiProvider {
    /// The hosted OpenAI service.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Self::with_name("openai", config)
    }

    /// An OpenAI-compatible endpoint under its own provider name. The
    /// config must carry the base URL.
    pub fn compatible(name: impl Into<String>, config: ProviderConfig) -> Result<Self> {
        let name = name.into();
        if config.base_url.is_none() {
            return Err(WormholeError::config(format!(
                "OpenAI-compatible provider '{name}' requires a base_url"
            )));
        }
        Self::with_name(name, config)
    }

    fn with_name(name: impl Into<String>, config: ProviderConfig) -> Result<Self> {
        let name = name.into();
        let transport = Transport::new(name.clone(), AuthStyle::Bearer, DEFAULT_BASE_URL, &config)?;
        Ok(Self {
            name,
            transport,
            params: config.params,
        })
    }

    fn chat_body(&self, request: &TextRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            stream,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: if request.stop.is_empty() {
                None
            } else {
                Some(request.stop.clone())
            },
            seed: request.seed,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            tools: wire_tools(request),
            tool_choice: request.tool_choice.as_ref().map(wire_tool_choice),
            response_format: None,
            extra: merge_params(&self.params, &request.options),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn text(&self, request: TextRequest) -> Result<TextResponse> {
        let url = self
            .transport
            .url("/chat/completions", request.base_url_override());
        let body = self.chat_body(&request, false);
        let response: ChatResponse = self.transport.post_json(&url, &body).await?;
        decode_chat_response(response, &request.model)
            .map_err(|e| e.with_provider(&self.name).with_model(&request.model))
    }

    async fn stream(&self, request: TextRequest) -> Result<ChunkStream> {
        let url = self
            .transport
            .url("/chat/completions", request.base_url_override());
        let body = self.chat_body(&request, true);
        let lines = self.transport.post_sse(&url, &body).await?;
        Ok(decode_chat_stream(lines))
    }

    async fn structured(&self, request: StructuredRequest) -> Result<StructuredResponse> {
        let url = self
            .transport
            .url("/chat/completions", request.base_url_override());
        let schema = request.schema.to_json();
        let mut body = self.chat_body(&request.text, false);
        body.response_format = Some(serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "structured_output",
                "schema": schema,
                "strict": true,
            },
        }));

        let model = request.text.model.clone();
        let response: ChatResponse = self.transport.post_json(&url, &body).await?;
        let decoded = decode_chat_response(response, &model)
            .map_err(|e| e.with_provider(&self.name).with_model(&model))?;

        let value: Value = serde_json::from_str(&decoded.text).map_err(|e| {
            WormholeError::validation("provider returned non-JSON structured output")
                .with_provider(&self.name)
                .with_model(&model)
                .with_source(e)
        })?;
        request.schema.validate(&value)?;

        Ok(StructuredResponse {
            value,
            raw_text: Some(decoded.text),
            usage: decoded.usage,
            model: decoded.model,
        })
    }

    async fn embeddings(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let url = self
            .transport
            .url("/embeddings", request.base_url_override());
        let body = EmbeddingsBody {
            model: request.model.clone(),
            input: request.inputs.clone(),
            dimensions: request.dimensions,
            extra: merge_params(&self.params, &request.options),
        };
        let response: EmbeddingsWire = self.transport.post_json(&url, &body).await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(EmbeddingsResponse {
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            usage: response.usage.map(Usage::from),
            model: response.model.unwrap_or(request.model),
        })
    }

    async fn audio(&self, request: AudioRequest) -> Result<AudioResponse> {
        match &request.kind {
            AudioKind::Tts { text, voice } => {
                let url = self
                    .transport
                    .url("/audio/speech", request.base_url_override());
                let body = SpeechBody {
                    model: request.model.clone(),
                    input: text.clone(),
                    voice: voice.clone().unwrap_or_else(|| "alloy".to_string()),
                    response_format: request.format.clone(),
                    extra: merge_params(&self.params, &request.options),
                };
                let audio = self.transport.post_json_bytes(&url, &body).await?;
                Ok(AudioResponse {
                    audio: Some(audio),
                    text: None,
                    model: request.model,
                })
            }
            AudioKind::Stt { audio, filename } => {
                let url = self
                    .transport
                    .url("/audio/transcriptions", request.base_url_override());
                let model = request.model.clone();
                let language = request.language.clone();
                let audio = audio.clone();
                let filename = filename.clone();

                let response: TranscriptionWire = self
                    .transport
                    .post_multipart(&url, move || {
                        let mut form = reqwest::multipart::Form::new()
                            .part(
                                "file",
                                reqwest::multipart::Part::bytes(audio.clone())
                                    .file_name(filename.clone()),
                            )
                            .text("model", model.clone());
                        if let Some(lang) = &language {
                            form = form.text("language", lang.clone());
                        }
                        form
                    })
                    .await?;
                Ok(AudioResponse {
                    audio: None,
                    text: Some(response.text),
                    model: request.model,
                })
            }
        }
    }

    async fn image(&self, request: ImageRequest) -> Result<ImageResponse> {
        let url = self
            .transport
            .url("/images/generations", request.base_url_override());
        let body = ImageBody {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            n: request.count,
            size: request.size.clone(),
            quality: request.quality.clone(),
            style: request.style.clone(),
            response_format: request.response_format.clone(),
            extra: merge_params(&self.params, &request.options),
        };
        let response: ImagesWire = self.transport.post_json(&url, &body).await?;
        Ok(ImageResponse {
            images: response
                .data
                .into_iter()
                .map(|d| GeneratedImage {
                    url: d.url,
                    b64: d.b64_json,
                    revised_prompt: d.revised_prompt,
                })
                .collect(),
            model: request.model,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
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
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };
        WireMessage {
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object, decoded before it leaves the provider.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunkWire {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsBody {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsWire {
    data: Vec<EmbeddingDatum>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct SpeechBody {
    model: String,
    input: String,
    voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionWire {
    text: String,
}

#[derive(Debug, Serialize)]
struct ImageBody {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ImagesWire {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
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

fn wire_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::from("auto"),
        ToolChoice::None => Value::from("none"),
        ToolChoice::Required => Value::from("required"),
        ToolChoice::Tool(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

fn merge_params(provider: &Map<String, Value>, call: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = provider.clone();
    for (key, value) in call {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Decodes a tool call's argument string into a map. Providers are allowed
/// to send either a JSON string or an already-decoded object.
fn decode_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

fn decode_chat_response(response: ChatResponse, requested_model: &str) -> Result<TextResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| WormholeError::provider("response contained no choices"))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall::new(call.id, call.function.name, decode_arguments(&call.function.arguments)))
        .collect();

    let finish_reason = match choice.finish_reason.as_deref() {
        Some(reason) => FinishReason::parse(reason),
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };

    Ok(TextResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
        usage: response.usage.map(Usage::from),
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
    })
}

/// Maps SSE payload lines to stream chunks. One wire chunk can carry a
/// content delta, several tool-call fragments, and a finish reason; each
/// becomes its own [`StreamChunk`] so consumers see an ordered sequence.
fn decode_chat_stream(lines: LineStream) -> ChunkStream {
    use futures::StreamExt;

    let chunks = lines.flat_map(|line| {
        let out: Vec<Result<StreamChunk>> = match line {
            Err(err) => vec![Err(err)],
            Ok(data) => match serde_json::from_str::<ChatChunkWire>(&data) {
                // Unknown event payloads are skipped, not fatal.
                Err(_) => Vec::new(),
                Ok(wire) => {
                    let mut out = Vec::new();
                    for choice in wire.choices {
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                out.push(Ok(StreamChunk::delta(content)));
                            }
                        }
                        for call in choice.delta.tool_calls.unwrap_or_default() {
                            let (name, arguments_fragment) = match call.function {
                                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                                None => (None, String::new()),
                            };
                            out.push(Ok(StreamChunk::tool_call(ToolCallDelta {
                                index: call.index,
                                id: call.id,
                                name,
                                arguments_fragment,
                            })));
                        }
                        if let Some(reason) = choice.finish_reason {
                            out.push(Ok(StreamChunk::finish(FinishReason::parse(&reason))));
                        }
                    }
                    out
                }
            },
        };
        futures::stream::iter(out)
    });
    Box::pin(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_body_shape() {
        let provider = OpenAiProvider::new(ProviderConfig::new().api_key("sk-test-abcdef")).unwrap();
        let request = TextRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::system("be terse"), Message::user("hi")],
            temperature: Some(0.2),
            max_tokens: Some(64),
            stop: vec!["END".into()],
            ..TextRequest::default()
        };

        let body = serde_json::to_value(provider.chat_body(&request, false)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["stop"][0], "END");
        assert!(body.get("tools").is_none());
        assert!(body.get("seed").is_none());
    }

    #[test]
    fn test_tool_serialization_and_choice() {
        let provider = OpenAiProvider::new(ProviderConfig::new().api_key("sk-test-abcdef")).unwrap();
        let request = TextRequest {
            model: "m".into(),
            messages: vec![Message::user("add")],
            tools: vec![crate::request::ToolSpec {
                name: "add".into(),
                description: "Add numbers".into(),
                input_schema: json!({"type": "object"}),
            }],
            tool_choice: Some(ToolChoice::Tool("add".into())),
            ..TextRequest::default()
        };

        let body = serde_json::to_value(provider.chat_body(&request, false)).unwrap();
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "add");
        assert_eq!(body["tool_choice"]["function"]["name"], "add");
    }

    #[test]
    fn test_assistant_tool_calls_round_trip_to_wire() {
        let message = Message::assistant_with_tools(
            "",
            vec![ToolCall::new("call_1", "add", json!({"a": 2}))],
        );
        let wire = WireMessage::from(&message);
        let calls = wire.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "add");
        assert_eq!(decode_arguments(&calls[0].function.arguments), json!({"a": 2}));
    }

    #[test]
    fn test_decode_chat_response_happy_path() {
        let wire: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "hello" },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2 },
            "model": "m-served",
        }))
        .unwrap();

        let resp = decode_chat_response(wire, "m").unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.model, "m-served");
        assert_eq!(resp.usage.unwrap().input_tokens, 3);
    }

    #[test]
    fn test_decode_chat_response_tool_calls() {
        let wire: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "add", "arguments": "{\"a\":2,\"b\":3}" },
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        }))
        .unwrap();

        let resp = decode_chat_response(wire, "m").unwrap();
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "add");
        assert_eq!(resp.tool_calls[0].arguments, json!({"a": 2, "b": 3}));
    }

    #[test]
    fn test_decode_chat_response_empty_choices_is_error() {
        let wire: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(decode_chat_response(wire, "m").is_err());
    }

    #[tokio::test]
    async fn test_decode_chat_stream() {
        use futures::StreamExt;

        let lines: Vec<Result<String>> = vec![
            Ok(json!({"choices": [{"delta": {"content": "He"}}]}).to_string()),
            Ok(json!({"choices": [{"delta": {"content": "llo"}}]}).to_string()),
            Ok("not json, skipped".to_string()),
            Ok(json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}).to_string()),
        ];
        let stream = decode_chat_stream(Box::pin(futures::stream::iter(lines)));
        let chunks: Vec<_> = stream.collect().await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ref().unwrap().delta.as_deref(), Some("He"));
        assert_eq!(chunks[1].as_ref().unwrap().delta.as_deref(), Some("llo"));
        assert_eq!(
            chunks[2].as_ref().unwrap().finish_reason,
            Some(FinishReason::Stop)
        );
    }

    #[tokio::test]
    async fn test_decode_stream_tool_call_fragments() {
        use futures::StreamExt;

        let lines: Vec<Result<String>> = vec![
            Ok(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "add", "arguments": "{\"a\""}},
            ]}}]})
            .to_string()),
            Ok(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": ":2}"}},
            ]}, "finish_reason": "tool_calls"}]})
            .to_string()),
        ];
        let stream = decode_chat_stream(Box::pin(futures::stream::iter(lines)));
        let chunks: Vec<_> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.len(), 3);
        let first = chunks[0].tool_call.as_ref().unwrap();
        assert_eq!(first.id.as_deref(), Some("call_1"));
        assert_eq!(first.name.as_deref(), Some("add"));
        assert_eq!(first.arguments_fragment, "{\"a\"");
        let second = chunks[1].tool_call.as_ref().unwrap();
        assert_eq!(second.arguments_fragment, ":2}");
        assert_eq!(chunks[2].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_compatible_requires_base_url() {
        assert!(OpenAiProvider::compatible("local", ProviderConfig::new()).is_err());
        assert!(
            OpenAiProvider::compatible(
                "local",
                ProviderConfig::new().base_url("http://localhost:1234/v1"),
            )
            .is_ok()
        );
    }

    #[test]
    fn test_params_merge_call_wins() {
        let mut provider = Map::new();
        provider.insert("a".into(), json!(1));
        provider.insert("b".into(), json!(1));
        let mut call = Map::new();
        call.insert("b".into(), json!(2));

        let merged = merge_params(&provider, &call);
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(2)));
    }
}
