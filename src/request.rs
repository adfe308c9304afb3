//! Request and response value objects for the six capability families.
//!
//! Every request carries the common trio (target model, provider-scoped
//! options map, optional per-call base URL override) plus its family's
//! fields. Responses mirror requests; streaming responses are a lazy, finite
//! sequence of [`StreamChunk`]s.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::message::{FinishReason, Message, ToolCall};
use crate::schema::{Schema, StructuredMode};

/// Boxed stream of chunks. Transport errors surface as `Err` items; the
/// stream ends (closes the channel) after a terminal chunk or an error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Common accessors the middleware layer needs from any request.
pub trait RequestMeta {
    /// Target model id.
    fn model(&self) -> &str;
    /// Per-call base URL override, if any.
    fn base_url_override(&self) -> Option<&str>;
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Wire-facing tool metadata: what a provider sees of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's input.
    pub input_schema: Value,
}

/// Caller policy for whether and how the model may use tools.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides.
    #[default]
    Auto,
    /// Model must not call tools.
    None,
    /// Model must call at least one tool.
    Required,
    /// Model must call the named tool.
    Tool(String),
}

/// A free-form or tool-calling chat request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TextRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    pub seed: Option<u64>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
    /// Provider-scoped options merged verbatim into the request body.
    pub options: Map<String, Value>,
    /// Per-call endpoint override; enables any OpenAI-compatible host.
    #[serde(skip)]
    pub base_url: Option<String>,
}

impl RequestMeta for TextRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn base_url_override(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

/// Response to a [`TextRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextResponse {
    /// Concatenated assistant text (may be empty on pure tool-call turns).
    pub text: String,
    /// Tool calls the model elected to make this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// The model that actually served the request.
    pub model: String,
}

impl TextResponse {
    /// The assistant [`Message`] this response represents, as appended to
    /// the conversation by the agent loop.
    pub fn to_message(&self) -> Message {
        Message::assistant_with_tools(self.text.clone(), self.tool_calls.clone())
    }
}

/// A partial tool call carried by one streaming chunk. Fragments for the
/// same `index` accumulate across chunks until the finish chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Which in-progress tool call this fragment belongs to.
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fragment of the JSON argument string; may split anywhere.
    #[serde(default)]
    pub arguments_fragment: String,
}

/// One element of a streaming response: a content delta, a partial tool
/// call, or a finish-reason terminator. Transport errors travel as the
/// stream's `Err` items instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_call: Some(delta),
            ..Self::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// True for the terminator chunk of a turn.
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// A schema-constrained output request: the text fields plus a schema and a
/// mode tag.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub text: TextRequest,
    pub schema: Schema,
    pub mode: StructuredMode,
}

impl RequestMeta for StructuredRequest {
    fn model(&self) -> &str {
        &self.text.model
    }

    fn base_url_override(&self) -> Option<&str> {
        self.text.base_url.as_deref()
    }
}

/// Response to a [`StructuredRequest`]: the validated value plus the raw
/// text it was decoded from (when the strategy produced text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub model: String,
}

/// A vector-embeddings request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub inputs: Vec<String>,
    pub dimensions: Option<u32>,
    pub options: Map<String, Value>,
    #[serde(skip)]
    pub base_url: Option<String>,
}

impl RequestMeta for EmbeddingsRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn base_url_override(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

/// Response to an [`EmbeddingsRequest`]: one vector per input, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub model: String,
}

/// Direction of an audio request.
#[derive(Debug, Clone)]
pub enum AudioKind {
    /// Text to speech: synthesize `text` into audio.
    Tts { text: String, voice: Option<String> },
    /// Speech to text: transcribe `audio` (uploaded as multipart).
    Stt { audio: Vec<u8>, filename: String },
}

/// An audio request, discriminated by [`AudioKind`].
#[derive(Debug, Clone)]
pub struct AudioRequest {
    pub model: String,
    pub kind: AudioKind,
    pub language: Option<String>,
    /// Output format for TTS (`mp3`, `wav`, ...) or response format for STT.
    pub format: Option<String>,
    pub options: Map<String, Value>,
    pub base_url: Option<String>,
}

impl RequestMeta for AudioRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn base_url_override(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

/// Response to an [`AudioRequest`]: audio bytes for TTS, a transcript for
/// STT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioResponse {
    pub audio: Option<Vec<u8>>,
    pub text: Option<String>,
    pub model: String,
}

/// An image-generation request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub style: Option<String>,
    /// Number of images to generate. Providers default to 1.
    pub count: Option<u32>,
    /// `url` or `b64_json`.
    pub response_format: Option<String>,
    pub options: Map<String, Value>,
    #[serde(skip)]
    pub base_url: Option<String>,
}

impl RequestMeta for ImageRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn base_url_override(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

/// One generated image: a URL or base64 payload, per the request's
/// `response_format`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Response to an [`ImageRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub images: Vec<GeneratedImage>,
    pub model: String,
}
