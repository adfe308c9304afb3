//! Conversation messages, tool calls, and finish reasons.
//!
//! A conversation is a flat, ordered list of [`Message`] values. Assistant
//! messages may carry [`ToolCall`] entries; tool-role messages answer them,
//! linked by the opaque call id. Ordering is significant: a tool-result
//! message must follow the assistant message that requested it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
///
/// Serializes to lowercase strings (`"system"`, `"user"`, `"assistant"`,
/// `"tool"`) to match the OpenAI-compatible wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the whole conversation.
    System,
    /// Input from the embedding application or its user.
    User,
    /// Model output; may include tool calls.
    Assistant,
    /// Result of a tool execution, linked by `tool_call_id`.
    Tool,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation.
    Stop,
    /// Token limit reached.
    Length,
    /// The model elected to call tools.
    ToolCalls,
    /// Output suppressed by a provider content filter.
    ContentFilter,
    /// Anything a provider reports that maps to none of the above.
    Other,
}

impl Default for FinishReason {
    fn default() -> Self {
        FinishReason::Stop
    }
}

impl FinishReason {
    /// Maps a provider's finish/stop reason string onto the closed set.
    /// Unknown values land on [`FinishReason::Other`] rather than erroring.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" | "done" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            "content_filter" | "refusal" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }
}

/// A model's request to execute one tool.
///
/// `arguments` is the decoded argument object. Providers that send the
/// arguments as a JSON string decode them before constructing the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id correlating this call with its result message.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Decoded argument map.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of executing one [`ToolCall`]: either a JSON-encodable value or
/// an error message. Execution failures stay inside the conversation; they
/// are reported back to the model, never to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The id of the call this result answers.
    pub call_id: String,
    /// Successful result value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Error message when the execution failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(call_id: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            value: Some(value),
            error: None,
        }
    }

    /// A failed result. The message is what the model sees.
    pub fn err(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            value: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The payload sent back to the model: the value on success, an
    /// `{"error": ...}` object on failure.
    pub fn payload(&self) -> Value {
        match (&self.value, &self.error) {
            (Some(v), _) => v.clone(),
            (None, Some(e)) => serde_json::json!({ "error": e }),
            (None, None) => Value::Null,
        }
    }
}

/// One turn in a conversation.
///
/// # Examples
///
/// ```
/// use wormhole::{Message, Role};
///
/// let msg = Message::user("What is the capital of France?");
/// assert_eq!(msg.role, Role::User);
///
/// let sys = Message::system("You are terse.");
/// assert!(sys.tool_calls.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text content. May be empty on assistant messages that only call tools.
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Present on tool-role messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// An assistant turn carrying tool calls, as appended by the agent loop.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// A tool-role message answering `result.call_id`.
    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.payload().to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.call_id.clone()),
        }
    }
}
