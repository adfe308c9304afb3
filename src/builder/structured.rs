//! Structured output builder and the mode strategies.
//!
//! The mode tag picks the strategy:
//! - `json`: hint the model to emit bare JSON, parse the response text, run
//!   schema validation;
//! - `tools`: synthesize a single tool whose input is the schema and use the
//!   model's tool call as the structured result;
//! - `strict`: ask the provider for native schema-constrained decoding,
//!   falling back to `tools` when the provider lacks it.

use std::sync::Arc;

use serde_json::Value;

use crate::builder::{apply_constraints, check_model, log_cost_estimate};
use crate::client::Client;
use crate::error::{Result, WormholeError};
use crate::message::Message;
use crate::middleware::with_provider_label;
use crate::provider::Provider;
use crate::registry::Capability;
use crate::request::{
    StructuredRequest, StructuredResponse, TextRequest, ToolChoice, ToolSpec,
};
use crate::schema::{Schema, SchemaNode, StructuredMode};

/// Name of the synthesized tool used by the `tools` strategy.
const OUTPUT_TOOL: &str = "emit_structured_output";

/// Fluent construction of a schema-constrained request.
///
/// # Examples
///
/// ```no_run
/// use wormhole::{SchemaNode, StructuredMode};
///
/// # async fn demo(client: wormhole::Client) -> wormhole::Result<()> {
/// let person = SchemaNode::object([
///     ("name", SchemaNode::string()),
///     ("age", SchemaNode::integer()),
/// ])
/// .required(["name", "age"]);
///
/// let response = client
///     .structured()
///     .model("gpt-4o-mini")
///     .prompt("Extract: Ada Lovelace, 36")
///     .schema(person)
///     .mode(StructuredMode::Json)
///     .generate()
///     .await?;
/// println!("{}", response.value["name"]);
/// # Ok(())
/// # }
/// ```
pub struct StructuredBuilder {
    client: Client,
    request: TextRequest,
    schema: Option<Schema>,
    mode: StructuredMode,
    using: Option<String>,
}

impl StructuredBuilder {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            request: TextRequest::default(),
            schema: None,
            mode: StructuredMode::default(),
            using: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.request.model = model.into();
        self
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.request.messages.insert(0, Message::system(content));
        self
    }

    pub fn prompt(mut self, content: impl Into<String>) -> Self {
        self.request.messages.push(Message::user(content));
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.request.messages.push(message);
        self
    }

    /// The schema the response must satisfy (required). Accepts a
    /// [`SchemaNode`] tree or a raw `serde_json::Value` schema.
    pub fn schema(mut self, schema: impl Into<Schema>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Raw JSON schema passed through verbatim.
    pub fn raw_schema(mut self, schema: Value) -> Self {
        self.schema = Some(Schema::Raw(schema));
        self
    }

    pub fn mode(mut self, mode: StructuredMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.request.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.request.max_tokens = Some(max_tokens);
        self
    }

    pub fn using(mut self, provider: impl Into<String>) -> Self {
        self.using = Some(provider.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.request.base_url = Some(url.into());
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.request.options.insert(name.into(), value);
        self
    }

    /// Validates, resolves, dispatches through the structured chain, and
    /// returns the schema-validated value.
    pub async fn generate(mut self) -> Result<StructuredResponse> {
        if self.request.model.trim().is_empty() {
            return Err(WormholeError::validation("model is required"));
        }
        if self.request.messages.is_empty() {
            return Err(WormholeError::validation(
                "at least one message is required",
            ));
        }
        let schema = self
            .schema
            .take()
            .ok_or_else(|| WormholeError::validation("schema is required"))?;

        let lease = self.client.resolve(self.using.as_deref())?;
        let registry = self.client.model_registry();
        if let Some(info) = check_model(
            registry,
            &self.request.model,
            Capability::Structured,
            lease.dynamic_models,
        )? {
            apply_constraints(&info, &mut self.request);
            log_cost_estimate(registry, &self.request.model, &self.request.messages);
        }

        let provider_name = lease.name.clone();
        let model = self.request.model.clone();
        let request = StructuredRequest {
            text: self.request,
            schema,
            mode: self.mode,
        };

        with_provider_label(
            provider_name.clone(),
            (lease.handlers.structured)(request),
        )
        .await
        .map_err(|e| {
            e.with_provider(&provider_name)
                .with_model(&model)
                .with_operation("structured")
        })
    }
}

/// Runs the mode strategy against a resolved provider. This is the
/// innermost structured handler, so middleware observes the whole
/// operation including any `strict` → `tools` fallback.
pub(crate) async fn execute_structured(
    provider: Arc<dyn Provider>,
    request: StructuredRequest,
) -> Result<StructuredResponse> {
    match request.mode {
        StructuredMode::Json => json_strategy(provider, request).await,
        StructuredMode::Tools => tools_strategy(provider, request).await,
        StructuredMode::Strict => {
            match provider.structured(request.clone()).await {
                Err(err) if err.is_unsupported() => tools_strategy(provider, request).await,
                other => other,
            }
        }
    }
}

async fn json_strategy(
    provider: Arc<dyn Provider>,
    request: StructuredRequest,
) -> Result<StructuredResponse> {
    let schema_json = request.schema.to_json();
    let mut text_request = request.text;
    text_request.messages.insert(
        0,
        Message::system(format!(
            "Respond with a single JSON value that satisfies this JSON schema, \
             with no prose and no code fences:\n{schema_json}"
        )),
    );

    let response = provider.text(text_request).await?;
    let value = parse_json_output(&response.text)?;
    request.schema.validate(&value)?;

    Ok(StructuredResponse {
        value,
        raw_text: Some(response.text),
        usage: response.usage,
        model: response.model,
    })
}

async fn tools_strategy(
    provider: Arc<dyn Provider>,
    request: StructuredRequest,
) -> Result<StructuredResponse> {
    let schema_json = ensure_object_schema(request.schema.to_json());
    let mut text_request = request.text;
    text_request.tools = vec![ToolSpec {
        name: OUTPUT_TOOL.to_string(),
        description: "Record the final structured result. Always call this tool exactly once."
            .to_string(),
        input_schema: schema_json,
    }];
    text_request.tool_choice = Some(ToolChoice::Tool(OUTPUT_TOOL.to_string()));

    let response = provider.text(text_request).await?;
    let call = response
        .tool_calls
        .iter()
        .find(|call| call.name == OUTPUT_TOOL)
        .or_else(|| response.tool_calls.first())
        .ok_or_else(|| {
            WormholeError::validation("model did not call the structured output tool")
        })?;

    // Non-object schemas are wrapped in {"value": ...} on the wire; unwrap
    // before validating against the caller's schema.
    let value = match (&request.schema, call.arguments.get("value")) {
        (schema, Some(inner)) if !schema_is_object(schema) => inner.clone(),
        _ => call.arguments.clone(),
    };
    request.schema.validate(&value)?;

    Ok(StructuredResponse {
        value,
        raw_text: None,
        usage: response.usage,
        model: response.model,
    })
}

/// Tool inputs must be objects on every wire; wrap scalar and array
/// schemas in a single `value` property.
fn ensure_object_schema(schema: Value) -> Value {
    let is_object = schema.get("type").and_then(Value::as_str) == Some("object");
    if is_object {
        schema
    } else {
        serde_json::json!({
            "type": "object",
            "properties": { "value": schema },
            "required": ["value"],
        })
    }
}

fn schema_is_object(schema: &Schema) -> bool {
    match schema {
        Schema::Node(SchemaNode::Object { .. }) => true,
        Schema::Node(_) => false,
        Schema::Raw(value) => value.get("type").and_then(Value::as_str) == Some("object"),
    }
}

/// Parses model text as JSON, tolerating the code fences models love to
/// add despite instructions.
fn parse_json_output(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let stripped = strip_code_fences(trimmed);
    serde_json::from_str(stripped).map_err(|e| {
        WormholeError::validation("response is not valid JSON")
            .with_detail(truncate(stripped, 200))
            .with_source(e)
    })
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}
