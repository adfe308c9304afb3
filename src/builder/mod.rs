//! Per-capability request builders.
//!
//! A builder accumulates fields through a fluent interface and has no
//! effect until its terminal call (`generate` or `stream`). Termination
//! validates required fields, consults the model registry unless the
//! provider opted out via `dynamic_models`, applies per-model constraints,
//! resolves the target provider, and dispatches through that provider's
//! middleware chain.

mod audio;
mod embeddings;
mod image;
mod structured;
mod text;

pub use audio::AudioBuilder;
pub use embeddings::EmbeddingsBuilder;
pub use image::ImageBuilder;
pub use structured::StructuredBuilder;
pub use text::TextBuilder;

pub(crate) use structured::execute_structured;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Result, WormholeError};
use crate::message::{FinishReason, Message, ToolCall};
use crate::registry::{Capability, ModelInfo, ModelRegistry};
use crate::request::{StreamChunk, TextRequest, TextResponse};
use crate::util::estimate_tokens;

/// Registry gate run at builder termination. Returns the model entry when
/// validation ran, `None` when `dynamic_models` bypassed it.
pub(crate) fn check_model(
    registry: &ModelRegistry,
    model: &str,
    capability: Capability,
    dynamic_models: bool,
) -> Result<Option<Arc<ModelInfo>>> {
    if dynamic_models {
        return Ok(None);
    }
    registry.supports(model, capability).map(Some)
}

/// Overwrites caller sampling values with registry-pinned ones. Models that
/// mandate a fixed temperature win over whatever the caller asked for.
pub(crate) fn apply_constraints(info: &ModelInfo, request: &mut TextRequest) {
    if let Some(pinned) = info.constraints.get("temperature").and_then(Value::as_f64) {
        request.temperature = Some(pinned as f32);
    }
    if let Some(pinned) = info.constraints.get("top_p").and_then(Value::as_f64) {
        request.top_p = Some(pinned as f32);
    }
    if let Some(cap) = info.constraints.get("max_tokens").and_then(Value::as_u64) {
        let cap = cap as u32;
        request.max_tokens = Some(request.max_tokens.map_or(cap, |v| v.min(cap)));
    }
    if let Some(cap) = info.max_output_tokens {
        if let Some(requested) = request.max_tokens {
            request.max_tokens = Some(requested.min(cap));
        }
    }
}

/// Logs the informational cost estimate when the model has a cost table.
pub(crate) fn log_cost_estimate(registry: &ModelRegistry, model: &str, messages: &[Message]) {
    let input_tokens: u64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    if let Some(cost) = registry.estimate_cost(model, input_tokens, 0) {
        tracing::debug!(model, input_tokens, estimated_input_cost = cost, "cost estimate");
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Folds a turn's stream chunks back into a [`TextResponse`].
///
/// Text deltas concatenate; tool-call fragments accumulate per index until
/// the terminal chunk, at which point the argument JSON is decoded. The
/// agent loop drains each turn through one of these before deciding whether
/// to execute tools and re-stream.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    partials: BTreeMap<u32, PartialCall>,
    finish_reason: Option<FinishReason>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one chunk.
    pub fn push(&mut self, chunk: &StreamChunk) {
        if let Some(delta) = &chunk.delta {
            self.text.push_str(delta);
        }
        if let Some(call) = &chunk.tool_call {
            let partial = self.partials.entry(call.index).or_default();
            if let Some(id) = &call.id {
                partial.id = Some(id.clone());
            }
            if let Some(name) = &call.name {
                partial.name = Some(name.clone());
            }
            partial.arguments.push_str(&call.arguments_fragment);
        }
        if let Some(reason) = chunk.finish_reason {
            self.finish_reason = Some(reason);
        }
    }

    /// True once a terminal chunk has been absorbed.
    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Produces the turn's response. Fails when an accumulated tool call's
    /// argument JSON never became parseable: a corrupted stream.
    pub fn into_response(self, model: &str) -> Result<TextResponse> {
        let mut tool_calls = Vec::with_capacity(self.partials.len());
        for (index, partial) in self.partials {
            let (Some(id), Some(name)) = (partial.id, partial.name) else {
                // Fragments without an id or name are dropped, same as an
                // incomplete wire tool call.
                continue;
            };
            let arguments: Value = if partial.arguments.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(&partial.arguments).map_err(|e| {
                    WormholeError::provider(format!(
                        "malformed tool call arguments in stream (call index {index})"
                    ))
                    .with_source(e)
                })?
            };
            tool_calls.push(ToolCall::new(id, name, arguments));
        }

        let finish_reason = self.finish_reason.unwrap_or({
            if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            }
        });

        Ok(TextResponse {
            text: self.text,
            tool_calls,
            finish_reason,
            usage: None,
            model: model.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ToolCallDelta;
    use serde_json::json;

    #[test]
    fn test_accumulator_text_only() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamChunk::delta("Hello "));
        acc.push(&StreamChunk::delta("world"));
        assert!(!acc.is_finished());
        acc.push(&StreamChunk::finish(FinishReason::Stop));
        assert!(acc.is_finished());

        let resp = acc.into_response("m").unwrap();
        assert_eq!(resp.text, "Hello world");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_accumulator_interleaved_tool_calls() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamChunk::tool_call(ToolCallDelta {
            index: 0,
            id: Some("call_a".into()),
            name: Some("add".into()),
            arguments_fragment: "{\"a\"".into(),
        }));
        acc.push(&StreamChunk::tool_call(ToolCallDelta {
            index: 1,
            id: Some("call_b".into()),
            name: Some("mul".into()),
            arguments_fragment: "{\"x\":3}".into(),
        }));
        acc.push(&StreamChunk::tool_call(ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments_fragment: ":2}".into(),
        }));
        acc.push(&StreamChunk::finish(FinishReason::ToolCalls));

        let resp = acc.into_response("m").unwrap();
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].id, "call_a");
        assert_eq!(resp.tool_calls[0].arguments, json!({"a": 2}));
        assert_eq!(resp.tool_calls[1].arguments, json!({"x": 3}));
    }

    #[test]
    fn test_accumulator_empty_arguments_default_to_object() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamChunk::tool_call(ToolCallDelta {
            index: 0,
            id: Some("c".into()),
            name: Some("ping".into()),
            arguments_fragment: String::new(),
        }));
        acc.push(&StreamChunk::finish(FinishReason::ToolCalls));
        let resp = acc.into_response("m").unwrap();
        assert_eq!(resp.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn test_accumulator_malformed_arguments_error() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamChunk::tool_call(ToolCallDelta {
            index: 0,
            id: Some("c".into()),
            name: Some("t".into()),
            arguments_fragment: "{\"trunca".into(),
        }));
        acc.push(&StreamChunk::finish(FinishReason::ToolCalls));
        assert!(acc.into_response("m").is_err());
    }

    #[test]
    fn test_apply_constraints_pins_temperature() {
        let info = ModelInfo::new("pinned", "p")
            .constraint("temperature", json!(1.0))
            .max_output_tokens(100);
        let mut request = TextRequest {
            temperature: Some(0.2),
            max_tokens: Some(4096),
            ..TextRequest::default()
        };
        apply_constraints(&info, &mut request);
        assert_eq!(request.temperature, Some(1.0));
        assert_eq!(request.max_tokens, Some(100));
    }

    #[test]
    fn test_check_model_dynamic_bypass() {
        let registry = ModelRegistry::new();
        assert!(check_model(&registry, "ghost", Capability::Text, true)
            .unwrap()
            .is_none());
        assert!(check_model(&registry, "ghost", Capability::Text, false).is_err());
    }
}
