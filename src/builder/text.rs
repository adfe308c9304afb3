//! Text builder: free-form chat, streaming, and the tool-calling agent
//! loop.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use crate::builder::{StreamAccumulator, apply_constraints, check_model, log_cost_estimate};
use crate::client::Client;
use crate::error::Result;
use crate::error::WormholeError;
use crate::message::Message;
use crate::middleware::with_provider_label;
use crate::registry::Capability;
use crate::request::{ChunkStream, StreamChunk, TextRequest, TextResponse, ToolChoice};
use crate::tools::ToolExecutor;

/// Iteration cap for the agent loop. When the model is still asking for
/// tools after this many turns, the last response is returned as-is.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Fluent construction of a text request.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(client: wormhole::Client) -> wormhole::Result<()> {
/// let response = client
///     .text()
///     .model("gpt-4o-mini")
///     .system("You are terse.")
///     .prompt("What is 2+3?")
///     .temperature(0.2)
///     .generate()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TextBuilder {
    client: Client,
    request: TextRequest,
    using: Option<String>,
    tools_enabled: Option<bool>,
    max_iterations: u32,
}

impl TextBuilder {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            request: TextRequest::default(),
            using: None,
            tools_enabled: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Target model id (required).
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.request.model = model.into();
        self
    }

    /// Prepends or replaces the system message.
    pub fn system(mut self, content: impl Into<String>) -> Self {
        let message = Message::system(content);
        match self.request.messages.first_mut() {
            Some(first) if first.role == crate::Role::System => *first = message,
            _ => self.request.messages.insert(0, message),
        }
        self
    }

    /// Appends a user message.
    pub fn prompt(mut self, content: impl Into<String>) -> Self {
        self.request.messages.push(Message::user(content));
        self
    }

    /// Appends an arbitrary message.
    pub fn message(mut self, message: Message) -> Self {
        self.request.messages.push(message);
        self
    }

    /// Replaces the whole conversation.
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.request.messages = messages;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.request.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.request.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.request.max_tokens = Some(max_tokens);
        self
    }

    pub fn stop(mut self, sequence: impl Into<String>) -> Self {
        self.request.stop.push(sequence.into());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.request.seed = Some(seed);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.request.presence_penalty = Some(penalty);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.request.frequency_penalty = Some(penalty);
        self
    }

    /// Tool-choice policy forwarded to the provider.
    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.request.tool_choice = Some(choice);
        self
    }

    /// Enables or disables the agent loop for this call. Defaults to on
    /// whenever the client has registered tools.
    pub fn tools_enabled(mut self, enabled: bool) -> Self {
        self.tools_enabled = Some(enabled);
        self
    }

    /// Caps agent-loop turns. Defaults to [`DEFAULT_MAX_ITERATIONS`].
    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }

    /// Routes this call to a named provider instead of the client default.
    pub fn using(mut self, provider: impl Into<String>) -> Self {
        self.using = Some(provider.into());
        self
    }

    /// Per-call endpoint override, for any OpenAI-compatible host.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.request.base_url = Some(url.into());
        self
    }

    /// Provider-scoped option passed through verbatim in the request body.
    pub fn option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.request.options.insert(name.into(), value);
        self
    }

    /// Validates, resolves, and prepares the request plus loop context.
    fn finish(
        mut self,
        capability: Capability,
    ) -> Result<(Client, crate::client::ProviderLease, TextRequest, bool, u32)> {
        if self.request.model.trim().is_empty() {
            return Err(WormholeError::validation("model is required"));
        }
        if self.request.messages.is_empty() {
            return Err(WormholeError::validation(
                "at least one message is required",
            ));
        }

        let lease = self.client.resolve(self.using.as_deref())?;

        let registry = self.client.model_registry();
        if let Some(info) = check_model(
            registry,
            &self.request.model,
            capability,
            lease.dynamic_models,
        )? {
            apply_constraints(&info, &mut self.request);
            log_cost_estimate(registry, &self.request.model, &self.request.messages);
        }

        let tools_wanted = self.tools_enabled.unwrap_or(true);
        let tools_attached = tools_wanted && !self.client.tools().is_empty();
        if tools_attached {
            self.request.tools = self.client.tools().specs();
        }

        Ok((
            self.client,
            lease,
            self.request,
            tools_attached,
            self.max_iterations,
        ))
    }

    /// Dispatches the request and, when tools are attached, drives the
    /// agent loop: execute requested tools in parallel, feed results back,
    /// repeat until the model answers in text or the iteration cap is hit
    /// (the last response is then returned as-is).
    pub async fn generate(self) -> Result<TextResponse> {
        let (client, lease, mut request, tools_attached, max_iterations) =
            self.finish(Capability::Text)?;
        let provider_name = lease.name.clone();
        let model = request.model.clone();
        let executor = ToolExecutor::new(Arc::clone(client.tools()), client.tool_safety().clone());

        let mut iterations = 0u32;
        loop {
            let response = with_provider_label(
                provider_name.clone(),
                (lease.handlers.text)(request.clone()),
            )
            .await
            .map_err(|e| {
                e.with_provider(&provider_name)
                    .with_model(&model)
                    .with_operation("text")
            })?;

            if !tools_attached || response.tool_calls.is_empty() {
                return Ok(response);
            }

            iterations += 1;
            if iterations >= max_iterations {
                tracing::warn!(
                    model = %model,
                    iterations,
                    "agent loop reached max iterations; returning last response"
                );
                return Ok(response);
            }

            let results = executor.run(&response.tool_calls).await;
            request.messages.push(response.to_message());
            for result in &results {
                request.messages.push(Message::tool_result(result));
            }
        }
    }

    /// Opens a stream. Without tools the provider stream passes through
    /// unchanged. With tools each turn is drained into an accumulator; tool
    /// calls are executed and the next turn re-streams, with the composite
    /// channel yielding every turn's content deltas in order and exactly
    /// one terminal chunk.
    pub async fn stream(self) -> Result<ChunkStream> {
        let (client, lease, request, tools_attached, max_iterations) =
            self.finish(Capability::Stream)?;
        let provider_name = lease.name.clone();
        let model = request.model.clone();

        if !tools_attached {
            let stream = with_provider_label(
                provider_name.clone(),
                (lease.handlers.stream)(request),
            )
            .await
            .map_err(|e| {
                e.with_provider(&provider_name)
                    .with_model(&model)
                    .with_operation("stream")
            })?;
            // The lease rides with the stream so the provider is released
            // when the stream completes or is dropped, not at open.
            let guarded = stream.map(move |item| {
                let _ = &lease;
                item
            });
            return Ok(Box::pin(guarded));
        }

        let executor = ToolExecutor::new(Arc::clone(client.tools()), client.tool_safety().clone());
        // Small buffer: the producer suspends when the consumer lags, so
        // slowness propagates instead of memory growing.
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<StreamChunk>>(16);

        tokio::spawn(async move {
            // The lease rides with the producer so the provider stays
            // checked out for the lifetime of the composite stream.
            let lease = lease;
            let mut request = request;
            let mut iterations = 0u32;

            loop {
                let opened = with_provider_label(
                    provider_name.clone(),
                    (lease.handlers.stream)(request.clone()),
                )
                .await
                .map_err(|e| {
                    e.with_provider(&provider_name)
                        .with_model(&model)
                        .with_operation("stream")
                });

                let mut stream = match opened {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };

                let mut accumulator = StreamAccumulator::new();
                loop {
                    // A dropped consumer must tear the producer down within
                    // bounded time even when the provider stream stalls.
                    let item = tokio::select! {
                        item = stream.next() => item,
                        _ = tx.closed() => return,
                    };
                    let Some(item) = item else {
                        break;
                    };
                    match item {
                        Ok(chunk) => {
                            if let Some(delta) = &chunk.delta {
                                if tx.send(Ok(StreamChunk::delta(delta.clone()))).await.is_err() {
                                    // Consumer dropped: stop promptly.
                                    return;
                                }
                            }
                            accumulator.push(&chunk);
                            if chunk.is_terminal() {
                                break;
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }

                let turn = match accumulator.into_response(&model) {
                    Ok(turn) => turn,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };

                if turn.tool_calls.is_empty() {
                    let _ = tx.send(Ok(StreamChunk::finish(turn.finish_reason))).await;
                    return;
                }

                iterations += 1;
                if iterations >= max_iterations {
                    tracing::warn!(
                        model = %model,
                        iterations,
                        "streaming agent loop reached max iterations"
                    );
                    let _ = tx.send(Ok(StreamChunk::finish(turn.finish_reason))).await;
                    return;
                }

                let results = executor.run(&turn.tool_calls).await;
                request.messages.push(turn.to_message());
                for result in &results {
                    request.messages.push(Message::tool_result(result));
                }
            }
            // The sender drops here (and on every return above), closing
            // the channel exactly once.
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
