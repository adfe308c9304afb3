//! Embeddings builder.

use serde_json::Value;

use crate::builder::check_model;
use crate::client::Client;
use crate::error::{Result, WormholeError};
use crate::middleware::with_provider_label;
use crate::registry::Capability;
use crate::request::{EmbeddingsRequest, EmbeddingsResponse};

/// Fluent construction of a vector-embeddings request.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(client: wormhole::Client) -> wormhole::Result<()> {
/// let response = client
///     .embeddings()
///     .model("text-embedding-3-small")
///     .input("first document")
///     .input("second document")
///     .generate()
///     .await?;
/// assert_eq!(response.embeddings.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct EmbeddingsBuilder {
    client: Client,
    request: EmbeddingsRequest,
    using: Option<String>,
}

impl EmbeddingsBuilder {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            request: EmbeddingsRequest::default(),
            using: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.request.model = model.into();
        self
    }

    /// Appends one input string.
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.request.inputs.push(input.into());
        self
    }

    /// Appends many input strings; result vectors come back in this order.
    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    /// Requested vector width, for models that support shortening.
    pub fn dimensions(mut self, dimensions: u32) -> Self {
        self.request.dimensions = Some(dimensions);
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

    pub async fn generate(self) -> Result<EmbeddingsResponse> {
        if self.request.model.trim().is_empty() {
            return Err(WormholeError::validation("model is required"));
        }
        if self.request.inputs.is_empty() {
            return Err(WormholeError::validation("at least one input is required"));
        }

        let lease = self.client.resolve(self.using.as_deref())?;
        check_model(
            self.client.model_registry(),
            &self.request.model,
            Capability::Embeddings,
            lease.dynamic_models,
        )?;

        let provider_name = lease.name.clone();
        let model = self.request.model.clone();
        with_provider_label(
            provider_name.clone(),
            (lease.handlers.embeddings)(self.request),
        )
        .await
        .map_err(|e| {
            e.with_provider(&provider_name)
                .with_model(&model)
                .with_operation("embeddings")
        })
    }
}
