//! Image generation builder.

use serde_json::Value;

use crate::builder::check_model;
use crate::client::Client;
use crate::error::{Result, WormholeError};
use crate::middleware::with_provider_label;
use crate::registry::Capability;
use crate::request::{ImageRequest, ImageResponse};

/// Fluent construction of an image-generation request.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(client: wormhole::Client) -> wormhole::Result<()> {
/// let images = client
///     .image()
///     .model("dall-e-3")
///     .prompt("a lighthouse in a thunderstorm, oil painting")
///     .size("1024x1024")
///     .quality("hd")
///     .generate()
///     .await?;
/// println!("{:?}", images.images[0].url);
/// # Ok(())
/// # }
/// ```
pub struct ImageBuilder {
    client: Client,
    request: ImageRequest,
    using: Option<String>,
}

impl ImageBuilder {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            request: ImageRequest::default(),
            using: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.request.model = model.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.request.prompt = prompt.into();
        self
    }

    /// Target dimensions, e.g. `1024x1024`.
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.request.size = Some(size.into());
        self
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.request.quality = Some(quality.into());
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.request.style = Some(style.into());
        self
    }

    /// Number of images to generate.
    pub fn count(mut self, count: u32) -> Self {
        self.request.count = Some(count);
        self
    }

    /// `url` or `b64_json`.
    pub fn response_format(mut self, format: impl Into<String>) -> Self {
        self.request.response_format = Some(format.into());
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

    pub async fn generate(self) -> Result<ImageResponse> {
        if self.request.model.trim().is_empty() {
            return Err(WormholeError::validation("model is required"));
        }
        if self.request.prompt.trim().is_empty() {
            return Err(WormholeError::validation("prompt is required"));
        }

        let lease = self.client.resolve(self.using.as_deref())?;
        check_model(
            self.client.model_registry(),
            &self.request.model,
            Capability::Image,
            lease.dynamic_models,
        )?;

        let provider_name = lease.name.clone();
        let model = self.request.model.clone();
        with_provider_label(provider_name.clone(), (lease.handlers.image)(self.request))
            .await
            .map_err(|e| {
                e.with_provider(&provider_name)
                    .with_model(&model)
                    .with_operation("image")
            })
    }
}
