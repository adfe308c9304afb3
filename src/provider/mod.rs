//! Provider abstraction: one uniform capability surface per remote service.
//!
//! Every provider exposes the same six capability methods plus `name()` and
//! `close()`. The trait supplies a "not supported" default for each
//! capability, so concrete providers override only what they implement and
//! callers never check capability flags; they attempt the call and receive
//! a typed unsupported error if the provider lacks it.

mod anthropic;
mod config;
mod ollama;
mod openai;
mod transport;

pub use anthropic::AnthropicProvider;
pub use config::{ApiKey, ProviderConfig};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use transport::{AuthStyle, build_header_map};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::error::WormholeError;
use crate::request::{
    AudioRequest, AudioResponse, ChunkStream, EmbeddingsRequest, EmbeddingsResponse, ImageRequest,
    ImageResponse, StructuredRequest, StructuredResponse, TextRequest, TextResponse,
};

/// A concrete backend serving the six capability families.
///
/// Implementations override the capabilities they support; the rest keep
/// the unsupported default. `close()` releases provider-held resources and
/// is called by the client when a cached provider is drained at shutdown.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in cache keys, error tags, and metrics.
    fn name(&self) -> &str;

    async fn text(&self, request: TextRequest) -> Result<TextResponse> {
        let _ = request;
        Err(WormholeError::unsupported(self.name(), "text"))
    }

    async fn stream(&self, request: TextRequest) -> Result<ChunkStream> {
        let _ = request;
        Err(WormholeError::unsupported(self.name(), "stream"))
    }

    /// Native schema-constrained decoding. Providers without it keep the
    /// default; the structured builder falls back to the tools strategy.
    async fn structured(&self, request: StructuredRequest) -> Result<StructuredResponse> {
        let _ = request;
        Err(WormholeError::unsupported(self.name(), "structured"))
    }

    async fn embeddings(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let _ = request;
        Err(WormholeError::unsupported(self.name(), "embeddings"))
    }

    async fn audio(&self, request: AudioRequest) -> Result<AudioResponse> {
        let _ = request;
        Err(WormholeError::unsupported(self.name(), "audio"))
    }

    async fn image(&self, request: ImageRequest) -> Result<ImageResponse> {
        let _ = request;
        Err(WormholeError::unsupported(self.name(), "image"))
    }

    /// Releases provider resources. The default has nothing to release.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructor the client calls to build a provider lazily on first use.
pub type ProviderFactory =
    Arc<dyn Fn(ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync>;
