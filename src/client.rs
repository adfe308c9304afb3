//! The client root: configuration-once assembly, provider cache, and the
//! six builder constructors.
//!
//! A [`Client`] is built by applying options to a [`ClientBuilder`] and
//! sealing it with `build()`. After sealing it is immutable; every accessor
//! is read-only and the only interior mutability is the provider cache.
//! Providers are constructed lazily on first use, cached with a reference
//! count, and shared across concurrent callers.
//!
//! # Examples
//!
//! ```no_run
//! use wormhole::Client;
//!
//! # async fn demo() -> wormhole::Result<()> {
//! let client = Client::builder()
//!     .openai("sk-test-0000-demo")
//!     .default_provider("openai")
//!     .build()?;
//!
//! let response = client
//!     .text()
//!     .model("gpt-4o-mini")
//!     .prompt("Why is the sky blue?")
//!     .generate()
//!     .await?;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::builder::{
    AudioBuilder, EmbeddingsBuilder, ImageBuilder, StructuredBuilder, TextBuilder,
    execute_structured,
};
use crate::error::{Result, WormholeError};
use crate::middleware::{
    AudioHandler, Chain, EmbeddingsHandler, ImageHandler, LoggingMiddleware, Middleware,
    RetryPolicy, StreamHandler, StructuredHandler, TextHandler,
};
use crate::provider::{
    AnthropicProvider, OllamaProvider, OpenAiProvider, Provider, ProviderConfig, ProviderFactory,
    build_header_map,
};
use crate::registry::{ModelRegistry, registry_or_default};
use crate::tools::{Tool, ToolRegistry, ToolSafetyConfig};

/// The six wrapped capability handlers for one cached provider. Built once
/// at provider construction; every call through the provider reuses them.
pub(crate) struct ProviderHandlers {
    pub text: TextHandler,
    pub stream: StreamHandler,
    pub structured: StructuredHandler,
    pub embeddings: EmbeddingsHandler,
    pub audio: AudioHandler,
    pub image: ImageHandler,
}

fn build_handlers(provider: Arc<dyn Provider>, chain: &Chain) -> ProviderHandlers {
    let p = Arc::clone(&provider);
    let text: TextHandler = Arc::new(move |req| {
        let p = Arc::clone(&p);
        Box::pin(async move { p.text(req).await })
    });

    let p = Arc::clone(&provider);
    let stream: StreamHandler = Arc::new(move |req| {
        let p = Arc::clone(&p);
        Box::pin(async move { p.stream(req).await })
    });

    // The structured strategy (json / tools / strict with fallback) runs
    // inside the innermost handler so middleware wraps the whole operation.
    let p = Arc::clone(&provider);
    let structured: StructuredHandler = Arc::new(move |req| {
        let p = Arc::clone(&p);
        Box::pin(async move { execute_structured(p, req).await })
    });

    let p = Arc::clone(&provider);
    let embeddings: EmbeddingsHandler = Arc::new(move |req| {
        let p = Arc::clone(&p);
        Box::pin(async move { p.embeddings(req).await })
    });

    let p = Arc::clone(&provider);
    let audio: AudioHandler = Arc::new(move |req| {
        let p = Arc::clone(&p);
        Box::pin(async move { p.audio(req).await })
    });

    let p = Arc::clone(&provider);
    let image: ImageHandler = Arc::new(move |req| {
        let p = Arc::clone(&p);
        Box::pin(async move { p.image(req).await })
    });

    ProviderHandlers {
        text: chain.wrap_text(text),
        stream: chain.wrap_stream(stream),
        structured: chain.wrap_structured(structured),
        embeddings: chain.wrap_embeddings(embeddings),
        audio: chain.wrap_audio(audio),
        image: chain.wrap_image(image),
    }
}

/// One cache slot: the provider, its wrapped handlers, and the refcount.
pub(crate) struct CachedProvider {
    pub name: String,
    pub provider: Arc<dyn Provider>,
    pub handlers: ProviderHandlers,
    pub dynamic_models: bool,
    refcount: AtomicUsize,
}

/// A checked-out provider. Dropping the lease releases the cache reference.
pub(crate) struct ProviderLease {
    entry: Arc<CachedProvider>,
}

impl Deref for ProviderLease {
    type Target = CachedProvider;

    fn deref(&self) -> &CachedProvider {
        &self.entry
    }
}

impl Drop for ProviderLease {
    fn drop(&mut self) {
        self.entry.refcount.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ProviderSpec {
    factory: ProviderFactory,
    config: ProviderConfig,
    requires_api_key: bool,
}

struct ClientInner {
    default_provider: String,
    providers: HashMap<String, ProviderSpec>,
    chain: Chain,
    tools: Arc<ToolRegistry>,
    safety: ToolSafetyConfig,
    registry: Option<Arc<ModelRegistry>>,
    cache: RwLock<HashMap<String, Arc<CachedProvider>>>,
    shut_down: AtomicBool,
}

/// The immutable client root. Cheap to clone; all clones share the provider
/// cache and tool registry.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Starts the option-driven assembly.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Free-form text requests.
    pub fn text(&self) -> TextBuilder {
        TextBuilder::new(self.clone())
    }

    /// Schema-constrained output requests.
    pub fn structured(&self) -> StructuredBuilder {
        StructuredBuilder::new(self.clone())
    }

    /// Vector embedding requests.
    pub fn embeddings(&self) -> EmbeddingsBuilder {
        EmbeddingsBuilder::new(self.clone())
    }

    /// TTS and STT requests.
    pub fn audio(&self) -> AudioBuilder {
        AudioBuilder::new(self.clone())
    }

    /// Image generation requests.
    pub fn image(&self) -> ImageBuilder {
        ImageBuilder::new(self.clone())
    }

    /// The shared tool registry. Tools may be registered and removed at any
    /// time; the agent loop snapshots it per call.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.inner.tools
    }

    /// Name of the provider used when a call does not specify one.
    pub fn default_provider(&self) -> &str {
        &self.inner.default_provider
    }

    /// Current cache refcount for a provider, `None` before first use.
    /// Introspection surface; request dispatch maintains these counts.
    pub fn provider_refcount(&self, name: &str) -> Option<usize> {
        let cache = self.inner.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(name).map(|e| e.refcount.load(Ordering::SeqCst))
    }

    /// Drains the provider cache, closes every cached provider, and rejects
    /// subsequent calls.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let drained: Vec<Arc<CachedProvider>> = {
            let mut cache = self.inner.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.provider.close().await?;
        }
        Ok(())
    }

    pub(crate) fn tool_safety(&self) -> &ToolSafetyConfig {
        &self.inner.safety
    }

    pub(crate) fn model_registry(&self) -> &ModelRegistry {
        registry_or_default(self.inner.registry.as_ref())
    }

    /// Resolves the provider for a call: explicit `.using(name)` wins,
    /// otherwise the client default.
    pub(crate) fn resolve(&self, using: Option<&str>) -> Result<ProviderLease> {
        let name = using.unwrap_or(&self.inner.default_provider);
        self.acquire(name)
    }

    /// Checks a provider out of the cache, constructing it on first use.
    /// Double-checked locking; the provider and its handler chain are fully
    /// constructed before the entry is published.
    pub(crate) fn acquire(&self, name: &str) -> Result<ProviderLease> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(WormholeError::provider("client is shut down").with_provider(name));
        }

        {
            let cache = self.inner.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(name) {
                entry.refcount.fetch_add(1, Ordering::SeqCst);
                return Ok(ProviderLease {
                    entry: Arc::clone(entry),
                });
            }
        }

        let mut cache = self.inner.cache.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.get(name) {
            entry.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(ProviderLease {
                entry: Arc::clone(entry),
            });
        }

        let spec = self.inner.providers.get(name).ok_or_else(|| {
            WormholeError::config(format!("unknown provider '{name}'"))
        })?;
        let provider = (spec.factory)(spec.config.clone())?;
        let handlers = build_handlers(Arc::clone(&provider), &self.inner.chain);
        let entry = Arc::new(CachedProvider {
            name: name.to_string(),
            provider,
            handlers,
            dynamic_models: spec.config.dynamic_models,
            refcount: AtomicUsize::new(1),
        });
        cache.insert(name.to_string(), Arc::clone(&entry));
        tracing::debug!(provider = name, "provider constructed and cached");
        Ok(ProviderLease { entry })
    }
}

/// Option-driven construction of a [`Client`].
///
/// Options apply in declaration order and seal at `build()`. Configuration
/// errors (no providers, an unknown default, a credential-less provider
/// that requires one) surface at `build()`, never on first call.
#[derive(Default)]
pub struct ClientBuilder {
    default_provider: Option<String>,
    providers: Vec<(String, ProviderSpec)>,
    middlewares: Vec<Arc<dyn Middleware>>,
    timeout: Option<Duration>,
    retries: Option<(u32, Duration)>,
    tools: Vec<Tool>,
    safety: ToolSafetyConfig,
    registry: Option<Arc<ModelRegistry>>,
    debug_logging: bool,
}

impl ClientBuilder {
    /// Registers the hosted OpenAI provider.
    pub fn openai(self, api_key: impl Into<String>) -> Self {
        let config = ProviderConfig::new().api_key(api_key.into());
        self.provider_with_requirements(
            "openai",
            Arc::new(|config| Ok(Arc::new(OpenAiProvider::new(config)?) as Arc<dyn Provider>)),
            config,
            true,
        )
    }

    /// Registers the hosted OpenAI provider with a custom config.
    pub fn openai_with(self, config: ProviderConfig) -> Self {
        self.provider_with_requirements(
            "openai",
            Arc::new(|config| Ok(Arc::new(OpenAiProvider::new(config)?) as Arc<dyn Provider>)),
            config,
            true,
        )
    }

    /// Registers the Anthropic provider.
    pub fn anthropic(self, api_key: impl Into<String>) -> Self {
        let config = ProviderConfig::new().api_key(api_key.into());
        self.anthropic_with(config)
    }

    /// Registers the Anthropic provider with a custom config.
    pub fn anthropic_with(self, config: ProviderConfig) -> Self {
        self.provider_with_requirements(
            "anthropic",
            Arc::new(|config| Ok(Arc::new(AnthropicProvider::new(config)?) as Arc<dyn Provider>)),
            config,
            true,
        )
    }

    /// Registers a local Ollama provider (no credentials).
    pub fn ollama(self) -> Self {
        self.ollama_with(ProviderConfig::new())
    }

    /// Registers the Ollama provider with a custom config.
    pub fn ollama_with(self, config: ProviderConfig) -> Self {
        self.provider_with_requirements(
            "ollama",
            Arc::new(|config| Ok(Arc::new(OllamaProvider::new(config)?) as Arc<dyn Provider>)),
            config,
            false,
        )
    }

    /// Registers any OpenAI-compatible endpoint under its own name.
    pub fn openai_compatible(
        self,
        name: impl Into<String>,
        base_url: impl Into<String>,
        config: ProviderConfig,
    ) -> Self {
        let name = name.into();
        let config = config.base_url(base_url.into());
        let factory_name = name.clone();
        self.provider_with_requirements(
            name,
            Arc::new(move |config| {
                Ok(Arc::new(OpenAiProvider::compatible(factory_name.clone(), config)?)
                    as Arc<dyn Provider>)
            }),
            config,
            false,
        )
    }

    /// Registers a provider from an arbitrary factory.
    pub fn provider(
        self,
        name: impl Into<String>,
        factory: ProviderFactory,
        config: ProviderConfig,
    ) -> Self {
        self.provider_with_requirements(name, factory, config, false)
    }

    fn provider_with_requirements(
        mut self,
        name: impl Into<String>,
        factory: ProviderFactory,
        config: ProviderConfig,
        requires_api_key: bool,
    ) -> Self {
        self.providers.push((
            name.into(),
            ProviderSpec {
                factory,
                config,
                requires_api_key,
            },
        ));
        self
    }

    /// Selects the provider used when a call does not specify one. Defaults
    /// to the first registered provider.
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Global HTTP timeout applied to providers lacking their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Global transport retry defaults applied to providers lacking their
    /// own.
    pub fn retries(mut self, max_attempts: u32, initial_delay: Duration) -> Self {
        self.retries = Some((max_attempts, initial_delay));
        self
    }

    /// Appends a middleware. Declaration order is observation order: the
    /// first-appended middleware sees requests first and responses last.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Installs the logging middleware ahead of everything else.
    pub fn debug_logging(mut self) -> Self {
        self.debug_logging = true;
        self
    }

    /// Pre-registers a tool on the client's registry.
    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Tool executor limits.
    pub fn tool_safety(mut self, safety: ToolSafetyConfig) -> Self {
        self.safety = safety;
        self
    }

    /// Substitutes an isolated model registry for the process default.
    pub fn model_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validates the configuration and seals it into an immutable
    /// [`Client`].
    pub fn build(self) -> Result<Client> {
        if self.providers.is_empty() {
            return Err(WormholeError::config(
                "at least one provider must be configured",
            ));
        }

        let first_name = self.providers[0].0.clone();
        let mut providers: HashMap<String, ProviderSpec> = HashMap::new();
        for (name, mut spec) in self.providers {
            if providers.contains_key(&name) {
                return Err(WormholeError::config(format!(
                    "provider '{name}' is registered twice"
                )));
            }
            if spec.requires_api_key
                && !spec.config.api_key.as_ref().is_some_and(|k| !k.is_empty())
            {
                return Err(WormholeError::config(format!(
                    "provider '{name}' requires an API key"
                )));
            }
            // Headers are validated here so a bad config never reaches the
            // first request.
            build_header_map(&spec.config.headers)?;

            if spec.config.timeout.is_none() {
                spec.config.timeout = self.timeout;
            }
            if spec.config.retry.is_none() {
                if let Some((attempts, delay)) = self.retries {
                    spec.config.retry = Some(RetryPolicy {
                        max_attempts: attempts,
                        initial_delay: delay,
                        ..RetryPolicy::default()
                    });
                }
            }
            providers.insert(name, spec);
        }

        let default_provider = self.default_provider.unwrap_or(first_name);
        if !providers.contains_key(&default_provider) {
            return Err(WormholeError::config(format!(
                "default provider '{default_provider}' is not configured"
            )));
        }

        let mut middlewares = self.middlewares;
        if self.debug_logging {
            middlewares.insert(0, Arc::new(LoggingMiddleware::new()));
        }

        let tools = Arc::new(ToolRegistry::new());
        for tool in self.tools {
            tools.register(tool)?;
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                default_provider,
                providers,
                chain: Chain::new(middlewares),
                tools,
                safety: self.safety,
                registry: self.registry,
                cache: RwLock::new(HashMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_client() -> Client {
        Client::builder().ollama().build().unwrap()
    }

    #[test]
    fn test_build_requires_a_provider() {
        let err = Client::builder().build().err().unwrap();
        assert!(err.to_string().contains("at least one provider"));
    }

    #[test]
    fn test_unknown_default_provider_is_config_error() {
        let err = Client::builder()
            .ollama()
            .default_provider("openai")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_missing_credentials_fail_at_build() {
        let err = Client::builder().openai("").build().err().unwrap();
        assert!(err.to_string().contains("requires an API key"));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let err = Client::builder().ollama().ollama().build().err().unwrap();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn test_first_provider_is_default() {
        let client = Client::builder()
            .ollama()
            .openai("sk-test-0000-demo")
            .build()
            .unwrap();
        assert_eq!(client.default_provider(), "ollama");
    }

    #[test]
    fn test_acquire_release_refcount() {
        let client = minimal_client();
        assert_eq!(client.provider_refcount("ollama"), None);

        let lease = client.acquire("ollama").unwrap();
        assert_eq!(client.provider_refcount("ollama"), Some(1));

        let second = client.acquire("ollama").unwrap();
        assert_eq!(client.provider_refcount("ollama"), Some(2));

        drop(second);
        assert_eq!(client.provider_refcount("ollama"), Some(1));
        drop(lease);
        assert_eq!(client.provider_refcount("ollama"), Some(0));
    }

    #[test]
    fn test_acquire_unknown_provider() {
        let client = minimal_client();
        let err = client.acquire("ghost").err().unwrap();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_acquire() {
        let client = minimal_client();
        let lease = client.acquire("ollama").unwrap();
        drop(lease);

        client.shutdown().await.unwrap();
        assert!(client.acquire("ollama").is_err());
        assert_eq!(client.provider_refcount("ollama"), None);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_constructs_once() {
        let client = minimal_client();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let lease = client.acquire("ollama").unwrap();
                let name = lease.name.clone();
                drop(lease);
                name
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "ollama");
        }
        assert_eq!(client.provider_refcount("ollama"), Some(0));
    }
}
