//! In-memory model registry: capability validation, constraints, and cost
//! estimation.
//!
//! The registry is keyed by model id with secondary indexes by provider and
//! by capability. Reads never block each other; writes happen at
//! construction time and are serialized behind the same lock. The only
//! process-wide instance is [`default_registry`]; production code reaches it
//! through [`registry_or_default`] so tests can substitute isolated
//! registries.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WormholeError};

/// One of the six request families a model can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Stream,
    Structured,
    Embeddings,
    Audio,
    Image,
}

impl Capability {
    /// Stable lowercase label used in metrics, logs, and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Stream => "stream",
            Capability::Structured => "structured",
            Capability::Embeddings => "embeddings",
            Capability::Audio => "audio",
            Capability::Image => "image",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear per-1k-token pricing used by [`ModelRegistry::estimate_cost`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Registry entry describing one model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub context_length: u32,
    pub max_output_tokens: Option<u32>,
    pub capabilities: HashSet<Capability>,
    /// Per-model constraints, e.g. a pinned `temperature`. The builder
    /// overwrites conflicting caller values with the pinned one.
    pub constraints: HashMap<String, Value>,
    pub cost: Option<CostTable>,
    pub deprecated: bool,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            context_length: 0,
            max_output_tokens: None,
            capabilities: HashSet::new(),
            constraints: HashMap::new(),
            cost: None,
            deprecated: false,
        }
    }

    pub fn context_length(mut self, tokens: u32) -> Self {
        self.context_length = tokens;
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(caps);
        self
    }

    pub fn constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    pub fn cost(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.cost = Some(CostTable {
            input_per_1k,
            output_per_1k,
        });
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, Arc<ModelInfo>>,
    by_provider: HashMap<String, Vec<String>>,
    by_capability: HashMap<Capability, Vec<String>>,
}

/// Thread-safe model table with secondary indexes.
///
/// # Examples
///
/// ```
/// use wormhole::{Capability, ModelInfo, ModelRegistry};
///
/// let registry = ModelRegistry::new();
/// registry.register(
///     ModelInfo::new("tiny", "local")
///         .context_length(4096)
///         .capabilities([Capability::Text]),
/// );
///
/// assert!(registry.get("tiny").is_some());
/// assert!(registry.supports("tiny", Capability::Text).is_ok());
/// assert!(registry.supports("tiny", Capability::Image).is_err());
/// ```
#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<Indexes>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model, replacing any previous entry with the same id.
    pub fn register(&self, info: ModelInfo) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let info = Arc::new(info);

        if let Some(old) = inner.by_id.insert(info.id.clone(), Arc::clone(&info)) {
            // Replacement: drop the stale index entries first.
            if let Some(ids) = inner.by_provider.get_mut(&old.provider) {
                ids.retain(|id| id != &old.id);
            }
            for cap in &old.capabilities {
                if let Some(ids) = inner.by_capability.get_mut(cap) {
                    ids.retain(|id| id != &old.id);
                }
            }
        }

        inner
            .by_provider
            .entry(info.provider.clone())
            .or_default()
            .push(info.id.clone());
        for cap in &info.capabilities {
            inner
                .by_capability
                .entry(*cap)
                .or_default()
                .push(info.id.clone());
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModelInfo>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.get(id).cloned()
    }

    pub fn list_by_provider(&self, provider: &str) -> Vec<Arc<ModelInfo>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut models: Vec<_> = inner
            .by_provider
            .get(provider)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub fn list_by_capability(&self, capability: Capability) -> Vec<Arc<ModelInfo>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut models: Vec<_> = inner
            .by_capability
            .get(&capability)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Case-insensitive substring search over model ids.
    pub fn search(&self, fragment: &str) -> Vec<Arc<ModelInfo>> {
        let needle = fragment.to_lowercase();
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut models: Vec<_> = inner
            .by_id
            .values()
            .filter(|m| m.id.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Validates that `model` exists, is not deprecated, and serves
    /// `capability`. This is the check builders run unless the provider's
    /// `dynamic_models` flag bypasses it.
    pub fn supports(&self, model: &str, capability: Capability) -> Result<Arc<ModelInfo>> {
        let info = self
            .get(model)
            .ok_or_else(|| WormholeError::model(format!("unknown model '{model}'")))?;
        if info.deprecated {
            return Err(
                WormholeError::model(format!("model '{model}' is deprecated")).with_model(model),
            );
        }
        if !info.capabilities.contains(&capability) {
            return Err(WormholeError::model(format!(
                "model '{model}' does not support {capability}"
            ))
            .with_model(model));
        }
        Ok(info)
    }

    /// Linear cost estimate in the cost table's currency, or `None` when
    /// the model is unknown or unpriced. Purely informational.
    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
        let info = self.get(model)?;
        let cost = info.cost?;
        Some(
            input_tokens as f64 / 1000.0 * cost.input_per_1k
                + output_tokens as f64 / 1000.0 * cost.output_per_1k,
        )
    }

    /// Looks up one per-model constraint value.
    pub fn constraint(&self, model: &str, key: &str) -> Option<Value> {
        self.get(model)?.constraints.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The process-wide default registry, seeded on first access with a small
/// catalog of well-known models so validation works out of the box.
pub fn default_registry() -> &'static ModelRegistry {
    static DEFAULT: OnceLock<ModelRegistry> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        let registry = ModelRegistry::new();
        seed_catalog(&registry);
        registry
    })
}

/// The registry production code reads: the caller-provided one when set,
/// the process default otherwise.
pub fn registry_or_default(registry: Option<&Arc<ModelRegistry>>) -> &ModelRegistry {
    match registry {
        Some(r) => r,
        None => default_registry(),
    }
}

fn seed_catalog(registry: &ModelRegistry) {
    use Capability::*;

    registry.register(
        ModelInfo::new("gpt-4o", "openai")
            .context_length(128_000)
            .max_output_tokens(16_384)
            .capabilities([Text, Stream, Structured])
            .cost(0.0025, 0.01),
    );
    registry.register(
        ModelInfo::new("gpt-4o-mini", "openai")
            .context_length(128_000)
            .max_output_tokens(16_384)
            .capabilities([Text, Stream, Structured])
            .cost(0.00015, 0.0006),
    );
    registry.register(
        ModelInfo::new("o1", "openai")
            .context_length(200_000)
            .max_output_tokens(100_000)
            .capabilities([Text, Stream, Structured])
            .constraint("temperature", Value::from(1.0))
            .cost(0.015, 0.06),
    );
    registry.register(
        ModelInfo::new("text-embedding-3-small", "openai")
            .context_length(8_191)
            .capabilities([Embeddings])
            .cost(0.00002, 0.0),
    );
    registry.register(
        ModelInfo::new("text-embedding-3-large", "openai")
            .context_length(8_191)
            .capabilities([Embeddings])
            .cost(0.00013, 0.0),
    );
    registry.register(
        ModelInfo::new("dall-e-3", "openai").capabilities([Image]),
    );
    registry.register(
        ModelInfo::new("tts-1", "openai").capabilities([Audio]),
    );
    registry.register(
        ModelInfo::new("whisper-1", "openai").capabilities([Audio]),
    );
    registry.register(
        ModelInfo::new("claude-sonnet-4-20250514", "anthropic")
            .context_length(200_000)
            .max_output_tokens(64_000)
            .capabilities([Text, Stream, Structured])
            .cost(0.003, 0.015),
    );
    registry.register(
        ModelInfo::new("claude-3-5-haiku-20241022", "anthropic")
            .context_length(200_000)
            .max_output_tokens(8_192)
            .capabilities([Text, Stream, Structured])
            .cost(0.0008, 0.004),
    );
    registry.register(
        ModelInfo::new("llama3.1", "ollama")
            .context_length(128_000)
            .capabilities([Text, Stream, Structured]),
    );
    registry.register(
        ModelInfo::new("nomic-embed-text", "ollama")
            .context_length(2_048)
            .capabilities([Embeddings]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(models: Vec<ModelInfo>) -> ModelRegistry {
        let r = ModelRegistry::new();
        for m in models {
            r.register(m);
        }
        r
    }

    #[test]
    fn test_register_and_get() {
        let r = registry_with(vec![
            ModelInfo::new("a", "p1").capabilities([Capability::Text]),
        ]);
        assert!(r.get("a").is_some());
        assert!(r.get("b").is_none());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_secondary_indexes() {
        let r = registry_with(vec![
            ModelInfo::new("a", "p1").capabilities([Capability::Text]),
            ModelInfo::new("b", "p1").capabilities([Capability::Embeddings]),
            ModelInfo::new("c", "p2").capabilities([Capability::Text]),
        ]);

        let p1: Vec<_> = r.list_by_provider("p1").iter().map(|m| m.id.clone()).collect();
        assert_eq!(p1, vec!["a", "b"]);

        let text: Vec<_> = r
            .list_by_capability(Capability::Text)
            .iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(text, vec!["a", "c"]);
    }

    #[test]
    fn test_replacement_updates_indexes() {
        let r = registry_with(vec![
            ModelInfo::new("a", "p1").capabilities([Capability::Text]),
        ]);
        r.register(ModelInfo::new("a", "p2").capabilities([Capability::Image]));

        assert!(r.list_by_provider("p1").is_empty());
        assert_eq!(r.list_by_provider("p2").len(), 1);
        assert!(r.list_by_capability(Capability::Text).is_empty());
        assert_eq!(r.list_by_capability(Capability::Image).len(), 1);
    }

    #[test]
    fn test_search_substring_case_insensitive() {
        let r = registry_with(vec![
            ModelInfo::new("gpt-4o-mini", "openai"),
            ModelInfo::new("claude-3-5-haiku", "anthropic"),
        ]);
        assert_eq!(r.search("4O").len(), 1);
        assert_eq!(r.search("haiku").len(), 1);
        assert_eq!(r.search("zzz").len(), 0);
    }

    #[test]
    fn test_supports_unknown_deprecated_and_capability() {
        let r = registry_with(vec![
            ModelInfo::new("ok", "p").capabilities([Capability::Text]),
            ModelInfo::new("old", "p")
                .capabilities([Capability::Text])
                .deprecated(),
        ]);

        assert!(r.supports("ok", Capability::Text).is_ok());
        let err = r.supports("missing", Capability::Text).unwrap_err();
        assert!(err.to_string().contains("unknown model"));
        let err = r.supports("old", Capability::Text).unwrap_err();
        assert!(err.to_string().contains("deprecated"));
        let err = r.supports("ok", Capability::Image).unwrap_err();
        assert!(err.to_string().contains("does not support image"));
    }

    #[test]
    fn test_cost_estimation_is_linear() {
        let r = registry_with(vec![ModelInfo::new("m", "p").cost(0.5, 1.0)]);
        let cost = r.estimate_cost("m", 2000, 1000).unwrap();
        assert!((cost - (1.0 + 1.0)).abs() < 1e-9);
        assert!(r.estimate_cost("unpriced", 1, 1).is_none());
    }

    #[test]
    fn test_constraint_lookup() {
        let r = registry_with(vec![
            ModelInfo::new("pinned", "p").constraint("temperature", Value::from(1.0)),
        ]);
        assert_eq!(r.constraint("pinned", "temperature"), Some(Value::from(1.0)));
        assert_eq!(r.constraint("pinned", "top_p"), None);
    }

    #[test]
    fn test_default_registry_is_seeded() {
        let r = default_registry();
        assert!(r.get("gpt-4o-mini").is_some());
        assert!(r.supports("gpt-4o-mini", Capability::Text).is_ok());
        assert!(r
            .constraint("o1", "temperature")
            .is_some());
    }

    #[test]
    fn test_registry_or_default_prefers_explicit() {
        let isolated = Arc::new(ModelRegistry::new());
        assert!(registry_or_default(Some(&isolated)).is_empty());
        assert!(!registry_or_default(None).is_empty());
    }
}
