//! Per-provider configuration.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::middleware::RetryPolicy;
use crate::util::mask_api_key;

/// Everything a provider factory needs: credentials, endpoint, headers,
/// timeout, transport retry policy, and free-form parameters merged into
/// request bodies verbatim.
///
/// Credentials come from the embedder; the crate never reads environment
/// variables itself.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use wormhole::ProviderConfig;
///
/// let config = ProviderConfig::new()
///     .api_key("sk-local-0000-demo")
///     .base_url("http://localhost:8080/v1")
///     .timeout(Duration::from_secs(30))
///     .dynamic_models(true);
///
/// assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080/v1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// API key; masked in all debug output and error details.
    pub api_key: Option<ApiKey>,
    /// Endpoint override. Each provider supplies its default.
    pub base_url: Option<String>,
    /// Extra headers merged into every outbound request.
    pub headers: Vec<(String, String)>,
    /// Upper bound per HTTP call.
    pub timeout: Option<Duration>,
    /// Transport-level retry, independent of any retry middleware.
    pub retry: Option<RetryPolicy>,
    /// Skip model-registry validation before dispatch.
    pub dynamic_models: bool,
    /// Free-form parameters passed through in the request body.
    pub params: Map<String, Value>,
}

/// An API key that refuses to print itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building auth headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey({})", mask_api_key(&self.0))
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&mask_api_key(&self.0))
    }
}

impl From<&str> for ApiKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ApiKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<ApiKey>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Transport retry policy: attempts, initial delay, and max delay.
    pub fn retries(mut self, max_attempts: u32, initial_delay: Duration) -> Self {
        let mut policy = self.retry.unwrap_or_default();
        policy.max_attempts = max_attempts;
        policy.initial_delay = initial_delay;
        self.retry = Some(policy);
        self
    }

    pub fn retry_max_delay(mut self, max_delay: Duration) -> Self {
        let mut policy = self.retry.unwrap_or_default();
        policy.max_delay = max_delay;
        self.retry = Some(policy);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn dynamic_models(mut self, enabled: bool) -> Self {
        self.dynamic_models = enabled;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}
