//! Error taxonomy for the wormhole runtime.
//!
//! Every failure that reaches a caller is a [`WormholeError`]: a closed error
//! code, a human-readable message, a retryable bit, and optional context
//! (HTTP status, provider, model, operation breadcrumb, wrapped cause).
//! Middlewares and builders add context but never reclassify; the code
//! assigned at the failure site is the code the caller sees.

use std::time::Duration;

use crate::util::mask_secrets;

/// Result type alias used across all public APIs.
pub type Result<T> = std::result::Result<T, WormholeError>;

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(" ({detail})"),
        None => String::new(),
    }
}

/// Closed set of error categories.
///
/// The default retryable bit per code:
///
/// | Code | Retryable |
/// |------|-----------|
/// | Auth | no |
/// | Model | no |
/// | RateLimit | yes |
/// | Request | no |
/// | Timeout | yes |
/// | Provider | mixed (set per site) |
/// | Network | yes |
/// | Validation | no |
/// | Unknown | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Missing or invalid credentials, or quota exhaustion surfaced as 403.
    Auth,
    /// Model not found, not supported by the provider, or deprecated.
    Model,
    /// Provider-side rate limit; `Retry-After` hints are honored by retry.
    RateLimit,
    /// Malformed or oversized request rejected before or by the provider.
    Request,
    /// Deadline elapsed, locally or at the provider.
    Timeout,
    /// Provider misconfiguration, constraint violation, or unavailability.
    Provider,
    /// Transport-level failure (connection reset, DNS, 5xx).
    Network,
    /// Schema or builder validation failure.
    Validation,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorCode {
    /// Default retryable bit for the code. Individual errors may override.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimit | ErrorCode::Timeout | ErrorCode::Network
        )
    }

    /// Stable lowercase label used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Auth => "auth",
            ErrorCode::Model => "model",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::Request => "request",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Provider => "provider",
            ErrorCode::Network => "network",
            ErrorCode::Validation => "validation",
            ErrorCode::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type of the crate.
///
/// Constructed through the per-code constructors ([`WormholeError::auth`],
/// [`WormholeError::rate_limit`], ...) and enriched through the `with_*`
/// builders as it travels up the stack.
///
/// # Examples
///
/// ```
/// use wormhole::{ErrorCode, WormholeError};
///
/// let err = WormholeError::rate_limit("requests per minute exceeded")
///     .with_provider("openai")
///     .with_model("gpt-4o-mini")
///     .with_status(429);
///
/// assert_eq!(err.code(), ErrorCode::RateLimit);
/// assert!(err.retryable());
/// assert_eq!(err.status(), Some(429));
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}{}", detail_suffix(.detail))]
pub struct WormholeError {
    code: ErrorCode,
    message: String,
    detail: Option<String>,
    retryable: bool,
    status: Option<u16>,
    provider: Option<String>,
    model: Option<String>,
    operation: Option<String>,
    retry_after: Option<Duration>,
    unsupported: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl WormholeError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            retryable: code.default_retryable(),
            status: None,
            provider: None,
            model: None,
            operation: None,
            retry_after: None,
            unsupported: false,
            source: None,
        }
    }

    /// Authentication failure. Not retryable.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Auth, message)
    }

    /// Model not found, unsupported, or deprecated. Not retryable.
    pub fn model(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Model, message)
    }

    /// Provider rate limit. Retryable.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimit, message)
    }

    /// Malformed or rejected request. Not retryable.
    pub fn request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Request, message)
    }

    /// Deadline elapsed. Retryable.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Provider-side failure; callers set the retryable bit per site.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Provider, message)
    }

    /// Transport failure. Retryable.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Network, message)
    }

    /// Schema or builder validation failure. Not retryable.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    /// Unclassified failure. Not retryable.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    /// Configuration error raised at client construction time.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    /// The typed "this provider does not implement that capability" error
    /// every [`Provider`](crate::provider::Provider) method defaults to.
    pub fn unsupported(provider: &str, capability: &str) -> Self {
        let mut err = Self::new(
            ErrorCode::Provider,
            format!("provider '{provider}' does not support {capability}"),
        );
        err.provider = Some(provider.to_string());
        err.operation = Some(capability.to_string());
        err.unsupported = true;
        err
    }

    /// Maps an HTTP status and response body to the taxonomy. The body
    /// becomes the detail field after secret masking.
    ///
    /// 401 → auth, 403 → auth (quota), 404 → model, 429 → rate limit,
    /// 400/413 → request, 408 → timeout, 5xx → network, else unknown.
    pub fn from_status(status: u16, body: &str, api_key: Option<&str>) -> Self {
        let detail = mask_secrets(body, api_key);
        let mut err = match status {
            401 => Self::auth("invalid or missing API key"),
            403 => Self::auth("access forbidden or quota exhausted"),
            404 => Self::model("model or endpoint not found"),
            429 => Self::rate_limit("rate limit exceeded"),
            400 | 413 => Self::request("request rejected by provider"),
            408 => Self::timeout("provider timed out handling the request"),
            500..=599 => Self::network("provider unavailable"),
            _ => Self::unknown(format!("unexpected HTTP status {status}")),
        };
        err.status = Some(status);
        if !detail.is_empty() {
            err.detail = Some(detail);
        }
        err
    }

    /// Attaches a detail string (masked upstream where it may carry secrets).
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Tags the error with the provider it came from. First writer wins so
    /// middleware breadcrumbs never overwrite the failure site's tag.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider.get_or_insert_with(|| provider.into());
        self
    }

    /// Tags the error with the model involved. First writer wins.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model.get_or_insert_with(|| model.into());
        self
    }

    /// Tags the error with the operation breadcrumb (`text`, `stream`, ...).
    /// First writer wins.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation.get_or_insert_with(|| operation.into());
        self
    }

    /// Records the HTTP status behind this error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Records a provider-supplied `Retry-After` hint.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Overrides the retryable bit.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Wraps the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// True when the error is the capability-unsupported default; the
    /// structured builder uses this to trigger the `strict` → `tools`
    /// fallback.
    pub fn is_unsupported(&self) -> bool {
        self.unsupported
    }
}

/// Tag accessors, kept in a separate trait so their names don't collide
/// with the same-named inherent error constructors (`WormholeError::provider`,
/// `WormholeError::model`).
pub trait ErrorTags {
    /// The provider tag attached to this error, if any.
    fn provider(&self) -> Option<&str>;
    /// The model tag attached to this error, if any.
    fn model(&self) -> Option<&str>;
}

impl ErrorTags for WormholeError {
    fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

impl From<reqwest::Error> for WormholeError {
    fn from(err: reqwest::Error) -> Self {
        let base = if err.is_timeout() {
            Self::timeout("HTTP request timed out")
        } else if err.is_connect() {
            Self::network("failed to connect to provider")
        } else {
            Self::network("HTTP request failed")
        };
        // reqwest embeds the URL in its Display output; mask before keeping.
        let detail = mask_secrets(&err.to_string(), None);
        base.with_detail(detail).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retryable_bits() {
        assert!(WormholeError::rate_limit("x").retryable());
        assert!(WormholeError::timeout("x").retryable());
        assert!(WormholeError::network("x").retryable());
        assert!(!WormholeError::auth("x").retryable());
        assert!(!WormholeError::model("x").retryable());
        assert!(!WormholeError::request("x").retryable());
        assert!(!WormholeError::validation("x").retryable());
        assert!(!WormholeError::unknown("x").retryable());
    }

    #[test]
    fn test_display_includes_code_message_detail() {
        let err = WormholeError::rate_limit("slow down").with_detail("burst of 10");
        let printed = err.to_string();
        assert!(printed.contains("rate_limit"));
        assert!(printed.contains("slow down"));
        assert!(printed.contains("burst of 10"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(WormholeError::from_status(401, "", None).code(), ErrorCode::Auth);
        assert_eq!(WormholeError::from_status(403, "", None).code(), ErrorCode::Auth);
        assert_eq!(WormholeError::from_status(404, "", None).code(), ErrorCode::Model);
        assert_eq!(WormholeError::from_status(429, "", None).code(), ErrorCode::RateLimit);
        assert_eq!(WormholeError::from_status(400, "", None).code(), ErrorCode::Request);
        assert_eq!(WormholeError::from_status(413, "", None).code(), ErrorCode::Request);
        assert_eq!(WormholeError::from_status(408, "", None).code(), ErrorCode::Timeout);
        assert_eq!(WormholeError::from_status(503, "", None).code(), ErrorCode::Network);
        assert_eq!(WormholeError::from_status(418, "", None).code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_5xx_is_retryable() {
        assert!(WormholeError::from_status(500, "", None).retryable());
        assert!(WormholeError::from_status(503, "", None).retryable());
    }

    #[test]
    fn test_from_status_masks_body() {
        let err = WormholeError::from_status(
            429,
            "key sk-abcdefghijklmnop rejected",
            Some("sk-abcdefghijklmnop"),
        );
        assert!(!err.detail().unwrap().contains("sk-abcdefghijklmnop"));
        assert!(err.detail().unwrap().contains("sk-a****mnop"));
    }

    #[test]
    fn test_breadcrumbs_first_writer_wins() {
        let err = WormholeError::network("boom")
            .with_provider("openai")
            .with_provider("anthropic")
            .with_model("gpt-4o")
            .with_operation("text")
            .with_operation("stream");
        assert_eq!(err.provider(), Some("openai"));
        assert_eq!(err.model(), Some("gpt-4o"));
        assert_eq!(err.operation(), Some("text"));
    }

    #[test]
    fn test_unsupported_marker() {
        let err = WormholeError::unsupported("ollama", "image");
        assert!(err.is_unsupported());
        assert_eq!(err.code(), ErrorCode::Provider);
        assert_eq!(err.provider(), Some("ollama"));
        assert!(err.to_string().contains("does not support image"));
    }

    #[test]
    fn test_retry_after_hint() {
        let err = WormholeError::rate_limit("x").with_retry_after(Duration::from_millis(50));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(50)));
    }
}
