//! HTTP transport shared by the concrete providers.
//!
//! The transport owns authentication headers, JSON and multipart bodies,
//! status-to-taxonomy error mapping (with API keys masked out of every
//! detail string), per-provider retry, and the two streaming body shapes
//! the providers use: SSE `data:` events and newline-delimited JSON.

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, WormholeError};
use crate::middleware::RetryPolicy;
use crate::provider::ProviderConfig;
use crate::util::mask_secrets;

/// Raw line stream produced by the streaming endpoints: SSE `data:`
/// payloads or NDJSON lines, one JSON document per item.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` (OpenAI and compatibles).
    Bearer,
    /// `x-api-key: <key>` (Anthropic).
    ApiKeyHeader,
    /// No credentials (local servers).
    None,
}

/// One provider's HTTP client: base URL, auth, default headers, timeout,
/// and transport-level retry.
pub struct Transport {
    http: reqwest::Client,
    provider: String,
    base_url: String,
    auth: AuthStyle,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
    retry: RetryPolicy,
}

impl Transport {
    /// Builds a transport from a provider's config. `default_base_url` is
    /// used when the config has no override.
    pub fn new(
        provider: impl Into<String>,
        auth: AuthStyle,
        default_base_url: &str,
        config: &ProviderConfig,
    ) -> Result<Self> {
        // Free-form header strings are validated here so a bad config fails
        // at construction, not on the first request.
        build_header_map(&config.headers)?;

        let timeout = config.timeout.unwrap_or(Duration::from_secs(120));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WormholeError::from)?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());

        Ok(Self {
            http,
            provider: provider.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            api_key: config.api_key.as_ref().map(|k| k.expose().to_string()),
            headers: config.headers.clone(),
            retry: config.retry.clone().unwrap_or_else(RetryPolicy::none),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the transport's URL for a path, honoring a per-call base URL
    /// override.
    pub fn url(&self, path: &str, base_override: Option<&str>) -> String {
        let base = base_override
            .map(|b| b.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        format!("{base}{path}")
    }

    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth, &self.api_key) {
            (AuthStyle::Bearer, Some(key)) if !key.is_empty() => {
                builder = builder.bearer_auth(key);
            }
            (AuthStyle::ApiKeyHeader, Some(key)) if !key.is_empty() => {
                builder = builder.header("x-api-key", key.clone());
            }
            _ => {}
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
    }

    /// POSTs a JSON body and decodes a JSON response, retrying per the
    /// transport policy.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let bytes = self
            .execute_with_retry(|| self.apply_headers(self.http.post(url)).json(body))
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| self.decode_error(e))
    }

    /// POSTs a JSON body and returns the raw response bytes (TTS audio).
    pub async fn post_json_bytes<B: Serialize>(&self, url: &str, body: &B) -> Result<Vec<u8>> {
        self.execute_with_retry(|| self.apply_headers(self.http.post(url)).json(body))
            .await
    }

    /// POSTs a multipart form (STT uploads). The form is rebuilt per retry
    /// attempt because multipart bodies are single-use.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        url: &str,
        form_factory: impl Fn() -> reqwest::multipart::Form,
    ) -> Result<T> {
        let bytes = self
            .execute_with_retry(|| {
                self.apply_headers(self.http.post(url)).multipart(form_factory())
            })
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| self.decode_error(e))
    }

    /// POSTs a JSON body and returns the parsed SSE `data:` payloads as a
    /// line stream. A `data: [DONE]` payload terminates the stream; event
    /// names and comments are dropped; transport failures surface as `Err`
    /// items, after which the stream ends.
    pub async fn post_sse<B: Serialize>(&self, url: &str, body: &B) -> Result<LineStream> {
        let response = self.open_with_retry(url, body).await?;
        let provider = self.provider.clone();
        let api_key = self.api_key.clone();

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(move |event| {
                let provider = provider.clone();
                let api_key = api_key.clone();
                async move {
                    match event {
                        Ok(event) if event.data == "[DONE]" => None,
                        Ok(event) => Some(Ok(event.data)),
                        Err(err) => Some(Err(WormholeError::network("stream interrupted")
                            .with_provider(provider)
                            .with_detail(mask_secrets(&err.to_string(), api_key.as_deref())))),
                    }
                }
            })
            // One error ends the stream: the channel closes right after it.
            .scan(false, |errored, item| {
                futures::future::ready(if *errored {
                    None
                } else {
                    *errored = item.is_err();
                    Some(item)
                })
            });
        Ok(Box::pin(stream))
    }

    /// POSTs a JSON body and returns newline-delimited JSON payloads as a
    /// line stream (the Ollama streaming shape). Lines split across network
    /// chunks are reassembled before they are yielded.
    pub async fn post_ndjson<B: Serialize>(&self, url: &str, body: &B) -> Result<LineStream> {
        let response = self.open_with_retry(url, body).await?;
        let provider = self.provider.clone();
        let api_key = self.api_key.clone();

        let stream = futures::stream::unfold(
            (response, String::new(), false),
            move |(mut response, mut buffer, done)| {
                let provider = provider.clone();
                let api_key = api_key.clone();
                async move {
                    if done {
                        return None;
                    }
                    loop {
                        if let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            return Some((Ok(line), (response, buffer, false)));
                        }
                        match response.chunk().await {
                            Ok(Some(bytes)) => {
                                buffer.push_str(&String::from_utf8_lossy(&bytes));
                            }
                            Ok(None) => {
                                let rest = buffer.trim().to_string();
                                if rest.is_empty() {
                                    return None;
                                }
                                return Some((Ok(rest), (response, String::new(), true)));
                            }
                            Err(err) => {
                                let error = WormholeError::network("stream interrupted")
                                    .with_provider(provider)
                                    .with_detail(mask_secrets(
                                        &err.to_string(),
                                        api_key.as_deref(),
                                    ));
                                return Some((Err(error), (response, buffer, true)));
                            }
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    /// Opens a streaming response, retrying only the open.
    async fn open_with_retry<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .send_checked(self.apply_headers(self.http.post(url)).json(body))
                .await;
            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    attempt += 1;
                    if !err.retryable() || attempt >= self.retry.max_attempts.max(1) {
                        return Err(self.tag(err));
                    }
                    tokio::time::sleep(self.retry.wait_after(&err, attempt - 1)).await;
                }
            }
        }
    }

    /// Runs a request builder through the retry loop and collects the body.
    async fn execute_with_retry(
        &self,
        builder_factory: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Vec<u8>> {
        let mut attempt = 0u32;
        loop {
            let result = async {
                let response = self.send_checked(builder_factory()).await?;
                response
                    .bytes()
                    .await
                    .map(|bytes| bytes.to_vec())
                    .map_err(WormholeError::from)
            }
            .await;

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    attempt += 1;
                    if !err.retryable() || attempt >= self.retry.max_attempts.max(1) {
                        return Err(self.tag(err));
                    }
                    let wait = self.retry.wait_after(&err, attempt - 1);
                    tracing::debug!(
                        provider = %self.provider,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "transport retry"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Sends one request and maps non-success statuses to the taxonomy,
    /// folding in any `Retry-After` hint and masking secrets out of the
    /// body.
    async fn send_checked(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(WormholeError::from)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let mut err = WormholeError::from_status(status.as_u16(), &body, self.api_key.as_deref());
        if let Some(delay) = retry_after {
            err = err.with_retry_after(delay);
        }
        Err(err)
    }

    fn tag(&self, err: WormholeError) -> WormholeError {
        err.with_provider(&self.provider)
    }

    fn decode_error(&self, err: serde_json::Error) -> WormholeError {
        WormholeError::provider(format!("failed to decode {} response", self.provider))
            .with_provider(&self.provider)
            .with_source(err)
    }
}

/// Parses `Retry-After` as delay seconds (fractions allowed). HTTP-date
/// values are ignored; the computed backoff covers that case.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?;
    let seconds: f64 = value.trim().parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

/// Validates header names and values from free-form config strings.
pub fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| WormholeError::config(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| WormholeError::config(format!("invalid value for header '{name:?}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}
