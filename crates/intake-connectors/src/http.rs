//! HTTP utilities for connectors.
//!
//! This module provides the HTTP client used by every integration: retry with
//! backoff, optional rate limiting, pluggable authentication with a single
//! re-login on rejected credentials, and a response cache.

use crate::auth::{AuthContext, AuthStrategy};
use crate::traits::{ConnectorConfig, ConnectorError, ConnectorResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use moka::future::Cache as MokaCache;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Type alias for the rate limiter.
type RateLimiterType = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Longest wait honoured from a `retry-after` header.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// HTTP client with retry, rate limiting, and authentication.
pub struct HttpClient {
    client: Client,
    config: ConnectorConfig,
    auth: Arc<dyn AuthStrategy>,
    /// Rate limiter for this client.
    rate_limiter: Option<Arc<RateLimiterType>>,
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per period.
    pub max_requests: u32,
    /// Period duration.
    pub period: Duration,
    /// Maximum burst size.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            period: Duration::from_secs(60),
            burst_size: 10,
        }
    }
}

/// A request relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Adds a query parameter only when a value is present.
    pub fn query_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl HttpClient {
    /// Creates a new HTTP client from connector configuration.
    pub fn new(config: ConnectorConfig, auth: Arc<dyn AuthStrategy>) -> ConnectorResult<Self> {
        Self::with_rate_limit(config, auth, None)
    }

    /// Creates a new HTTP client with rate limiting.
    pub fn with_rate_limit(
        config: ConnectorConfig,
        auth: Arc<dyn AuthStrategy>,
        rate_limit: Option<RateLimitConfig>,
    ) -> ConnectorResult<Self> {
        let verify_tls = if config.verify_tls {
            true
        } else if can_disable_tls_verification() {
            warn!(
                base_url = %config.base_url,
                connector_name = %config.name,
                "TLS certificate verification DISABLED in development mode"
            );
            false
        } else {
            warn!(
                base_url = %config.base_url,
                connector_name = %config.name,
                "Ignoring request to disable TLS verification in a release build"
            );
            true
        };

        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            if let (Ok(name), Ok(val)) = (
                reqwest::header::HeaderName::try_from(key.as_str()),
                reqwest::header::HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, val);
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!verify_tls)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let rate_limiter = match rate_limit {
            Some(rl) => {
                let per_request = rl.period / rl.max_requests.max(1);
                let quota = Quota::with_period(per_request)
                    .ok_or_else(|| {
                        ConnectorError::ConfigError("Rate limit period must be non-zero".into())
                    })?
                    .allow_burst(NonZeroU32::new(rl.burst_size).unwrap_or(NonZeroU32::MIN));
                Some(Arc::new(GovernorRateLimiter::direct(quota)))
            }
            None => None,
        };

        Ok(Self {
            client,
            config,
            auth,
            rate_limiter,
        })
    }

    /// Builds a URL from a path. Absolute URLs, such as vendor download
    /// links, are used as given.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            return path.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn auth_context(&self) -> AuthContext<'_> {
        AuthContext {
            client: &self.client,
            base_url: &self.config.base_url,
        }
    }

    /// Sends a request with authentication, rate limiting and retries.
    ///
    /// Timeouts, connection errors, 5xx and 429 responses are retried up to
    /// `max_retries` times with exponential backoff. When the auth strategy
    /// flags a response as rejected credentials, it is invalidated and the
    /// request is sent once more with fresh credentials.
    pub async fn send(&self, request: &ApiRequest) -> ConnectorResult<Response> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 0u32;
        let mut reauthenticated = false;

        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            let builder = self.prepare(request);
            let builder = self.auth.authorize(&self.auth_context(), builder).await?;

            let error = match builder.send().await {
                Err(e) => map_send_error(e),
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() || status.is_redirection() {
                        return Ok(response);
                    }

                    if self.auth.is_rejection(status)
                        && !reauthenticated
                        && self.auth.invalidate().await?
                    {
                        warn!(path = %request.path, %status, "Credentials rejected, logging in again");
                        reauthenticated = true;
                        continue;
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(MAX_RETRY_AFTER_SECS);

                        if attempt < self.config.max_retries {
                            warn!("Rate limited, waiting {} seconds", retry_after);
                            sleep(Duration::from_secs(retry_after.min(MAX_RETRY_AFTER_SECS)))
                                .await;
                            attempt += 1;
                            continue;
                        }
                        return Err(ConnectorError::RateLimited(retry_after));
                    }

                    let body = response.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        ConnectorError::ServerError(format!("{}: {}", status, snippet(&body)))
                    } else {
                        return Err(client_error(status, &body));
                    }
                }
            };

            if attempt >= self.config.max_retries {
                return Err(error);
            }
            attempt += 1;
            debug!(path = %request.path, "Retry attempt {} after {:?}: {}", attempt, delay, error);
            sleep(delay).await;
            delay = std::cmp::min(delay * 2 + rand_jitter(), Duration::from_secs(30));
        }
    }

    /// Sends a request and parses the JSON body. An empty body reads as null.
    pub async fn send_json(&self, request: &ApiRequest) -> ConnectorResult<Value> {
        let response = self.send(request).await?;
        parse_json_response(response).await
    }

    /// Sends a request and returns the raw body, e.g. a file download.
    pub async fn send_bytes(&self, request: &ApiRequest) -> ConnectorResult<Vec<u8>> {
        let response = self.send(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        Ok(body.to_vec())
    }

    /// Sends a request and deserializes the JSON body into `T`.
    pub async fn send_as<T: DeserializeOwned>(&self, request: &ApiRequest) -> ConnectorResult<T> {
        let value = self.send_json(request).await?;
        serde_json::from_value(value).map_err(|e| {
            ConnectorError::InvalidResponse(format!("Unexpected response shape: {}", e))
        })
    }

    /// Executes a GET request and parses the JSON body.
    pub async fn get_json(&self, path: &str) -> ConnectorResult<Value> {
        self.send_json(&ApiRequest::get(path)).await
    }

    /// Ends the auth strategy's server-side session, if any.
    pub async fn logout(&self) -> ConnectorResult<()> {
        self.auth.logout(&self.auth_context()).await
    }

    fn prepare(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), self.build_url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

async fn parse_json_response(response: Response) -> ConnectorResult<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| {
        ConnectorError::InvalidResponse(format!(
            "Failed to parse response (status {}): {} - Body: {}",
            status,
            e,
            snippet(&text)
        ))
    })
}

fn map_send_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout(e.to_string())
    } else if e.is_connect() {
        ConnectorError::ConnectionFailed(e.to_string())
    } else {
        ConnectorError::RequestFailed(e.to_string())
    }
}

fn client_error(status: StatusCode, body: &str) -> ConnectorError {
    let detail = vendor_message(body);
    match status {
        StatusCode::UNAUTHORIZED => {
            ConnectorError::AuthenticationFailed(detail.unwrap_or_else(|| "Unauthorized".into()))
        }
        StatusCode::FORBIDDEN => {
            ConnectorError::AuthorizationDenied(detail.unwrap_or_else(|| "Forbidden".into()))
        }
        StatusCode::NOT_FOUND => {
            ConnectorError::NotFound(detail.unwrap_or_else(|| "Resource not found".into()))
        }
        StatusCode::BAD_REQUEST => ConnectorError::RequestFailed(format!(
            "Bad request: {}",
            detail.unwrap_or_else(|| snippet(body))
        )),
        _ => ConnectorError::RequestFailed(format!(
            "Client error {}: {}",
            status,
            detail.unwrap_or_else(|| snippet(body))
        )),
    }
}

/// Pulls the human-readable error out of common vendor error envelopes.
fn vendor_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_msg", "message", "errors", "error"]
        .iter()
        .find_map(|key| match value.get(*key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Null | Value::String(_) => None,
            other => Some(other.to_string()),
        })
}

fn snippet(text: &str) -> String {
    text.chars().take(500).collect()
}

/// Generate a small random jitter for exponential backoff.
fn rand_jitter() -> Duration {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::Instant::now().hash(&mut hasher);
    Duration::from_millis(hasher.finish() % 100)
}

/// Whether this build honours `verify_tls: false`. Only debug builds do.
#[inline]
pub fn can_disable_tls_verification() -> bool {
    cfg!(debug_assertions)
}

/// Response cache using moka for async caching.
pub struct ResponseCache<V: Clone + Send + Sync + 'static> {
    cache: MokaCache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    /// Creates a new cache with the specified TTL and max capacity.
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { cache }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: String, value: V) {
        self.cache.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Tries to get a value or inserts it using a fallible async function.
    /// Errors are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: String, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.cache.get(&key).await {
            return Ok(v);
        }
        let value = f().await?;
        self.cache.insert(key, value.clone()).await;
        Ok(value)
    }
}
