//! Authenticated HTTP client with transparent, coalesced token refresh.
//!
//! [`ApiClient`] owns its access token and its in-flight refresh, so each
//! instance is isolated. Every request carries cookies. A `401` on an
//! authenticated request triggers at most one refresh per client at a time,
//! after which the original request is re-issued exactly once.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{TokenStore, bearer_header},
    error::{TransportError, TransportResult},
    typed::{ApiError, decode_success},
};

/// Path of the cookie-only refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Header carrying the per-attempt request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL every relative path is joined onto.
    pub base_url: String,

    /// Per-request timeout. Not applied to event streams.
    pub timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Path of the refresh endpoint, relative to the base URL.
    pub refresh_path: String,

    /// Default headers to include with all requests
    pub default_headers: HashMap<String, String>,
}

impl HttpConfig {
    /// Create a new HTTP configuration with defaults.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("autodoc-client/", env!("CARGO_PKG_VERSION")).to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            default_headers: HashMap::new(),
        }
    }

    /// Create a builder for the HTTP configuration.
    pub fn builder(base_url: impl Into<String>) -> HttpConfigBuilder {
        HttpConfigBuilder::new(base_url)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TransportResult<()> {
        if self.base_url.is_empty() {
            return Err(TransportError::config("Base URL cannot be empty"));
        }

        if self.timeout.is_zero() {
            return Err(TransportError::config("Timeout cannot be zero"));
        }

        if !self.refresh_path.starts_with('/') {
            return Err(TransportError::config("Refresh path must start with '/'"));
        }

        url::Url::parse(&self.base_url)
            .map_err(|e| TransportError::config(format!("Invalid base URL: {e}")))?;

        for (name, value) in &self.default_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::config(format!("Invalid header name '{name}': {e}")))?;
            HeaderValue::from_str(value).map_err(|e| {
                TransportError::config(format!("Invalid value for header '{name}': {e}"))
            })?;
        }

        Ok(())
    }

    /// Join a path onto the base URL. Absolute URLs pass through untouched.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }
}

/// Builder for HTTP configuration.
pub struct HttpConfigBuilder {
    config: HttpConfig,
}

impl HttpConfigBuilder {
    /// Create a new builder.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: HttpConfig::new(base_url),
        }
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Override the refresh endpoint path.
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.config.refresh_path = path.into();
        self
    }

    /// Add a default header.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .default_headers
            .insert(name.into(), value.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TransportResult<HttpConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Serialized JSON body.
    pub body: Option<Bytes>,
    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// Extra headers for this request only.
    pub headers: HeaderMap,
    /// Send no bearer token and never refresh on `401`.
    pub skip_auth: bool,
}

impl RequestOptions {
    /// Options for an authenticated request with no body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> TransportResult<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Append one query parameter. Repeated names are kept in order.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a header for this request, replacing any earlier value.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Opt out of bearer auth and the refresh-and-retry path.
    #[must_use]
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Final status, after any refresh-and-retry.
    pub status: StatusCode,
    /// Response headers as received.
    pub headers: HeaderMap,
    /// Raw body, still wrapped in the success envelope.
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body, unwrapping the success envelope.
    pub fn json<T: DeserializeOwned>(&self) -> TransportResult<T> {
        decode_success(&self.body)
    }
}

/// Counters kept by each client.
#[derive(Debug, Default)]
pub struct HttpClientMetrics {
    /// Requests handed to the HTTP client, retries included.
    pub requests_sent: AtomicU64,
    /// Requests that ended in a transport error, an unreadable body or a
    /// non-2xx status.
    pub requests_failed: AtomicU64,
    /// Refresh calls actually sent, after coalescing.
    pub refresh_attempts: AtomicU64,
    /// Refresh calls that produced no new token.
    pub refresh_failures: AtomicU64,
    /// Requests replayed after a `401`.
    pub auth_retries: AtomicU64,
}

impl HttpClientMetrics {
    /// Share of sent requests that did not yield a 2xx response.
    pub fn error_rate(&self) -> f64 {
        let total = self.requests_sent.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.requests_failed.load(Ordering::Relaxed) as f64 / total as f64
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Option<String>>>;

struct ClientInner {
    http: reqwest::Client,
    config: HttpConfig,
    tokens: Arc<TokenStore>,
    in_flight_refresh: Mutex<Option<SharedRefresh>>,
    metrics: Arc<HttpClientMetrics>,
}

/// Authenticated request client.
///
/// Cheap to clone; clones share the token, the refresh slot and the cookie jar.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.inner.config)
            .field("tokens", &self.inner.tokens)
            .finish()
    }
}

impl ApiClient {
    /// Create a new client with an empty cookie jar and no token.
    pub fn new(config: HttpConfig) -> TransportResult<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TransportError::config(format!("Failed to build client: {e}")))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                config,
                tokens: Arc::new(TokenStore::new()),
                in_flight_refresh: Mutex::new(None),
                metrics: Arc::new(HttpClientMetrics::default()),
            }),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.inner.config
    }

    /// Get client metrics.
    pub fn metrics(&self) -> &HttpClientMetrics {
        &self.inner.metrics
    }

    /// The underlying HTTP client, for connections that must share the cookie jar.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// The token holder, shared with stream connections for their headers.
    pub fn tokens(&self) -> Arc<TokenStore> {
        Arc::clone(&self.inner.tokens)
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.tokens.get()
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.inner.tokens.set(token);
    }

    pub fn clear_access_token(&self) {
        self.inner.tokens.clear();
    }

    /// Send a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> TransportResult<T> {
        self.request(Method::GET, path, RequestOptions::new())
            .await?
            .json()
    }

    /// Send a POST request with a JSON body.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> TransportResult<T> {
        self.request(Method::POST, path, RequestOptions::new().json(body)?)
            .await?
            .json()
    }

    /// Send a PATCH request with a JSON body.
    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> TransportResult<T> {
        self.request(Method::PATCH, path, RequestOptions::new().json(body)?)
            .await?
            .json()
    }

    /// Send a DELETE request.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> TransportResult<T> {
        self.request(Method::DELETE, path, RequestOptions::new())
            .await?
            .json()
    }

    /// Issue a request, refreshing and retrying once on `401`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Network`] when no response was obtained and
    /// [`TransportError::Api`] for any non-2xx answer, including a `401` that
    /// the refresh could not cure.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> TransportResult<ApiResponse> {
        let url = self.inner.config.url_for(path);
        let sent_token = if options.skip_auth {
            None
        } else {
            self.inner.tokens.get()
        };

        let response = self
            .dispatch(&method, &url, &options, sent_token.as_deref())
            .await?;

        if response.status != StatusCode::UNAUTHORIZED || options.skip_auth {
            return self.finish(response);
        }

        // Another task may already have refreshed while this request was in flight.
        let retry_token = match self.inner.tokens.get() {
            Some(current) if sent_token.as_deref() != Some(current.as_str()) => Some(current),
            _ => self.refresh().await,
        };

        let Some(token) = retry_token else {
            warn!(%method, %url, "No token after refresh, surfacing 401");
            return self.finish(response);
        };

        self.inner.metrics.auth_retries.fetch_add(1, Ordering::Relaxed);
        debug!(%method, %url, "Retrying request with refreshed token");
        let retried = self.dispatch(&method, &url, &options, Some(&token)).await?;
        self.finish(retried)
    }

    /// Exchange the refresh cookie for a new access token.
    ///
    /// Concurrent callers share one network request and receive the same
    /// result. Failures are logged and yield `None`; nothing is cleared here.
    pub async fn refresh(&self) -> Option<String> {
        let shared = {
            let mut slot = self.inner.in_flight_refresh.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let fresh = refresh_token(
                        self.inner.http.clone(),
                        self.inner.config.url_for(&self.inner.config.refresh_path),
                        self.inner.config.timeout,
                        Arc::clone(&self.inner.tokens),
                        Arc::clone(&self.inner.metrics),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        let token = shared.clone().await;

        let mut slot = self.inner.in_flight_refresh.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&shared)) {
            *slot = None;
        }

        token
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> TransportResult<ApiResponse> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.inner.config.default_headers {
            // Validated when the config was built.
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, bearer_header(token)?);
        }
        let request_id = Uuid::new_v4();
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        let mut builder = self
            .inner
            .http
            .request(method.clone(), url)
            .timeout(self.inner.config.timeout)
            .headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = &options.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        self.inner.metrics.requests_sent.fetch_add(1, Ordering::Relaxed);
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                self.inner
                    .metrics
                    .requests_failed
                    .fetch_add(1, Ordering::Relaxed);
                warn!(%method, %url, %request_id, error = %e, "Request failed without a response");
                return Err(TransportError::Network(e));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                self.inner
                    .metrics
                    .requests_failed
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    %method,
                    %url,
                    %request_id,
                    status = status.as_u16(),
                    error = %e,
                    "Response body could not be read"
                );
                return Err(TransportError::Network(e));
            }
        };
        debug!(%method, %url, %request_id, status = status.as_u16(), "Response received");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    fn finish(&self, response: ApiResponse) -> TransportResult<ApiResponse> {
        if response.status.is_success() {
            return Ok(response);
        }
        self.inner
            .metrics
            .requests_failed
            .fetch_add(1, Ordering::Relaxed);
        Err(ApiError::from_response(response.status, &response.body).into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    access_token: String,
}

async fn refresh_token(
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    tokens: Arc<TokenStore>,
    metrics: Arc<HttpClientMetrics>,
) -> Option<String> {
    metrics.refresh_attempts.fetch_add(1, Ordering::Relaxed);
    info!(%url, "Refreshing access token");

    let outcome = fetch_refresh_token(&http, &url, timeout).await;

    match outcome {
        Ok(token) => {
            tokens.set(token.clone());
            info!("Access token refreshed");
            Some(token)
        }
        Err(e) => {
            metrics.refresh_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Token refresh failed");
            None
        }
    }
}

async fn fetch_refresh_token(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> TransportResult<String> {
    let response = http.post(url).timeout(timeout).send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(ApiError::from_response(status, &body).into());
    }
    let payload: RefreshPayload = decode_success(&body)?;
    Ok(payload.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HttpConfig::new("https://api.example.com");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert!(config.user_agent.starts_with("autodoc-client/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(HttpConfig::builder("").build().is_err());
        assert!(HttpConfig::builder("not a url").build().is_err());
        assert!(
            HttpConfig::builder("https://api.example.com")
                .timeout(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            HttpConfig::builder("https://api.example.com")
                .refresh_path("auth/refresh")
                .build()
                .is_err()
        );
        assert!(
            HttpConfig::builder("https://api.example.com")
                .default_header("X-Bad", "line\nbreak")
                .build()
                .is_err()
        );
        assert!(
            HttpConfig::builder("https://api.example.com")
                .default_header("X-Client", "dashboard")
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_url_for() {
        let config = HttpConfig::new("https://api.example.com/api/");
        assert_eq!(
            config.url_for("/projects/42"),
            "https://api.example.com/api/projects/42"
        );
        assert_eq!(
            config.url_for("projects"),
            "https://api.example.com/api/projects"
        );
        assert_eq!(
            config.url_for("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_request_options() {
        let options = RequestOptions::new()
            .json(&serde_json::json!({"name": "docs"}))
            .expect("serialize")
            .query("page", "2")
            .skip_auth();
        assert!(options.skip_auth);
        assert_eq!(options.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(options.body.as_deref(), Some(br#"{"name":"docs"}"#.as_slice()));
    }

    #[test]
    fn test_client_holds_token_in_memory() {
        let client = ApiClient::new(HttpConfig::new("https://api.example.com")).expect("client");
        assert!(client.access_token().is_none());
        client.set_access_token("abc");
        assert_eq!(client.access_token().as_deref(), Some("abc"));

        // Clones share the same token.
        let clone = client.clone();
        clone.clear_access_token();
        assert!(client.access_token().is_none());
    }

    #[test]
    fn test_metrics_error_rate() {
        let metrics = HttpClientMetrics::default();
        assert_eq!(metrics.error_rate(), 0.0);
        metrics.requests_sent.store(4, Ordering::Relaxed);
        metrics.requests_failed.store(1, Ordering::Relaxed);
        assert_eq!(metrics.error_rate(), 0.25);
    }
}
