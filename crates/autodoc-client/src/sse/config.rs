//! SSE connection configuration.

use std::time::Duration;

use super::parse::DEFAULT_MAX_EVENT_SIZE;
use crate::reconnect::ReconnectPolicy;

/// Configuration for SSE connections.
#[derive(Clone, Debug)]
pub struct SseConfig {
    /// SSE endpoint URL.
    pub url: String,
    /// Additional HTTP headers to include with every SSE request.
    pub headers: http::HeaderMap,
    /// Time allowed for the response headers to arrive.
    pub connect_timeout: Duration,
    /// Reconnection backoff and attempt limit.
    pub reconnect: ReconnectPolicy,
    /// Whether to run the [`Authentication`](crate::auth::Authentication) on
    /// every connect and reconnect.
    pub auth_on_connect: bool,
    /// Capacity of the event channel.
    pub event_channel_capacity: usize,
    /// Capacity of the command channel.
    pub command_channel_capacity: usize,
    /// Largest line or event payload accepted from the server, in bytes.
    pub max_event_size: usize,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: http::HeaderMap::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            auth_on_connect: true,
            event_channel_capacity: 256,
            command_channel_capacity: 16,
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
        }
    }
}

impl SseConfig {
    /// Create a new SSE configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the whole reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the initial reconnection delay.
    #[must_use]
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect.initial_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect.max_delay = delay;
        self
    }

    /// Set the maximum consecutive reconnection attempts (`None` = unbounded).
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect.jitter = jitter;
        self
    }

    /// Set whether to authenticate on connect.
    #[must_use]
    pub fn auth_on_connect(mut self, auth: bool) -> Self {
        self.auth_on_connect = auth;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Set the largest accepted line or event payload.
    #[must_use]
    pub fn max_event_size(mut self, bytes: usize) -> Self {
        self.max_event_size = bytes;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        if url::Url::parse(&self.url).is_err() {
            return Err(format!("Invalid URL: {}", self.url));
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        self.reconnect.validate()?;
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if self.max_event_size == 0 {
            return Err("Max event size must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SseConfig::default();
        assert!(config.url.is_empty());
        assert!(config.headers.is_empty());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.reconnect.max_attempts, Some(5));
        assert!(config.auth_on_connect);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.max_event_size, 1024 * 1024);
    }

    #[test]
    fn test_builder_pattern() {
        let mut headers = http::HeaderMap::new();
        headers.insert("X-Client", "dashboard".parse().expect("valid header value"));

        let config = SseConfig::new("https://api.example.com/projects/7/stream")
            .headers(headers)
            .connect_timeout(Duration::from_secs(3))
            .reconnect_initial_delay(Duration::from_millis(50))
            .reconnect_max_delay(Duration::from_secs(2))
            .reconnect_max_attempts(Some(2))
            .reconnect_jitter(0.0)
            .auth_on_connect(false)
            .event_channel_capacity(8)
            .max_event_size(4096);

        assert_eq!(config.url, "https://api.example.com/projects/7/stream");
        assert_eq!(
            config.headers.get("X-Client").and_then(|v| v.to_str().ok()),
            Some("dashboard")
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(50));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, Some(2));
        assert_eq!(config.reconnect.jitter, 0.0);
        assert!(!config.auth_on_connect);
        assert_eq!(config.event_channel_capacity, 8);
        assert_eq!(config.max_event_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            SseConfig::default().validate().expect_err("should fail"),
            "URL cannot be empty"
        );
        assert!(SseConfig::new("not a url").validate().is_err());
        assert_eq!(
            SseConfig::new("https://example.com")
                .reconnect_jitter(1.5)
                .validate()
                .expect_err("should fail"),
            "Jitter must be between 0.0 and 1.0"
        );
        assert_eq!(
            SseConfig::new("https://example.com")
                .event_channel_capacity(0)
                .validate()
                .expect_err("should fail"),
            "Event channel capacity must be > 0"
        );
        assert_eq!(
            SseConfig::new("https://example.com")
                .connect_timeout(Duration::ZERO)
                .validate()
                .expect_err("should fail"),
            "Connect timeout must be > 0"
        );
        assert_eq!(
            SseConfig::new("https://example.com")
                .max_event_size(0)
                .validate()
                .expect_err("should fail"),
            "Max event size must be > 0"
        );
    }
}
