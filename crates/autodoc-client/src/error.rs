//! Error handling for the client and stream layers.

use std::time::Duration;

use thiserror::Error;

use crate::typed::ApiError;

/// The main result type used throughout the crate.
pub type TransportResult<T> = Result<T, TransportError>;

/// Every failure the request client or the SSE transport can surface.
///
/// `Network` (no response was obtained) and `Api` (the backend answered with a
/// non-2xx status) are kept apart so callers can tell "offline" from "refused".
#[derive(Error, Debug)]
pub enum TransportError {
    /// No response was obtained: DNS, connect, TLS, or body read failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend answered with an error status.
    #[error("API error: {0}")]
    Api(ApiError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Stream transport errors. These drive reconnect state, not exceptions.
    #[error("SSE error: {kind}")]
    Sse { kind: SseErrorKind },

    /// The background task owning a connection has already shut down.
    #[error("Connection closed: {}", reason.as_deref().unwrap_or("no reason given"))]
    ConnectionClosed { reason: Option<String> },
}

/// What went wrong on an event-stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseErrorKind {
    /// The stream endpoint answered with a non-2xx status.
    InvalidStatus(http::StatusCode),
    /// The response was not `text/event-stream`.
    InvalidContentType(String),
    /// The byte stream could not be decoded into events.
    Parse(String),
    /// The server closed the stream.
    StreamEnded,
}

impl std::fmt::Display for SseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStatus(status) => write!(f, "unexpected status {status}"),
            Self::InvalidContentType(ct) => write!(f, "unexpected content type '{ct}'"),
            Self::Parse(message) => write!(f, "parse failure: {message}"),
            Self::StreamEnded => write!(f, "stream ended"),
        }
    }
}

impl TransportError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    pub fn sse_invalid_status(status: http::StatusCode) -> Self {
        Self::Sse {
            kind: SseErrorKind::InvalidStatus(status),
        }
    }

    pub fn sse_invalid_content_type(content_type: impl Into<String>) -> Self {
        Self::Sse {
            kind: SseErrorKind::InvalidContentType(content_type.into()),
        }
    }

    pub fn sse_parse(message: impl Into<String>) -> Self {
        Self::Sse {
            kind: SseErrorKind::Parse(message.into()),
        }
    }

    pub fn sse_stream_ended() -> Self {
        Self::Sse {
            kind: SseErrorKind::StreamEnded,
        }
    }

    /// The structured API error, if the backend produced one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::Api(err) => Some(err.status),
            Self::Sse {
                kind: SseErrorKind::InvalidStatus(status),
            } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` when no response was obtained at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }

    /// Returns `true` for a 401 that survived the refresh-and-retry path.
    pub fn is_unauthorized(&self) -> bool {
        self.api_error().is_some_and(ApiError::is_unauthorized)
    }
}

impl From<ApiError> for TransportError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}
