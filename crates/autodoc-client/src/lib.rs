//! # autodoc-client
//!
//! Client for the autodoc backend: an authenticated request client with
//! transparent token refresh, and a consumer for a job's live pipeline events.
//!
//! ## Features
//!
//! - **Coalesced refresh**: any number of concurrent `401`s trigger exactly one
//!   `POST /auth/refresh`; every waiter retries once with the shared result
//! - **Cookie sessions**: the refresh cookie rides along on every request and
//!   on event streams opened from the same client
//! - **Structured errors**: backend error envelopes decode into [`ApiError`],
//!   distinct from network failures
//! - **Event streams**: an SSE transport with bounded reconnection feeding a
//!   per-job log state machine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autodoc_client::{
//!     ApiClient, HttpConfig,
//!     api::AuthApi,
//!     consumer::{ConsumerConfig, StreamConsumer},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::new(HttpConfig::builder("https://api.example.com").build()?)?;
//!     AuthApi::new(&client).login("me@example.com", "hunter2").await?;
//!
//!     let consumer = StreamConsumer::connect(&client, "project-id", ConsumerConfig::default())?;
//!     consumer.wait_until_terminal().await;
//!     for entry in consumer.snapshot().entries {
//!         println!("{} {}", entry.severity, entry.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod consumer;
pub mod error;
pub mod http;
pub mod reconnect;
pub mod sse;
pub mod typed;

pub use auth::{Authentication, BearerAuth, NoAuth, TokenStore};
pub use consumer::{ConnectionState, ConsumerConfig, JobLog, JobStatus, LogEntry, StreamConsumer};
pub use error::{SseErrorKind, TransportError, TransportResult};
pub use http::{ApiClient, ApiResponse, HttpConfig, RequestOptions};
pub use reconnect::ReconnectPolicy;
pub use typed::{ApiError, NETWORK_ERROR_CODE};
