//! Server-Sent Events transport.
//!
//! ```text
//! SseConnection::connect(config, handler)
//!   └─ spawns background task ──► tokio::spawn(sse_connection_driver)
//!        │                              │
//!        ├── SseHandle ◄─── mpsc ◄──────┤  (commands: Close, Reconnect)
//!        │                              │
//!        └── SseStream ◄─── mpsc ◄──────┘  (SseItem: Opened, Event, Interrupted, Closed)
//! ```
//!
//! The driver validates each response (2xx, `text/event-stream`), decodes the
//! body with [`parse::EventStream`], classifies every event through the
//! [`SseProtocolHandler`], and reconnects according to the configured
//! [`ReconnectPolicy`](crate::reconnect::ReconnectPolicy), resending
//! `Last-Event-ID`. Lifecycle hooks on the handler run on the driver task, and
//! the same transitions are queued on the stream between the events they
//! separate.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod parse;
pub mod protocol;
pub mod types;

pub use config::SseConfig;
pub use connection::{SseCommand, SseConnection, SseHandle, SseStream};
pub use handlers::GenericSseHandler;
pub use parse::{DecodeError, Event, EventDecoder, EventStream, EventStreamError};
pub use protocol::SseProtocolHandler;
pub use types::{SseEvent, SseItem, SseMessageKind};
