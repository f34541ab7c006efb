//! Protocol handler trait for SSE streams.

use super::{parse::Event, types::SseMessageKind};
use crate::error::TransportError;

/// Per-stream classification and lifecycle hooks.
///
/// All hooks run on the connection's background task, in the order the
/// transitions happen. SSE is read-only, so handlers only observe.
pub trait SseProtocolHandler: Send + Sync + 'static {
    /// Classify an incoming event.
    fn classify_event(&self, event: &Event) -> SseMessageKind;

    /// A connection was established (or re-established) with a 2xx
    /// `text/event-stream` response.
    fn on_connect(&self) {}

    /// A connect attempt failed or an open stream broke.
    fn on_error(&self, _error: &TransportError) {}

    /// Whether to reconnect after `error`. The reconnect policy still applies.
    ///
    /// Default implementation returns `true` for all errors.
    fn should_retry(&self, _error: &TransportError) -> bool {
        true
    }

    /// The background task is exiting and will not reconnect.
    fn on_close(&self) {}
}
