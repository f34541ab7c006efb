//! Ready-made protocol handlers.

use super::{parse::Event, protocol::SseProtocolHandler, types::SseMessageKind};

/// Classifies events on shape alone.
///
/// - non-empty data → [`SseMessageKind::Data`]
/// - a bare `retry:` directive → [`SseMessageKind::Retry`]
/// - anything else (empty data frames) → [`SseMessageKind::System`]
#[derive(Clone, Debug, Default)]
pub struct GenericSseHandler;

impl GenericSseHandler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SseProtocolHandler for GenericSseHandler {
    fn classify_event(&self, event: &Event) -> SseMessageKind {
        if !event.data.is_empty() {
            return SseMessageKind::Data;
        }
        if event.retry.is_some() {
            return SseMessageKind::Retry;
        }
        SseMessageKind::System
    }
}
