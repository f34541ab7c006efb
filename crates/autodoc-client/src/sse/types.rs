//! Core type definitions for SSE event handling.

use std::fmt;

use super::parse::Event;

/// Classification of incoming SSE events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SseMessageKind {
    /// A data event carrying an application payload.
    Data,
    /// Heartbeat or other control traffic with no payload for the consumer.
    System,
    /// Retry directive from server.
    Retry,
    /// Unknown/unclassified event.
    Unknown,
}

impl SseMessageKind {
    /// Returns true if this is a data event.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data)
    }

    /// Returns true if this is a system-level event.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// Returns true if this is a retry directive.
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}

impl fmt::Display for SseMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "Data"),
            Self::System => write!(f, "System"),
            Self::Retry => write!(f, "Retry"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A parsed event together with its classification.
#[derive(Clone, Debug)]
pub struct SseEvent {
    pub raw: Event,
    pub kind: SseMessageKind,
}

impl SseEvent {
    pub fn new(raw: Event, kind: SseMessageKind) -> Self {
        Self { raw, kind }
    }

    pub fn data(&self) -> &str {
        &self.raw.data
    }

    pub fn event_type(&self) -> &str {
        &self.raw.event
    }

    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn retry(&self) -> Option<std::time::Duration> {
        self.raw.retry
    }
}

/// One item on an [`SseStream`](super::SseStream).
///
/// Connection transitions travel on the same channel as events, so a reader
/// sees them in the order the driver produced them.
#[derive(Clone, Debug)]
pub enum SseItem {
    /// A response was accepted and the stream is open.
    Opened,
    /// A classified event.
    Event(SseEvent),
    /// The open stream or a connect attempt failed. The driver may retry.
    Interrupted {
        /// Display form of the transport error.
        reason: String,
    },
    /// The driver stopped and will send nothing more.
    Closed,
}

impl SseItem {
    /// The event, if this item carries one.
    pub fn into_event(self) -> Option<SseEvent> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_message_kind_predicates() {
        assert!(SseMessageKind::Data.is_data());
        assert!(!SseMessageKind::System.is_data());
        assert!(SseMessageKind::System.is_system());
        assert!(SseMessageKind::Retry.is_retry());
        assert!(!SseMessageKind::Unknown.is_retry());
    }

    #[test]
    fn test_message_kind_display() {
        assert_eq!(SseMessageKind::Data.to_string(), "Data");
        assert_eq!(SseMessageKind::System.to_string(), "System");
        assert_eq!(SseMessageKind::Retry.to_string(), "Retry");
        assert_eq!(SseMessageKind::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_sse_event_accessors() {
        let raw = Event {
            event: "message".to_string(),
            data: "{\"step\":\"clone\"}".to_string(),
            id: "evt-3".to_string(),
            retry: Some(Duration::from_secs(5)),
        };
        let event = SseEvent::new(raw, SseMessageKind::Data);

        assert_eq!(event.event_type(), "message");
        assert_eq!(event.data(), "{\"step\":\"clone\"}");
        assert_eq!(event.id(), "evt-3");
        assert_eq!(event.retry(), Some(Duration::from_secs(5)));
        assert!(event.kind.is_data());

        let item = SseItem::Event(event);
        assert_eq!(item.into_event().map(|e| e.raw.id), Some("evt-3".to_string()));
        assert!(SseItem::Opened.into_event().is_none());
    }
}
