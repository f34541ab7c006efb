//! Event-stream parsing per the
//! [HTML Living Standard](https://html.spec.whatwg.org/multipage/server-sent-events.html#event-stream-interpretation).
//!
//! [`EventDecoder`] is push-based: feed it byte chunks of any size and pull
//! complete [`Event`]s out. [`EventStream`] adapts it over a byte stream.
//! Both reject a single line or event larger than a configurable limit.

use std::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use bytes::{Buf, BytesMut};
use futures_util::Stream;
use thiserror::Error;

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &[u8] = "\u{FEFF}".as_bytes();

/// Default cap on one line and on one event's accumulated data.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 1024 * 1024;

/// The input broke a size limit. The decoder is reset and unusable for the
/// rest of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("event data exceeds {limit} bytes")]
    EventTooLarge { limit: usize },
}

/// Error yielded by [`EventStream`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStreamError<E> {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    Transport(E),
}

/// A dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The event type (`"message"` when the server sent none).
    pub event: String,
    /// The data payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
    /// The last event ID in effect when this event was dispatched.
    pub id: String,
    /// Reconnection time advertised by the server.
    pub retry: Option<Duration>,
}

/// Incremental event-stream decoder.
#[derive(Debug)]
pub struct EventDecoder {
    max_event_size: usize,
    buffer: BytesMut,
    started: bool,
    event_type: String,
    data: String,
    has_data: bool,
    last_event_id: String,
    retry: Option<Duration>,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::with_max_event_size(DEFAULT_MAX_EVENT_SIZE)
    }
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that rejects lines and events larger than `max_event_size` bytes.
    pub fn with_max_event_size(max_event_size: usize) -> Self {
        Self {
            max_event_size,
            buffer: BytesMut::new(),
            started: false,
            event_type: String::new(),
            data: String::new(),
            has_data: false,
            last_event_id: String::new(),
            retry: None,
        }
    }

    /// Append raw bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// The last event ID seen so far.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// Pull the next complete event, if the buffer holds one.
    ///
    /// Set `eof` once the underlying stream has ended, so a trailing lone
    /// `CR` is treated as a line break instead of waiting for a possible `LF`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when a line or an event's data grows past the
    /// size limit. Everything buffered so far is discarded.
    pub fn next_event(&mut self, eof: bool) -> Result<Option<Event>, DecodeError> {
        let result = self.decode(eof);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn decode(&mut self, eof: bool) -> Result<Option<Event>, DecodeError> {
        if !self.started {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) && !eof {
                return Ok(None);
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.advance(BOM.len());
            }
            self.started = true;
        }

        while let Some(line) = self.take_line(eof)? {
            if let Some(event) = self.process_line(&line)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.event_type.clear();
        self.data.clear();
        self.has_data = false;
        self.retry = None;
    }

    fn take_line(&mut self, eof: bool) -> Result<Option<BytesMut>, DecodeError> {
        let Some(pos) = memchr::memchr2(CR, LF, &self.buffer) else {
            if self.buffer.len() > self.max_event_size {
                return Err(DecodeError::LineTooLong {
                    limit: self.max_event_size,
                });
            }
            return Ok(None);
        };
        if pos > self.max_event_size {
            return Err(DecodeError::LineTooLong {
                limit: self.max_event_size,
            });
        }
        let terminator = match self.buffer[pos] {
            CR => match self.buffer.get(pos + 1) {
                Some(&LF) => 2,
                Some(_) => 1,
                // A CR at the very end may be the first half of CRLF.
                None if eof => 1,
                None => return Ok(None),
            },
            _ => 1,
        };
        let line = self.buffer.split_to(pos);
        self.buffer.advance(terminator);
        Ok(Some(line))
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<Event>, DecodeError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }

        let (name, value) = match memchr::memchr(b':', line) {
            Some(0) => return Ok(None),
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        let value = String::from_utf8_lossy(value);

        match name {
            b"event" => self.event_type = value.into_owned(),
            b"data" => {
                if self.data.len() + value.len() + 1 > self.max_event_size {
                    return Err(DecodeError::EventTooLarge {
                        limit: self.max_event_size,
                    });
                }
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(&value);
                self.has_data = true;
            }
            b"id" => {
                if !value.contains('\0') {
                    self.last_event_id = value.into_owned();
                }
            }
            b"retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(ms));
                    }
                }
            }
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<Event> {
        let event_type = std::mem::take(&mut self.event_type);
        let data = std::mem::take(&mut self.data);
        let retry = self.retry.take();

        if !std::mem::take(&mut self.has_data) {
            // A retry-only block still carries information for the driver.
            return retry.map(|retry| Event {
                event: String::new(),
                data: String::new(),
                id: self.last_event_id.clone(),
                retry: Some(retry),
            });
        }

        Some(Event {
            event: if event_type.is_empty() {
                "message".to_string()
            } else {
                event_type
            },
            data,
            id: self.last_event_id.clone(),
            retry,
        })
    }
}

/// A [`Stream`] of [`Event`]s decoded from a stream of byte chunks.
///
/// Ends after the first error it yields.
pub struct EventStream<S> {
    inner: S,
    decoder: EventDecoder,
    finished: bool,
    failed: bool,
}

impl<S> EventStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_decoder(inner, EventDecoder::new())
    }

    pub fn with_decoder(inner: S, decoder: EventDecoder) -> Self {
        Self {
            inner,
            decoder,
            finished: false,
            failed: false,
        }
    }

    pub fn last_event_id(&self) -> &str {
        self.decoder.last_event_id()
    }
}

impl<S, B, E> Stream for EventStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<Event, EventStreamError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        loop {
            match this.decoder.next_event(this.finished) {
                Ok(Some(event)) => return Poll::Ready(Some(Ok(event))),
                Ok(None) => {}
                Err(e) => {
                    this.failed = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
            }
            if this.finished {
                return Poll::Ready(None);
            }
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.decoder.feed(chunk.as_ref()),
                Some(Err(e)) => {
                    this.failed = true;
                    return Poll::Ready(Some(Err(EventStreamError::Transport(e))));
                }
                None => this.finished = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use futures_util::{StreamExt, stream};

    use super::*;

    fn decode_all(input: &str) -> Vec<Event> {
        let mut decoder = EventDecoder::new();
        decoder.feed(input.as_bytes());
        std::iter::from_fn(|| decoder.next_event(true).expect("within limits")).collect()
    }

    #[test]
    fn test_basic_event() {
        let events = decode_all("event: update\ndata: hello\nid: 7\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "update");
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].id, "7");
        assert!(events[0].retry.is_none());
    }

    #[test]
    fn test_default_type_and_multiline_data() {
        let events = decode_all("data: first\ndata: second\n\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn test_comments_and_empty_blocks_are_skipped() {
        let events = decode_all(": keepalive\n\n\nevent: x\n\ndata: {\"step\":\"clone\"}\n\n");
        assert_eq!(events.len(), 1);
        // The event type is reset by the empty dispatch that carried no data.
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"step\":\"clone\"}");
    }

    #[test]
    fn test_line_endings() {
        let events = decode_all("data: a\r\n\r\ndata: b\r\rdata: c\n\n");
        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_bom_and_field_without_colon() {
        let events = decode_all("\u{FEFF}data\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn test_id_persists_and_rejects_nul() {
        let events = decode_all("id: 1\ndata: a\n\ndata: b\n\nid: x\0y\ndata: c\n\n");
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1", "1"]);
    }

    #[test]
    fn test_retry_field() {
        let events = decode_all("retry: 2500\n\nretry: soon\ndata: x\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].retry, Some(Duration::from_millis(2500)));
        assert!(events[0].data.is_empty());
        assert!(events[1].retry.is_none());
    }

    #[test]
    fn test_split_crlf_waits_for_more_input() {
        let mut decoder = EventDecoder::new();
        decoder.feed(b"data: a\r\n\r");
        assert!(decoder.next_event(false).expect("decode").is_none());
        decoder.feed(b"\ndata: b\n\n");
        let mut next = || decoder.next_event(false).expect("decode").map(|e| e.data);
        assert_eq!(next(), Some("a".to_string()));
        assert_eq!(next(), Some("b".to_string()));
        assert!(next().is_none());
    }

    #[test]
    fn test_incomplete_event_is_not_dispatched_at_eof() {
        assert!(decode_all("data: partial").is_empty());
    }

    #[tokio::test]
    async fn test_stream_over_arbitrary_chunks() {
        let chunks = vec!["da", "ta: {\"step\":", "\"build\"}\n", "\nda", "ta: two\n\n"];
        let source = stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
        let events: Vec<_> = EventStream::new(source)
            .map(|item| item.expect("infallible"))
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"step\":\"build\"}");
        assert_eq!(events[1].data, "two");
    }

    #[tokio::test]
    async fn test_stream_surfaces_transport_error() {
        let source = stream::iter(vec![Ok("data: a\n\n"), Err("boom")]);
        let mut events = EventStream::new(source);
        assert_eq!(
            events.next().await.map(|r| r.map(|e| e.data)),
            Some(Ok("a".to_string()))
        );
        assert_eq!(
            events.next().await.map(|r| r.map(|e| e.data)),
            Some(Err(EventStreamError::Transport("boom")))
        );
        assert!(events.next().await.is_none());
    }

    #[test]
    fn test_unterminated_line_over_limit_is_rejected() {
        let mut decoder = EventDecoder::with_max_event_size(16);
        decoder.feed(b"data: 0123456789");
        assert_eq!(decoder.next_event(false), Ok(None));
        decoder.feed(b"abcdef");
        assert_eq!(
            decoder.next_event(false),
            Err(DecodeError::LineTooLong { limit: 16 })
        );
        // Everything buffered was dropped.
        decoder.feed(b"data: ok\n\n");
        assert_eq!(
            decoder.next_event(false).expect("decode").map(|e| e.data),
            Some("ok".to_string())
        );
    }

    #[test]
    fn test_event_data_over_limit_is_rejected() {
        let mut decoder = EventDecoder::with_max_event_size(16);
        decoder.feed(b"data: 0123456789\ndata: 0123456789\n\n");
        assert_eq!(
            decoder.next_event(true),
            Err(DecodeError::EventTooLarge { limit: 16 })
        );
    }

    #[tokio::test]
    async fn test_stream_ends_after_decode_error() {
        let source = stream::iter(vec![Ok::<_, Infallible>("data: 0123456789abcdefgh")]);
        let mut events =
            EventStream::with_decoder(source, EventDecoder::with_max_event_size(8));
        assert_eq!(
            events.next().await,
            Some(Err(EventStreamError::Decode(DecodeError::LineTooLong { limit: 8 })))
        );
        assert!(events.next().await.is_none());
    }
}
