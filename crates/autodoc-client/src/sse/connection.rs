//! SSE connection driver implementation.
//!
//! Provides [`SseConnection`], [`SseHandle`], and [`SseStream`] for managing
//! SSE connections with bounded reconnection, protocol handler classification,
//! and optional authentication.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, error, info, warn};

use super::{
    config::SseConfig,
    parse::{EventDecoder, EventStream, EventStreamError},
    protocol::SseProtocolHandler,
    types::{SseEvent, SseItem, SseMessageKind},
};
use crate::{
    auth::Authentication,
    error::{TransportError, TransportResult},
};

type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Control commands sent from [`SseHandle`] to the background task.
#[derive(Debug)]
pub enum SseCommand {
    /// Gracefully close the connection.
    Close,
    /// Drop the current stream and connect again.
    Reconnect {
        /// Human-readable reason for the reconnection request.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Public API: SseConnection
// ---------------------------------------------------------------------------

/// Entry point for SSE connections.
///
/// Call [`connect()`](SseConnection::connect) to start the background task and
/// then [`split()`](SseConnection::split) to obtain a [`SseHandle`]
/// (for control) and [`SseStream`] (for events).
pub struct SseConnection {
    handle: SseHandle,
    stream: SseStream,
}

impl SseConnection {
    /// Start an unauthenticated SSE connection.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn connect<H: SseProtocolHandler>(config: SseConfig, handler: H) -> TransportResult<Self> {
        Self::connect_with(config, handler, None, None)
    }

    /// Start an SSE connection that signs every connect and reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn connect_with_auth<H: SseProtocolHandler>(
        config: SseConfig,
        handler: H,
        auth: Arc<dyn Authentication>,
    ) -> TransportResult<Self> {
        Self::connect_with(config, handler, Some(auth), None)
    }

    /// Start an SSE connection on an existing HTTP client, so the stream
    /// shares that client's cookie jar.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails or no client can be
    /// built.
    pub fn connect_with<H: SseProtocolHandler>(
        config: SseConfig,
        handler: H,
        auth: Option<Arc<dyn Authentication>>,
        client: Option<reqwest::Client>,
    ) -> TransportResult<Self> {
        config.validate().map_err(TransportError::config)?;

        let client = match client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(config.connect_timeout)
                .build()
                .map_err(|e| TransportError::config(format!("Failed to build HTTP client: {e}")))?,
        };

        let config = Arc::new(config);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        tokio::spawn(sse_connection_driver(
            config, handler, auth, client, cmd_rx, event_tx,
        ));

        Ok(Self {
            handle: SseHandle { cmd_tx },
            stream: SseStream { rx: event_rx },
        })
    }

    /// Split the connection into a control handle and event stream.
    pub fn split(self) -> (SseHandle, SseStream) {
        (self.handle, self.stream)
    }

    /// Get a reference to the control handle.
    pub fn handle(&self) -> &SseHandle {
        &self.handle
    }
}

impl Stream for SseConnection {
    type Item = SseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stream).poll_next(cx)
    }
}

// ---------------------------------------------------------------------------
// SseHandle
// ---------------------------------------------------------------------------

/// Clone-able handle for controlling a running SSE connection.
#[derive(Clone, Debug)]
pub struct SseHandle {
    cmd_tx: mpsc::Sender<SseCommand>,
}

impl SseHandle {
    /// Request a graceful close.
    ///
    /// # Errors
    ///
    /// Returns an error if the background task has already shut down.
    pub async fn close(&self) -> TransportResult<()> {
        self.send(SseCommand::Close).await
    }

    /// Request a close without waiting for channel capacity.
    ///
    /// Returns `false` if the command could not be queued.
    pub fn try_close(&self) -> bool {
        self.cmd_tx.try_send(SseCommand::Close).is_ok()
    }

    /// Request a reconnection.
    ///
    /// # Errors
    ///
    /// Returns an error if the background task has already shut down.
    pub async fn reconnect(&self, reason: &str) -> TransportResult<()> {
        self.send(SseCommand::Reconnect {
            reason: reason.to_string(),
        })
        .await
    }

    /// Check whether the background task is still running.
    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    async fn send(&self, command: SseCommand) -> TransportResult<()> {
        self.cmd_tx.send(command).await.map_err(|_| {
            TransportError::connection_closed(Some("SSE background task shut down".to_string()))
        })
    }
}

// ---------------------------------------------------------------------------
// SseStream
// ---------------------------------------------------------------------------

/// Items from an SSE connection.
///
/// [`next_item`](SseStream::next_item) yields connection transitions
/// interleaved with events. [`next_event`](SseStream::next_event) and the
/// [`Stream`] impl yield events only.
pub struct SseStream {
    rx: mpsc::Receiver<SseItem>,
}

impl SseStream {
    /// Receive the next item; `None` once the driver has exited.
    pub async fn next_item(&mut self) -> Option<SseItem> {
        self.rx.recv().await
    }

    /// Receive the next SSE event; `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let SseItem::Event(event) = self.rx.recv().await? {
                return Some(event);
            }
        }
    }
}

impl Stream for SseStream {
    type Item = SseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let rx = &mut self.get_mut().rx;
        loop {
            match ready!(rx.poll_recv(cx)) {
                Some(SseItem::Event(event)) => return Poll::Ready(Some(event)),
                Some(_) => {}
                None => return Poll::Ready(None),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internal: establish a single HTTP connection
// ---------------------------------------------------------------------------

/// Open one SSE response, validating status and Content-Type.
async fn establish_sse_connection(
    client: &reqwest::Client,
    config: &SseConfig,
    auth: Option<&dyn Authentication>,
    last_event_id: Option<&str>,
) -> TransportResult<EventStream<ByteStream>> {
    let mut headers = config.headers.clone();
    headers.insert(
        http::header::ACCEPT,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );

    if let Some(id) = last_event_id
        && let Ok(value) = http::HeaderValue::from_str(id)
    {
        headers.insert(http::HeaderName::from_static("last-event-id"), value);
    }

    if config.auth_on_connect
        && let Some(auth) = auth
    {
        auth.authenticate(&mut headers).await?;
    }

    let request = client.get(&config.url).headers(headers).send();
    let response = timeout(config.connect_timeout, request)
        .await
        .map_err(|_| TransportError::timeout(config.connect_timeout))??;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::sse_invalid_status(status));
    }

    if let Some(content_type) = response.headers().get(http::header::CONTENT_TYPE) {
        let content_type = content_type.to_str().unwrap_or("");
        if !content_type.contains("text/event-stream") {
            return Err(TransportError::sse_invalid_content_type(content_type));
        }
    }

    Ok(EventStream::with_decoder(
        response.bytes_stream().boxed(),
        EventDecoder::with_max_event_size(config.max_event_size),
    ))
}

// ---------------------------------------------------------------------------
// Internal: background driver
// ---------------------------------------------------------------------------

async fn sse_connection_driver<H: SseProtocolHandler>(
    config: Arc<SseConfig>,
    handler: H,
    auth: Option<Arc<dyn Authentication>>,
    client: reqwest::Client,
    mut cmd_rx: mpsc::Receiver<SseCommand>,
    event_tx: mpsc::Sender<SseItem>,
) {
    drive(&config, &handler, auth.as_deref(), &client, &mut cmd_rx, &event_tx).await;
    info!(url = %config.url, "SSE connection closed");
    handler.on_close();
    let _ = event_tx.send(SseItem::Closed).await;
}

enum Next {
    Reconnect(Option<TransportError>),
    Stop,
}

/// Connect, forward events, and reconnect until closed or out of attempts.
async fn drive<H: SseProtocolHandler>(
    config: &SseConfig,
    handler: &H,
    auth: Option<&dyn Authentication>,
    client: &reqwest::Client,
    cmd_rx: &mut mpsc::Receiver<SseCommand>,
    event_tx: &mpsc::Sender<SseItem>,
) {
    let mut attempt: u32 = 0;
    let mut last_event_id: Option<String> = None;
    let mut server_retry: Option<Duration> = None;

    loop {
        info!(url = %config.url, attempt, "SSE connecting");
        let connection = tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(SseCommand::Reconnect { reason }) => {
                    debug!(reason = %reason, "Reconnect requested while connecting, restarting");
                    continue;
                }
                Some(SseCommand::Close) | None => return,
            },

            connection = establish_sse_connection(client, config, auth, last_event_id.as_deref()) => connection,
        };

        let next = match connection {
            Ok(mut events) => {
                info!(url = %config.url, "SSE connection established");
                handler.on_connect();
                if event_tx.send(SseItem::Opened).await.is_err() {
                    info!("SSE consumer dropped, shutting down");
                    return;
                }
                attempt = 0;
                let next = pump(handler, &mut events, cmd_rx, event_tx, &mut server_retry).await;
                if !events.last_event_id().is_empty() {
                    last_event_id = Some(events.last_event_id().to_string());
                }
                next
            }
            Err(err) => {
                error!(url = %config.url, error = %err, "SSE connection failed");
                Next::Reconnect(Some(err))
            }
        };

        match next {
            Next::Stop => return,
            Next::Reconnect(Some(err)) => {
                handler.on_error(&err);
                let interrupted = SseItem::Interrupted {
                    reason: err.to_string(),
                };
                if event_tx.send(interrupted).await.is_err() {
                    info!("SSE consumer dropped, shutting down");
                    return;
                }
                if !handler.should_retry(&err) {
                    warn!(error = %err, "Handler declined reconnect, closing");
                    return;
                }
            }
            Next::Reconnect(None) => {}
        }

        let Some(delay) = config.reconnect.next_delay(attempt) else {
            error!(attempts = attempt, "Max SSE reconnect attempts exceeded");
            return;
        };
        let delay = server_retry.map_or(delay, |server| delay.max(server));
        attempt = attempt.saturating_add(1);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "SSE reconnecting after backoff"
        );

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(SseCommand::Reconnect { .. }) => {}
                Some(SseCommand::Close) | None => return,
            },

            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Read events from one open stream until it breaks or a command arrives.
async fn pump<H: SseProtocolHandler>(
    handler: &H,
    events: &mut EventStream<ByteStream>,
    cmd_rx: &mut mpsc::Receiver<SseCommand>,
    event_tx: &mpsc::Sender<SseItem>,
    server_retry: &mut Option<Duration>,
) -> Next {
    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(SseCommand::Close) | None => {
                    info!("SSE connection closing (requested)");
                    return Next::Stop;
                }
                Some(SseCommand::Reconnect { reason }) => {
                    warn!(reason = %reason, "SSE reconnect requested");
                    return Next::Reconnect(None);
                }
            },

            item = events.next() => match item {
                Some(Ok(raw)) => {
                    if let Some(retry) = raw.retry {
                        *server_retry = Some(retry);
                    }

                    let kind = handler.classify_event(&raw);
                    debug!(event_type = %raw.event, id = %raw.id, kind = %kind, "SSE event received");
                    if kind == SseMessageKind::Retry {
                        continue;
                    }

                    if event_tx.send(SseItem::Event(SseEvent::new(raw, kind))).await.is_err() {
                        info!("SSE consumer dropped, shutting down");
                        return Next::Stop;
                    }
                }
                Some(Err(err)) => {
                    error!(error = %err, "SSE stream error");
                    let err = match err {
                        EventStreamError::Decode(e) => TransportError::sse_parse(e.to_string()),
                        EventStreamError::Transport(e) => TransportError::Network(e),
                    };
                    return Next::Reconnect(Some(err));
                }
                None => {
                    warn!("SSE stream ended");
                    return Next::Reconnect(Some(TransportError::sse_stream_ended()));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl SseProtocolHandler for Passthrough {
        fn classify_event(&self, _event: &super::super::parse::Event) -> SseMessageKind {
            SseMessageKind::Data
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = SseConnection::connect(SseConfig::default(), Passthrough);
        assert!(matches!(result, Err(TransportError::Config { .. })));
    }

    #[tokio::test]
    async fn test_handle_reports_shutdown() {
        // Nothing listens on port 9; the driver gives up after the first failure.
        let config = SseConfig::new("http://127.0.0.1:9/stream")
            .reconnect_max_attempts(Some(0))
            .connect_timeout(Duration::from_millis(500));
        let (handle, mut stream) = SseConnection::connect(config, Passthrough)
            .expect("connect")
            .split();

        assert!(matches!(stream.next_item().await, Some(SseItem::Interrupted { .. })));
        assert!(matches!(stream.next_item().await, Some(SseItem::Closed)));
        assert!(stream.next_item().await.is_none());
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("driver exits");
        assert!(handle.close().await.is_err());
        assert!(!handle.try_close());
    }
}
