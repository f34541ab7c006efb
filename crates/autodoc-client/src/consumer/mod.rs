//! Pipeline event-stream consumer.
//!
//! [`StreamConsumer`] opens `GET /projects/:id/stream` through the SSE
//! transport and feeds a [`JobLog`]. Connection transitions (open, error,
//! close) arrive on the event channel between the events they separate, and
//! one task applies them all to the log in that order. Every connection
//! state change is published on a [`watch`] channel.

pub mod event;
pub mod log;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

pub use self::{
    event::{PipelineEvent, Severity, StreamMessage, Timestamp, classify},
    log::{ConnectionState, JobLog, JobStatus, LogEntry, LogSnapshot},
};
use crate::{
    auth::Authentication,
    error::{TransportError, TransportResult},
    http::ApiClient,
    reconnect::ReconnectPolicy,
    sse::{
        Event, GenericSseHandler, SseConfig, SseConnection, SseHandle, SseItem, SseMessageKind,
        SseProtocolHandler, SseStream,
    },
};

/// Settings for one consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: std::time::Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            connect_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// The log plus the channel its state changes are published on.
struct SharedLog {
    log: Mutex<JobLog>,
    state_tx: watch::Sender<ConnectionState>,
}

impl SharedLog {
    fn new() -> Self {
        let log = JobLog::new();
        let (state_tx, _) = watch::channel(log.state());
        Self {
            log: Mutex::new(log),
            state_tx,
        }
    }

    /// Run a transition and publish the resulting state.
    fn apply<R>(&self, transition: impl FnOnce(&mut JobLog) -> R) -> R {
        let mut log = self.log.lock();
        let out = transition(&mut log);
        let state = log.state();
        drop(log);
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        out
    }
}

/// Classifies pipeline payloads and decides reconnects on the driver task.
///
/// It never touches the log: the pump may still be behind on queued events,
/// so the reconnect decision uses what the driver itself has seen.
struct PipelineEventHandler {
    shared: Arc<SharedLog>,
    opened: AtomicBool,
    finished: AtomicBool,
}

impl PipelineEventHandler {
    fn new(shared: Arc<SharedLog>) -> Self {
        Self {
            shared,
            opened: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }
}

impl SseProtocolHandler for PipelineEventHandler {
    fn classify_event(&self, event: &Event) -> SseMessageKind {
        let kind = GenericSseHandler.classify_event(event);
        if !kind.is_data() {
            return kind;
        }
        match StreamMessage::parse(&event.data) {
            Ok(StreamMessage::Heartbeat) => SseMessageKind::System,
            Ok(StreamMessage::Event(parsed)) => {
                if parsed.is_done() || parsed.is_error() {
                    self.finished.store(true, Ordering::Release);
                }
                kind
            }
            Err(_) => kind,
        }
    }

    fn on_connect(&self) {
        self.opened.store(true, Ordering::Release);
    }

    fn should_retry(&self, _error: &TransportError) -> bool {
        // A failed first connect and a finished job both end the stream.
        self.opened.load(Ordering::Acquire)
            && !self.finished.load(Ordering::Acquire)
            && !self.shared.log.lock().is_terminal()
    }
}

/// Apply every queued item to the log until it finishes or the driver exits.
async fn pump_items(
    mut stream: SseStream,
    shared: Arc<SharedLog>,
    handle: SseHandle,
    project_id: String,
) {
    while let Some(item) = stream.next_item().await {
        let terminal = shared.apply(|log| {
            match &item {
                SseItem::Opened => log.on_open(),
                SseItem::Event(event) if event.kind.is_data() => {
                    log.on_message(event.data());
                }
                SseItem::Event(_) => {}
                SseItem::Interrupted { reason } => log.on_error(reason),
                SseItem::Closed => log.on_close(),
            }
            log.is_terminal()
        });
        if terminal {
            info!(project = %project_id, "Log stream finished, closing connection");
            handle.try_close();
            break;
        }
    }
    // No-op unless the driver exited without sending `Closed`.
    shared.apply(JobLog::on_close);
    debug!(project = %project_id, "Event pump finished");
}

/// Watches one job's event stream.
///
/// Dropping the consumer tears it down.
pub struct StreamConsumer {
    project_id: String,
    shared: Arc<SharedLog>,
    handle: SseHandle,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("project_id", &self.project_id)
            .field("state", &self.state())
            .finish()
    }
}

impl StreamConsumer {
    /// Start watching `project_id`.
    ///
    /// The stream request carries the client's current bearer token and
    /// shares its cookie jar. Connection failures never surface here; they
    /// show up as state transitions and [`LogSnapshot::load_error`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the stream configuration is invalid.
    pub fn connect(
        client: &ApiClient,
        project_id: &str,
        config: ConsumerConfig,
    ) -> TransportResult<Self> {
        let url = client
            .config()
            .url_for(&format!("/projects/{project_id}/stream"));
        let sse_config = SseConfig::new(url)
            .reconnect(config.reconnect)
            .connect_timeout(config.connect_timeout)
            .auth_on_connect(true);

        let shared = Arc::new(SharedLog::new());
        let handler = PipelineEventHandler::new(Arc::clone(&shared));
        let auth: Arc<dyn Authentication> = client.tokens();

        let connection = SseConnection::connect_with(
            sse_config,
            handler,
            Some(auth),
            Some(client.http_client().clone()),
        )?;
        let (handle, stream) = connection.split();

        let pump = tokio::spawn(pump_items(
            stream,
            Arc::clone(&shared),
            handle.clone(),
            project_id.to_string(),
        ));

        info!(project = %project_id, "Watching pipeline events");
        Ok(Self {
            project_id: project_id.to_string(),
            shared,
            handle,
            pump,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receive every connection state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.shared.log.lock().snapshot()
    }

    pub fn status(&self) -> JobStatus {
        self.shared.log.lock().status().clone()
    }

    pub fn pause(&self) {
        self.shared.apply(JobLog::pause);
    }

    pub fn resume(&self) {
        self.shared.apply(JobLog::resume);
    }

    /// Wait until the connection reaches [`ConnectionState::Disconnected`].
    pub async fn wait_until_terminal(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    /// Abort the connection. No callback after this changes the log.
    pub fn stop(&self) {
        if self.shared.apply(|log| {
            let already = log.was_torn_down();
            log.teardown();
            already
        }) {
            return;
        }
        self.handle.try_close();
        self.pump.abort();
        info!(project = %self.project_id, "Stopped watching pipeline events");
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}
