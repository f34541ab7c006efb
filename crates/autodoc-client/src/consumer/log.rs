//! The job log state machine.
//!
//! [`JobLog`] owns everything a log viewer renders for one stream
//! connection: the ordered entries, the [`ConnectionState`], the high-level
//! [`JobStatus`], the follow-latest flag and an optional load error. It does
//! no I/O; the transport drives it through the `on_*` transition handlers.
//!
//! Once the state reaches [`ConnectionState::Disconnected`] the instance is
//! finished: every later callback is ignored.

use serde::Serialize;
use tracing::{debug, warn};

use super::event::{PipelineEvent, Severity, StreamMessage, Timestamp};

/// Shown when the stream could not be opened at all.
pub const CONNECT_FAILED_MESSAGE: &str = "Failed to connect to the log stream";
/// Shown when an established stream was lost for good.
pub const CONNECTION_LOST_MESSAGE: &str = "Lost connection to the log stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// High-level status of the job being watched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done { result: Option<serde_json::Value> },
    Error { message: String },
}

/// One rendered log line. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: Timestamp,
    pub message: String,
    pub severity: Severity,
}

/// A point-in-time copy of a [`JobLog`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSnapshot {
    pub entries: Vec<LogEntry>,
    pub state: ConnectionState,
    pub status: JobStatus,
    pub following: bool,
    pub load_error: Option<String>,
}

#[derive(Debug)]
pub struct JobLog {
    entries: Vec<LogEntry>,
    state: ConnectionState,
    status: JobStatus,
    paused: bool,
    done_logged: bool,
    ever_opened: bool,
    torn_down: bool,
    load_error: Option<String>,
    next_id: u64,
}

impl Default for JobLog {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLog {
    /// A fresh log for a new connection, in [`ConnectionState::Connecting`].
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            state: ConnectionState::Connecting,
            status: JobStatus::Running,
            paused: false,
            done_logged: false,
            ever_opened: false,
            torn_down: false,
            load_error: None,
            next_id: 1,
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the connection was ended by [`teardown`](Self::teardown).
    pub fn was_torn_down(&self) -> bool {
        self.torn_down
    }

    /// The stream opened with a 2xx response.
    pub fn on_open(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.ever_opened = true;
        self.state = ConnectionState::Connected;
    }

    /// A connect attempt failed or an open stream broke.
    ///
    /// Before the first successful open this is terminal and records a load
    /// error; afterwards it means the transport is retrying.
    pub fn on_error(&mut self, reason: &str) {
        if self.is_terminal() {
            return;
        }
        if self.ever_opened {
            debug!(reason, "Log stream interrupted, reconnecting");
            self.state = ConnectionState::Reconnecting;
        } else {
            warn!(reason, "Log stream failed to open");
            self.load_error = Some(format!("{CONNECT_FAILED_MESSAGE}: {reason}"));
            self.state = ConnectionState::Disconnected;
        }
    }

    /// The transport gave up and will not reconnect.
    pub fn on_close(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.load_error = Some(
            if self.ever_opened {
                CONNECTION_LOST_MESSAGE
            } else {
                CONNECT_FAILED_MESSAGE
            }
            .to_string(),
        );
        self.state = ConnectionState::Disconnected;
    }

    /// The caller stopped watching. Suppresses every later callback.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.state = ConnectionState::Disconnected;
    }

    /// Handle one raw SSE data payload.
    ///
    /// Returns the appended entry, or `None` when the payload was a heartbeat,
    /// unparsable, a duplicate `done`, or arrived after the log finished.
    pub fn on_message(&mut self, data: &str) -> Option<&LogEntry> {
        if self.is_terminal() {
            return None;
        }
        match StreamMessage::parse(data) {
            Ok(StreamMessage::Heartbeat) => None,
            Ok(StreamMessage::Event(event)) => self.ingest(event),
            Err(e) => {
                warn!(error = %e, "Dropping unparsable pipeline event");
                None
            }
        }
    }

    /// Append a decoded event, applying dedup and terminal transitions.
    pub fn ingest(&mut self, event: PipelineEvent) -> Option<&LogEntry> {
        if self.is_terminal() {
            return None;
        }

        if event.is_done() {
            if self.done_logged {
                debug!("Discarding duplicate done event");
                return None;
            }
            self.done_logged = true;
            self.status = JobStatus::Done {
                result: event.result.clone(),
            };
            self.state = ConnectionState::Disconnected;
        } else if event.is_error() {
            self.status = JobStatus::Error {
                message: event.message(),
            };
            self.state = ConnectionState::Disconnected;
        }

        let entry = LogEntry {
            id: self.next_id,
            timestamp: event.ts.clone().unwrap_or_else(Timestamp::now),
            message: event.message(),
            severity: event.severity(),
        };
        self.next_id += 1;
        self.entries.push(entry);
        self.entries.last()
    }

    /// Stop following the latest entry. Ingestion continues.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume following the latest entry.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_following(&self) -> bool {
        !self.paused
    }

    /// Entry the viewer should scroll to, when following.
    pub fn follow_target(&self) -> Option<u64> {
        if self.paused {
            None
        } else {
            self.entries.last().map(|entry| entry.id)
        }
    }

    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            entries: self.entries.clone(),
            state: self.state,
            status: self.status.clone(),
            following: self.is_following(),
            load_error: self.load_error.clone(),
        }
    }
}
