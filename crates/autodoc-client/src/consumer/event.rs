//! Pipeline events and how they become log lines.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Message logged for a completed job.
pub const DONE_MESSAGE: &str = "Documentation generated successfully";
/// Message logged for a failed job that gave no reason.
pub const FAILED_MESSAGE: &str = "Pipeline failed";
/// Message logged for an event with nothing to show.
pub const PROCESSING_MESSAGE: &str = "Processing...";
/// Joins the step tag, message and detail of an ordinary event.
pub const MESSAGE_SEPARATOR: &str = " · ";

/// One step of a long-running job as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    #[serde(default)]
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Event time as sent by the backend: epoch milliseconds or an ISO-8601 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    /// Current wall-clock time in epoch milliseconds.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        Self::Millis(millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Log severity derived from an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Severity as a pure function of `(step, status)`.
pub fn classify(step: &str, status: Option<&str>) -> Severity {
    if step == "done" {
        Severity::Success
    } else if step == "error" || status == Some("error") {
        Severity::Error
    } else if status == Some("warning") || step == "security" {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// A decoded stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// `{ "type": "ping" }` keepalive.
    Heartbeat,
    Event(PipelineEvent),
}

impl StreamMessage {
    /// Decode one SSE data payload.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(data)?;
        if value.get("type").and_then(serde_json::Value::as_str) == Some("ping") {
            return Ok(Self::Heartbeat);
        }
        Ok(Self::Event(serde_json::from_value(value)?))
    }
}

impl PipelineEvent {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: None,
            msg: None,
            detail: None,
            ts: None,
            result: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.step == "done"
    }

    pub fn is_error(&self) -> bool {
        self.step == "error"
    }

    pub fn severity(&self) -> Severity {
        classify(&self.step, self.status.as_deref())
    }

    /// Human-readable log line for this event.
    pub fn message(&self) -> String {
        if self.is_done() {
            return DONE_MESSAGE.to_string();
        }
        if self.is_error() {
            return non_empty(&self.msg)
                .or_else(|| non_empty(&self.detail))
                .unwrap_or(FAILED_MESSAGE)
                .to_string();
        }

        let tag = (!self.step.is_empty()).then(|| format!("[{}]", self.step));
        let parts: Vec<&str> = tag
            .as_deref()
            .into_iter()
            .chain(non_empty(&self.msg))
            .chain(non_empty(&self.detail))
            .collect();

        if parts.is_empty() {
            PROCESSING_MESSAGE.to_string()
        } else {
            parts.join(MESSAGE_SEPARATOR)
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> PipelineEvent {
        match StreamMessage::parse(json).expect("parse") {
            StreamMessage::Event(event) => event,
            StreamMessage::Heartbeat => panic!("unexpected heartbeat"),
        }
    }

    #[test]
    fn test_severity_table() {
        assert_eq!(classify("done", None), Severity::Success);
        assert_eq!(classify("error", None), Severity::Error);
        assert_eq!(classify("build", Some("error")), Severity::Error);
        assert_eq!(classify("build", Some("warning")), Severity::Warning);
        assert_eq!(classify("security", None), Severity::Warning);
        assert_eq!(classify("build", None), Severity::Info);
        assert_eq!(classify("clone", Some("running")), Severity::Info);
        // `done` wins over an error status.
        assert_eq!(classify("done", Some("error")), Severity::Success);
        // An error status wins over the security step.
        assert_eq!(classify("security", Some("error")), Severity::Error);
    }

    #[test]
    fn test_severity_from_payloads() {
        assert_eq!(event(r#"{"step":"error"}"#).severity(), Severity::Error);
        assert_eq!(event(r#"{"status":"warning"}"#).severity(), Severity::Warning);
        assert_eq!(event(r#"{"step":"security"}"#).severity(), Severity::Warning);
        assert_eq!(event(r#"{"step":"build"}"#).severity(), Severity::Info);
    }

    #[test]
    fn test_heartbeat_detection() {
        assert_eq!(
            StreamMessage::parse(r#"{"type":"ping"}"#).expect("parse"),
            StreamMessage::Heartbeat
        );
        assert!(matches!(
            StreamMessage::parse(r#"{"type":"other","step":"x"}"#).expect("parse"),
            StreamMessage::Event(_)
        ));
        assert!(StreamMessage::parse("not json").is_err());
    }

    #[test]
    fn test_done_and_error_messages() {
        assert_eq!(event(r#"{"step":"done","msg":"ignored"}"#).message(), DONE_MESSAGE);
        assert_eq!(
            event(r#"{"step":"error","msg":"Clone failed","detail":"403"}"#).message(),
            "Clone failed"
        );
        assert_eq!(
            event(r#"{"step":"error","msg":"","detail":"Repository not found"}"#).message(),
            "Repository not found"
        );
        assert_eq!(event(r#"{"step":"error"}"#).message(), FAILED_MESSAGE);
    }

    #[test]
    fn test_ordinary_messages() {
        assert_eq!(
            event(r#"{"step":"clone","msg":"Cloning repository","detail":"42 files"}"#).message(),
            "[clone] · Cloning repository · 42 files"
        );
        assert_eq!(event(r#"{"step":"analyze"}"#).message(), "[analyze]");
        assert_eq!(
            event(r#"{"msg":"Working","detail":""}"#).message(),
            "Working"
        );
        assert_eq!(event("{}").message(), PROCESSING_MESSAGE);
    }

    #[test]
    fn test_timestamp_forms() {
        let millis = event(r#"{"step":"a","ts":1700000000000}"#);
        assert_eq!(millis.ts, Some(Timestamp::Millis(1_700_000_000_000)));
        let text = event(r#"{"step":"a","ts":"2024-05-01T10:00:00Z"}"#);
        assert_eq!(
            text.ts.map(|ts| ts.to_string()).as_deref(),
            Some("2024-05-01T10:00:00Z")
        );
        assert!(matches!(Timestamp::now(), Timestamp::Millis(ms) if ms > 0));
    }

    #[test]
    fn test_result_is_kept() {
        let done = event(r#"{"step":"done","result":{"pages":12}}"#);
        assert_eq!(done.result, Some(serde_json::json!({"pages": 12})));
    }
}
