//! Response envelopes and structured API errors.
//!
//! The backend wraps every successful payload as `{ "success": true, "data": .. }`
//! and every failure as `{ "error": { "code", "message", "fields"? } }`.
//! [`decode_success`] unwraps the former, [`ApiError::from_response`] the latter.

use std::{collections::BTreeMap, fmt};

use http::StatusCode;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::TransportResult;

/// Error code used when an error response carries no parsable envelope.
pub const NETWORK_ERROR_CODE: &str = "NETWORK_ERROR";

/// Field-level validation errors, keyed by field name.
pub type FieldErrors = BTreeMap<String, serde_json::Value>;

/// A structured application error returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// HTTP status code of the response.
    pub status: StatusCode,
    /// Machine-readable error code, e.g. `INVALID_CREDENTIALS`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional per-field validation errors.
    pub fields: Option<FieldErrors>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    fields: Option<FieldErrors>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            fields: None,
        }
    }

    /// Attach field-level validation errors.
    #[must_use]
    pub fn with_fields(mut self, fields: FieldErrors) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Build an error from a non-2xx response.
    ///
    /// A JSON error envelope is unwrapped; anything else yields
    /// [`NETWORK_ERROR_CODE`] carrying the status.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope { error }) => Self {
                status,
                message: error
                    .message
                    .unwrap_or_else(|| default_message(status)),
                code: error.code,
                fields: error.fields,
            },
            Err(_) => Self::new(status, NETWORK_ERROR_CODE, default_message(status)),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Validation message for a single field, flattened to text.
    pub fn field_message(&self, field: &str) -> Option<String> {
        let value = self.fields.as_ref()?.get(field)?;
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            other => Some(other.to_string()),
        }
    }
}

fn default_message(status: StatusCode) -> String {
    format!("Request failed with status {}", status.as_u16())
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (status {})", self.code, self.message, self.status.as_u16())
    }
}

impl std::error::Error for ApiError {}

/// Decode a 2xx body, unwrapping the `{ success, data }` envelope when present.
///
/// - an object with a `data` key yields that value
/// - an object holding nothing but `success` yields JSON `null`
/// - anything else is decoded as-is
///
/// An empty body also decodes as `null`, so `()` and `Option<_>` targets work
/// for `204 No Content` responses.
pub fn decode_success<T: DeserializeOwned>(body: &[u8]) -> TransportResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    let payload = match serde_json::from_slice::<Value>(body)? {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        Value::Object(map) if map.len() == 1 && map.contains_key("success") => Value::Null,
        other => other,
    };
    Ok(serde_json::from_value(payload)?)
}
