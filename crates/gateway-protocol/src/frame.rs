//! Frame codec.
//!
//! Every WebSocket text message carries exactly one JSON frame whose `type`
//! discriminator selects the variant:
//!
//! ```text
//! { "type": "req",   "id": "…", "method": "…", "params": {…} }
//! { "type": "res",   "id": "…", "ok": true, "payload": {…} }
//! { "type": "res",   "id": "…", "ok": false, "error": { "code": "…", "message": "…" } }
//! { "type": "event", "event": "…", "payload": {…}, "seq": 42 }
//! ```
//!
//! Unknown discriminators and malformed JSON fail to decode; the caller
//! decides whether that matters (the client drops such frames).

use std::fmt;

use gateway_core::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codes;

/// One discrete message on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Method invocation expecting a correlated response.
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Answer to a previously sent request.
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Unsolicited push from the gateway.
    #[serde(rename = "event")]
    Event(EventFrame),
}

/// Errors from encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Inbound text was not a recognisable frame.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    /// Inbound binary message was not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    /// Outbound frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// `req` frame body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, unique per process.
    pub id: RequestId,
    /// Method name (e.g. `chat.send`).
    pub method: String,
    /// Optional parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// `res` frame body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the request this answers.
    pub id: RequestId,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Result payload (present when `ok == true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error body (present when `ok == false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// `event` frame body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name (e.g. `agent`, `chat`, `exec.output`).
    pub event: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Monotonic sequence number, when the gateway provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// Structured error carried by a failed response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Frame {
    /// Decode a frame from a text message.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Decode)
    }

    /// Decode a frame from a binary message holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
        Self::decode(text)
    }

    /// Encode this frame as a JSON text message.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Short discriminator name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "req",
            Self::Response(_) => "res",
            Self::Event(_) => "event",
        }
    }
}

impl RequestFrame {
    /// Build a request with a freshly generated correlation id.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::with_id(RequestId::new(), method, params)
    }

    /// Build a request with a caller-chosen correlation id.
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

impl ResponseFrame {
    /// Build a success response.
    pub fn success(id: RequestId, payload: Option<Value>) -> Self {
        Self {
            id,
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build a failed response.
    pub fn failure(id: RequestId, error: ErrorShape) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Collapse into the payload or the error.
    ///
    /// A successful response without payload yields `Value::Null`; a failed
    /// response without an error body yields an [`codes::UNKNOWN`] error.
    pub fn into_result(self) -> Result<Value, ErrorShape> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ErrorShape::new(codes::UNKNOWN, "request failed")))
        }
    }
}

impl EventFrame {
    /// Build an event without a sequence number.
    pub fn new(event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event: event.into(),
            payload,
            seq: None,
        }
    }
}

impl ErrorShape {
    /// Build an error without details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<RequestFrame> for Frame {
    fn from(frame: RequestFrame) -> Self {
        Self::Request(frame)
    }
}

impl From<ResponseFrame> for Frame {
    fn from(frame: ResponseFrame) -> Self {
        Self::Response(frame)
    }
}

impl From<EventFrame> for Frame {
    fn from(frame: EventFrame) -> Self {
        Self::Event(frame)
    }
}
