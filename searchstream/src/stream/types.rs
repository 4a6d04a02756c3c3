// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Request identifiers, decoded events, controller deliveries and
// per-request stream errors shared by the decoder, the controller and
// the correlation registry.

use serde::{Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request identifier
// ---------------------------------------------------------------------------

/// Opaque correlation key for one logical in-flight search request.
///
/// The only join key between transport-level bytes and application-level
/// callbacks. Minted by the consumer before the request is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Mint a fresh identifier (32 lowercase hex digits, UUIDv4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Event classification
// ---------------------------------------------------------------------------

/// The event type carried on an `event:` line.
///
/// Known search event tags map to dedicated variants; anything else is
/// preserved verbatim in `Other` so newer servers keep working.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `search_response_metadata`: totals and timing.
    Metadata,
    /// `search_response_hits`: a batch of partial results.
    Hits,
    /// `progress`: percent-complete updates.
    Progress,
    /// `error`: server-reported search error. Not terminal by itself.
    Error,
    /// `end`: server-reported completion. Terminal.
    End,
    /// `reset`: server asks the consumer to discard partial results.
    Reset,
    /// Untyped `data:` message.
    Data,
    /// Any other tag, kept exactly as received.
    Other(String),
}

impl EventKind {
    /// Classify a raw `event:` tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "search_response_metadata" => Self::Metadata,
            "search_response_hits" => Self::Hits,
            "progress" => Self::Progress,
            "error" => Self::Error,
            "end" => Self::End,
            "reset" => Self::Reset,
            "data" => Self::Data,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Metadata => "search_response_metadata",
            Self::Hits => "search_response_hits",
            Self::Progress => "progress",
            Self::Error => "error",
            Self::End => "end",
            Self::Reset => "reset",
            Self::Data => "data",
            Self::Other(tag) => tag,
        }
    }

    /// Whether an event of this kind ends the request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decoded events
// ---------------------------------------------------------------------------

/// Payload of a decoded message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// The payload parsed as JSON.
    Json(serde_json::Value),
    /// Untyped payload that is not JSON, forwarded unmodified.
    Text(String),
    /// Typed payload whose JSON failed to parse.
    Malformed { diagnostic: String, raw: String },
}

/// One typed unit produced by the frame decoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent {
    pub kind: EventKind,
    pub payload: Payload,
}

impl DecodedEvent {
    pub fn new(kind: EventKind, payload: Payload) -> Self {
        Self { kind, payload }
    }

    /// The terminal event the controller emits when a stream ends.
    pub fn end() -> Self {
        Self::new(EventKind::End, Payload::Json(serde_json::Value::Null))
    }

    /// True when the payload could not be decoded.
    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Malformed { .. })
    }

    /// The structured payload, if the message decoded as JSON.
    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.payload {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller output
// ---------------------------------------------------------------------------

/// Something the stream controller hands back to the host for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A decoded event, in wire order.
    Event { id: RequestId, event: DecodedEvent },
    /// The request failed terminally.
    Failed { id: RequestId, error: StreamError },
}

impl Delivery {
    pub fn id(&self) -> &RequestId {
        match self {
            Delivery::Event { id, .. } | Delivery::Failed { id, .. } => id,
        }
    }

    /// Whether routing this delivery ends the request.
    pub fn is_terminal(&self) -> bool {
        match self {
            Delivery::Event { event, .. } => event.kind.is_terminal(),
            Delivery::Failed { .. } => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Terminal failures of a single request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// The pending buffer grew past the configured bound without a frame
    /// delimiter.
    #[error("pending stream buffer exceeded {limit} byte limit without a frame delimiter")]
    BufferOverflow { limit: usize },
    /// The connection carrying the request went away.
    #[error("transport closed{}: {reason}", status_suffix(.code))]
    TransportClosed { code: Option<u16>, reason: String },
}

fn status_suffix(code: &Option<u16>) -> String {
    match code {
        Some(code) => format!(" (code {code})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_closed_message_includes_code_when_known() {
        let with_code = StreamError::TransportClosed {
            code: Some(500),
            reason: "search node unavailable".into(),
        };
        assert_eq!(
            with_code.to_string(),
            "transport closed (code 500): search node unavailable"
        );

        let without = StreamError::TransportClosed {
            code: None,
            reason: "reset by peer".into(),
        };
        assert_eq!(without.to_string(), "transport closed: reset by peer");
    }

    #[test]
    fn only_end_is_terminal() {
        assert!(EventKind::from_tag("end").is_terminal());
        assert!(!EventKind::from_tag("error").is_terminal());
        assert!(!EventKind::from_tag("reset").is_terminal());
    }
}
