// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Channel-backed callbacks: turns the callback interface into an async
// stream of updates for consumers that prefer to `.next().await`.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::StreamCallbacks;
use crate::stream::{DecodedEvent, RequestId, StreamError};

/// One callback invocation, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Opened(RequestId),
    Message(RequestId, DecodedEvent),
    Error(RequestId, StreamError),
    Completed(RequestId),
    Reset(RequestId),
}

impl StreamUpdate {
    pub fn id(&self) -> &RequestId {
        match self {
            StreamUpdate::Opened(id)
            | StreamUpdate::Message(id, _)
            | StreamUpdate::Error(id, _)
            | StreamUpdate::Completed(id)
            | StreamUpdate::Reset(id) => id,
        }
    }

    /// No further update follows for this request.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            StreamUpdate::Error(..) | StreamUpdate::Completed(_) | StreamUpdate::Reset(_)
        )
    }

    /// JSON line form, as printed by the CLI.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StreamUpdate::Opened(id) => serde_json::json!({"request_id": id, "update": "open"}),
            StreamUpdate::Message(id, event) => serde_json::json!({
                "request_id": id,
                "update": "message",
                "event": event,
            }),
            StreamUpdate::Error(id, error) => serde_json::json!({
                "request_id": id,
                "update": "error",
                "error": error.to_string(),
            }),
            StreamUpdate::Completed(id) => {
                serde_json::json!({"request_id": id, "update": "complete"})
            }
            StreamUpdate::Reset(id) => serde_json::json!({"request_id": id, "update": "reset"}),
        }
    }
}

pub type UpdateStream = UnboundedReceiverStream<StreamUpdate>;

/// Callbacks that forward every invocation into a channel.
///
/// The channel is unbounded because callbacks run synchronously on the
/// dispatcher and must not wait on the consumer.
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<StreamUpdate>,
}

impl ChannelCallbacks {
    pub fn new() -> (Arc<Self>, UpdateStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), UnboundedReceiverStream::new(rx))
    }

    fn forward(&self, update: StreamUpdate) {
        // Receiver dropped: the consumer stopped listening.
        let _ = self.tx.send(update);
    }
}

impl StreamCallbacks for ChannelCallbacks {
    fn on_open(&self, id: &RequestId) {
        self.forward(StreamUpdate::Opened(id.clone()));
    }

    fn on_message(&self, id: &RequestId, event: &DecodedEvent) {
        self.forward(StreamUpdate::Message(id.clone(), event.clone()));
    }

    fn on_error(&self, id: &RequestId, error: &StreamError) {
        self.forward(StreamUpdate::Error(id.clone(), error.clone()));
    }

    fn on_complete(&self, id: &RequestId) {
        self.forward(StreamUpdate::Completed(id.clone()));
    }

    fn on_reset(&self, id: &RequestId) {
        self.forward(StreamUpdate::Reset(id.clone()));
    }
}
