// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Stream controller
//
// Per-request state machine: absent -> open -> closed. Chunks for a
// request that is not open are ignored, which absorbs late chunks from a
// stream that has already ended or been cancelled.
//
// The controller runs on its own task. Hosts talk to it only through an
// ordered command mailbox and receive deliveries through a second
// channel, so no decode state is ever shared with the consumer.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::buffer::{BufferStore, PendingBuffer};
use super::types::{DecodedEvent, Delivery, RequestId, StreamError};

/// Default bound on one request's undecoded text.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Synchronous core
// ---------------------------------------------------------------------------

/// Owns every open request's pending buffer and drives the decoder.
#[derive(Debug)]
pub struct StreamController {
    buffers: BufferStore,
    max_buffer_bytes: usize,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_BYTES)
    }
}

impl StreamController {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            buffers: BufferStore::new(),
            max_buffer_bytes,
        }
    }

    /// absent -> open with an empty buffer. Returns false if the request
    /// was already open.
    pub fn start(&mut self, id: RequestId) -> bool {
        let opened = self.buffers.open(id.clone());
        if opened {
            tracing::debug!(request_id = %id, "stream opened");
        } else {
            tracing::warn!(request_id = %id, "stream already open, start ignored");
        }
        opened
    }

    pub fn is_open(&self, id: &RequestId) -> bool {
        self.buffers.is_open(id)
    }

    /// Number of currently open requests.
    pub fn open_count(&self) -> usize {
        self.buffers.len()
    }

    /// Append a text chunk and return every event it completed.
    pub fn process_chunk(&mut self, id: &RequestId, chunk: &str) -> Vec<Delivery> {
        self.append(id, |buffer| buffer.push_str(chunk))
    }

    /// Append a raw byte chunk and return every event it completed.
    pub fn process_bytes(&mut self, id: &RequestId, chunk: &[u8]) -> Vec<Delivery> {
        self.append(id, |buffer| buffer.push_bytes(chunk))
    }

    fn append(&mut self, id: &RequestId, push: impl FnOnce(&mut PendingBuffer)) -> Vec<Delivery> {
        let Some(buffer) = self.buffers.get_mut(id) else {
            tracing::trace!(request_id = %id, "chunk for stream that is not open");
            return Vec::new();
        };

        push(buffer);
        let mut events = buffer.drain_events();

        // A server-sent terminal event ends the request; anything after it
        // is discarded with the buffer.
        if let Some(end) = events.iter().position(|event| event.kind.is_terminal()) {
            let discarded = events.len() - end - 1;
            events.truncate(end + 1);
            self.close(id, "server end");
            if discarded > 0 {
                tracing::debug!(request_id = %id, discarded, "events after server end dropped");
            }
            return wrap_events(id, events);
        }

        if buffer.len() > self.max_buffer_bytes {
            let mut deliveries = wrap_events(id, events);
            self.close(id, "overflow");
            tracing::warn!(
                request_id = %id,
                limit = self.max_buffer_bytes,
                "stream buffer overflow"
            );
            deliveries.push(Delivery::Failed {
                id: id.clone(),
                error: StreamError::BufferOverflow {
                    limit: self.max_buffer_bytes,
                },
            });
            return deliveries;
        }

        wrap_events(id, events)
    }

    /// Emit the terminal end event and close. No-op if not open.
    pub fn end(&mut self, id: &RequestId) -> Vec<Delivery> {
        if self.close(id, "end").is_none() {
            return Vec::new();
        }
        vec![Delivery::Event {
            id: id.clone(),
            event: DecodedEvent::end(),
        }]
    }

    /// Close without a terminal event.
    pub fn cancel(&mut self, id: &RequestId) {
        self.close(id, "cancel");
    }

    /// Close with a terminal failure. No-op if not open.
    pub fn fail(&mut self, id: &RequestId, error: StreamError) -> Vec<Delivery> {
        if self.close(id, "fail").is_none() {
            return Vec::new();
        }
        vec![Delivery::Failed {
            id: id.clone(),
            error,
        }]
    }

    /// Close every open request without terminal events.
    pub fn reset_all(&mut self) -> Vec<RequestId> {
        let closed: Vec<RequestId> = self
            .buffers
            .close_all()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        tracing::info!(closed = closed.len(), "all streams reset");
        closed
    }

    fn close(&mut self, id: &RequestId, reason: &'static str) -> Option<PendingBuffer> {
        let buffer = self.buffers.close(id)?;
        tracing::debug!(
            request_id = %id,
            reason,
            dropped = buffer.dropped(),
            discarded_bytes = buffer.len(),
            "stream closed"
        );
        Some(buffer)
    }
}

fn wrap_events(id: &RequestId, events: Vec<DecodedEvent>) -> Vec<Delivery> {
    events
        .into_iter()
        .map(|event| Delivery::Event {
            id: id.clone(),
            event,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Messages accepted by the controller task.
#[derive(Debug)]
pub enum Command {
    Start(RequestId),
    Chunk(RequestId, String),
    Bytes(RequestId, Bytes),
    End(RequestId),
    Cancel(RequestId),
    Fail(RequestId, StreamError),
    ResetAll,
    /// Ordered barrier: answered once every earlier command's output has
    /// been handed downstream.
    Flush(oneshot::Sender<()>),
}

/// Messages emitted by the controller task.
#[derive(Debug)]
pub enum Notification {
    Deliver(Delivery),
    Flushed(oneshot::Sender<()>),
}

/// The controller task has shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream controller has shut down")]
pub struct ControllerGone;

/// Cloneable sender side of the controller mailbox.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Enqueue a command, waiting for mailbox space.
    pub async fn send(&self, command: Command) -> Result<(), ControllerGone> {
        self.tx.send(command).await.map_err(|_| ControllerGone)
    }

    /// Enqueue a command without waiting. Used from synchronous callback
    /// context; falls back to a spawned send when the mailbox is full.
    pub fn send_now(&self, command: Command) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("controller gone, command discarded");
            }
        }
    }
}

/// Spawn the controller task.
///
/// Returns the command handle, the notification receiver and the task
/// handle. The task exits when every handle is dropped or the receiver
/// goes away.
pub fn spawn_controller(
    max_buffer_bytes: usize,
    mailbox_capacity: usize,
) -> (ControllerHandle, mpsc::Receiver<Notification>, JoinHandle<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(mailbox_capacity);
    let (out_tx, out_rx) = mpsc::channel::<Notification>(mailbox_capacity);

    let task = tokio::spawn(async move {
        let mut controller = StreamController::new(max_buffer_bytes);

        while let Some(command) = cmd_rx.recv().await {
            let deliveries = match command {
                Command::Start(id) => {
                    controller.start(id);
                    Vec::new()
                }
                Command::Chunk(id, chunk) => controller.process_chunk(&id, &chunk),
                Command::Bytes(id, chunk) => controller.process_bytes(&id, &chunk),
                Command::End(id) => controller.end(&id),
                Command::Cancel(id) => {
                    controller.cancel(&id);
                    Vec::new()
                }
                Command::Fail(id, error) => controller.fail(&id, error),
                Command::ResetAll => {
                    controller.reset_all();
                    Vec::new()
                }
                Command::Flush(ack) => {
                    if out_tx.send(Notification::Flushed(ack)).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            for delivery in deliveries {
                if out_tx.send(Notification::Deliver(delivery)).await.is_err() {
                    return; // Host gone
                }
            }
        }
    });

    (ControllerHandle { tx: cmd_tx }, out_rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{EventKind, Payload};
    use serde_json::json;

    fn id(s: &str) -> RequestId {
        RequestId::from(s)
    }

    fn events(deliveries: Vec<Delivery>) -> Vec<DecodedEvent> {
        deliveries
            .into_iter()
            .map(|d| match d {
                Delivery::Event { event, .. } => event,
                other => panic!("expected event, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn chunk_split_inside_payload_waits_for_delimiter() {
        let mut controller = StreamController::default();
        controller.start(id("r"));

        assert!(controller.process_chunk(&id("r"), "data: {\"message\"").is_empty());
        let out = events(controller.process_chunk(&id("r"), ":\"test\"}\n\n"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].json(), Some(&json!({"message": "test"})));
    }

    #[test]
    fn chunks_for_unstarted_request_are_ignored() {
        let mut controller = StreamController::default();
        assert!(controller.process_chunk(&id("ghost"), "data: 1\n\n").is_empty());
        assert!(controller.end(&id("ghost")).is_empty());
        controller.cancel(&id("ghost"));
        assert_eq!(controller.open_count(), 0);
    }

    #[test]
    fn end_emits_terminal_event_and_closes() {
        let mut controller = StreamController::default();
        controller.start(id("r"));
        let out = events(controller.end(&id("r")));
        assert_eq!(out, vec![DecodedEvent::end()]);
        assert!(!controller.is_open(&id("r")));
        assert!(controller.end(&id("r")).is_empty());
    }

    #[test]
    fn end_discards_undelimited_tail() {
        let mut controller = StreamController::default();
        controller.start(id("r"));
        controller.process_chunk(&id("r"), "data: {\"never\":\"finished\"}");
        let out = events(controller.end(&id("r")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EventKind::End);
    }

    #[test]
    fn server_end_event_closes_the_stream() {
        let mut controller = StreamController::default();
        controller.start(id("r"));

        let out = events(controller.process_chunk(
            &id("r"),
            "data: {\"n\":1}\n\nevent: end\ndata: null\n\ndata: {\"n\":2}\n\ndata: tail",
        ));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].kind, EventKind::End);
        assert!(!controller.is_open(&id("r")));
        assert_eq!(controller.open_count(), 0);
        assert!(controller.end(&id("r")).is_empty());
    }

    #[test]
    fn cancel_silences_later_chunks() {
        let mut controller = StreamController::default();
        controller.start(id("r"));
        controller.cancel(&id("r"));
        assert!(controller.process_chunk(&id("r"), "data: 1\n\n").is_empty());
        assert!(controller.end(&id("r")).is_empty());
    }

    #[test]
    fn reset_all_closes_everything_silently() {
        let mut controller = StreamController::default();
        controller.start(id("a"));
        controller.start(id("b"));
        let mut closed = controller.reset_all();
        closed.sort();
        assert_eq!(closed, vec![id("a"), id("b")]);
        assert!(controller.process_chunk(&id("a"), "data: 1\n\n").is_empty());
        assert!(controller.process_chunk(&id("b"), "data: 1\n\n").is_empty());
    }

    #[test]
    fn restart_after_close_opens_a_fresh_buffer() {
        let mut controller = StreamController::default();
        controller.start(id("r"));
        controller.process_chunk(&id("r"), "data: stale");
        controller.cancel(&id("r"));
        controller.start(id("r"));
        let out = events(controller.process_chunk(&id("r"), "data: fresh\n\n"));
        assert_eq!(out[0].payload, Payload::Text("fresh".to_string()));
    }

    #[test]
    fn interleaved_requests_keep_separate_buffers() {
        let mut controller = StreamController::default();
        controller.start(id("a"));
        controller.start(id("b"));
        controller.process_chunk(&id("a"), "data: {\"from\":");
        controller.process_chunk(&id("b"), "data: {\"from\":\"b\"}\n\n");
        let out = events(controller.process_chunk(&id("a"), "\"a\"}\n\n"));
        assert_eq!(out[0].json(), Some(&json!({"from": "a"})));
    }

    #[test]
    fn overflow_fails_only_the_offending_request() {
        let mut controller = StreamController::new(16);
        controller.start(id("big"));
        controller.start(id("small"));

        let out = controller.process_chunk(&id("big"), "data: 0123456789abcdef");
        assert_eq!(
            out,
            vec![Delivery::Failed {
                id: id("big"),
                error: StreamError::BufferOverflow { limit: 16 },
            }]
        );
        assert!(!controller.is_open(&id("big")));

        let out = events(controller.process_chunk(&id("small"), "data: 1\n\n"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn events_completed_before_overflow_are_still_delivered() {
        let mut controller = StreamController::new(16);
        controller.start(id("r"));
        let out = controller.process_chunk(&id("r"), "data: 1\n\ndata: 0123456789abcdef");
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Delivery::Event { .. }));
        assert!(matches!(out[1], Delivery::Failed { .. }));
    }

    #[test]
    fn fail_is_terminal_and_single_shot() {
        let mut controller = StreamController::default();
        controller.start(id("r"));
        let error = StreamError::TransportClosed {
            code: Some(502),
            reason: "bad gateway".into(),
        };
        assert_eq!(controller.fail(&id("r"), error.clone()).len(), 1);
        assert!(controller.fail(&id("r"), error).is_empty());
        assert!(controller.end(&id("r")).is_empty());
    }

    #[tokio::test]
    async fn actor_preserves_command_order() {
        let (handle, mut rx, _task) = spawn_controller(DEFAULT_MAX_BUFFER_BYTES, 8);
        handle.send(Command::Start(id("r"))).await.unwrap();
        handle
            .send(Command::Chunk(id("r"), "data: 1\n\ndata: 2\n\n".into()))
            .await
            .unwrap();
        handle
            .send(Command::Bytes(id("r"), Bytes::from_static(b"data: 3\n\n")))
            .await
            .unwrap();
        handle.send(Command::End(id("r"))).await.unwrap();
        let (ack_tx, ack_rx) = oneshot::channel();
        handle.send(Command::Flush(ack_tx)).await.unwrap();

        let mut seen = Vec::new();
        while let Some(notification) = rx.recv().await {
            match notification {
                Notification::Deliver(Delivery::Event { event, .. }) => seen.push(event),
                Notification::Deliver(other) => panic!("unexpected {other:?}"),
                Notification::Flushed(ack) => {
                    ack.send(()).unwrap();
                    break;
                }
            }
        }
        ack_rx.await.unwrap();

        let payloads: Vec<_> = seen.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                Payload::Json(json!(1)),
                Payload::Json(json!(2)),
                Payload::Json(json!(3)),
                Payload::Json(serde_json::Value::Null),
            ]
        );
        assert_eq!(seen[3].kind, EventKind::End);
    }
}
