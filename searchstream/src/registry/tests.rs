// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::stream::{EventKind, Payload};
use std::sync::{Mutex, OnceLock};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Records every callback as a short string.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl StreamCallbacks for Recorder {
    fn on_open(&self, id: &RequestId) {
        self.push(format!("open:{id}"));
    }

    fn on_message(&self, id: &RequestId, event: &DecodedEvent) {
        self.push(format!("message:{id}:{}", event.kind));
    }

    fn on_error(&self, id: &RequestId, _error: &StreamError) {
        self.push(format!("error:{id}"));
    }

    fn on_complete(&self, id: &RequestId) {
        self.push(format!("complete:{id}"));
    }

    fn on_reset(&self, id: &RequestId) {
        self.push(format!("reset:{id}"));
    }
}

/// Unregisters its own request from inside `on_message`.
struct SelfUnregistering {
    registry: OnceLock<Arc<CorrelationRegistry>>,
    seen: Mutex<usize>,
}

impl StreamCallbacks for SelfUnregistering {
    fn on_message(&self, id: &RequestId, _event: &DecodedEvent) {
        *self.seen.lock().unwrap() += 1;
        if let Some(registry) = self.registry.get() {
            registry.silence(id);
            registry.unregister(id);
        }
    }
}

fn id(s: &str) -> RequestId {
    RequestId::from(s)
}

fn message(id: &RequestId, kind: EventKind) -> Delivery {
    Delivery::Event {
        id: id.clone(),
        event: DecodedEvent::new(kind, Payload::Json(serde_json::json!({}))),
    }
}

fn end(id: &RequestId) -> Delivery {
    Delivery::Event {
        id: id.clone(),
        event: DecodedEvent::end(),
    }
}

fn failed(id: &RequestId) -> Delivery {
    Delivery::Failed {
        id: id.clone(),
        error: StreamError::TransportClosed {
            code: None,
            reason: "gone".into(),
        },
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn duplicate_registration_is_rejected_and_first_owner_kept() {
    let registry = CorrelationRegistry::new();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    registry
        .register(id("r"), first.clone(), Binding::default())
        .unwrap();
    let err = registry
        .register(id("r"), second.clone(), Binding::default())
        .unwrap_err();
    assert_eq!(err, RegistryError::AlreadyRegistered(id("r")));

    registry.route(message(&id("r"), EventKind::Hits));
    assert_eq!(first.calls(), vec!["message:r:search_response_hits"]);
    assert!(second.calls().is_empty());
}

#[test]
fn id_can_be_registered_again_after_unregister() {
    let registry = CorrelationRegistry::new();
    let callbacks = Arc::new(Recorder::default());
    registry
        .register(id("r"), callbacks.clone(), Binding::default())
        .unwrap();
    registry.unregister(&id("r"));
    assert!(registry
        .register(id("r"), callbacks, Binding::default())
        .is_ok());
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[test]
fn routing_to_unknown_id_is_silent() {
    let registry = CorrelationRegistry::new();
    assert!(registry.route(message(&id("nobody"), EventKind::Data)).is_none());
    assert!(registry.route(end(&id("nobody"))).is_none());
}

#[test]
fn end_fires_complete_once_and_removes_entry() {
    let registry = CorrelationRegistry::new();
    let callbacks = Arc::new(Recorder::default());
    let binding = Binding {
        transport: None,
        group: Some(GroupKey::new("panel-1")),
    };
    registry
        .register(id("r"), callbacks.clone(), binding.clone())
        .unwrap();

    registry.route(message(&id("r"), EventKind::Metadata));
    assert_eq!(registry.route(end(&id("r"))), Some(binding));
    registry.route(end(&id("r")));
    registry.route(failed(&id("r")));

    assert_eq!(
        callbacks.calls(),
        vec!["message:r:search_response_metadata", "complete:r"]
    );
    assert!(registry.is_empty());
}

#[test]
fn failure_fires_error_and_never_complete() {
    let registry = CorrelationRegistry::new();
    let callbacks = Arc::new(Recorder::default());
    registry
        .register(id("r"), callbacks.clone(), Binding::default())
        .unwrap();

    registry.route(failed(&id("r")));
    registry.route(end(&id("r")));
    assert_eq!(callbacks.calls(), vec!["error:r"]);
}

#[test]
fn server_error_events_are_not_terminal() {
    let registry = CorrelationRegistry::new();
    let callbacks = Arc::new(Recorder::default());
    registry
        .register(id("r"), callbacks.clone(), Binding::default())
        .unwrap();

    registry.route(message(&id("r"), EventKind::Error));
    registry.route(end(&id("r")));
    assert_eq!(callbacks.calls(), vec!["message:r:error", "complete:r"]);
}

#[test]
fn silenced_entry_receives_nothing() {
    let registry = CorrelationRegistry::new();
    let callbacks = Arc::new(Recorder::default());
    registry
        .register(id("r"), callbacks.clone(), Binding::default())
        .unwrap();

    registry.silence(&id("r"));
    registry.route(message(&id("r"), EventKind::Hits));
    assert!(registry.route(end(&id("r"))).is_none());
    registry.open(&id("r"));
    assert!(callbacks.calls().is_empty());
    assert!(registry.contains(&id("r")));
}

#[test]
fn callback_may_unregister_its_own_request() {
    let registry = Arc::new(CorrelationRegistry::new());
    let callbacks = Arc::new(SelfUnregistering {
        registry: OnceLock::new(),
        seen: Mutex::new(0),
    });
    let _ = callbacks.registry.set(registry.clone());
    registry
        .register(id("r"), callbacks.clone(), Binding::default())
        .unwrap();

    registry.route(message(&id("r"), EventKind::Hits));
    registry.route(message(&id("r"), EventKind::Hits));
    registry.route(end(&id("r")));

    assert_eq!(*callbacks.seen.lock().unwrap(), 1);
    assert!(registry.is_empty());
}

#[test]
fn requests_are_routed_independently() {
    let registry = CorrelationRegistry::new();
    let a = Arc::new(Recorder::default());
    let b = Arc::new(Recorder::default());
    registry.register(id("a"), a.clone(), Binding::default()).unwrap();
    registry.register(id("b"), b.clone(), Binding::default()).unwrap();

    registry.route(failed(&id("a")));
    registry.route(message(&id("b"), EventKind::Hits));

    assert_eq!(a.calls(), vec!["error:a"]);
    assert_eq!(b.calls(), vec!["message:b:search_response_hits"]);
}

// ---------------------------------------------------------------------------
// Reset and groups
// ---------------------------------------------------------------------------

#[test]
fn reset_all_fires_reset_for_live_entries_only() {
    let registry = CorrelationRegistry::new();
    let live = Arc::new(Recorder::default());
    let cancelled = Arc::new(Recorder::default());
    registry.register(id("live"), live.clone(), Binding::default()).unwrap();
    registry
        .register(id("cancelled"), cancelled.clone(), Binding::default())
        .unwrap();
    registry.silence(&id("cancelled"));

    assert_eq!(registry.reset_all().len(), 2);
    assert_eq!(live.calls(), vec!["reset:live"]);
    assert!(cancelled.calls().is_empty());
    assert!(registry.is_empty());
}

#[test]
fn ids_in_group_filters_by_group() {
    let registry = CorrelationRegistry::new();
    let callbacks = Arc::new(Recorder::default());
    let panel = GroupKey::new("panel-7");
    for name in ["a", "b"] {
        registry
            .register(
                id(name),
                callbacks.clone(),
                Binding {
                    transport: None,
                    group: Some(panel.clone()),
                },
            )
            .unwrap();
    }
    registry
        .register(id("other"), callbacks, Binding::default())
        .unwrap();

    let mut ids = registry.ids_in_group(&panel);
    ids.sort();
    assert_eq!(ids, vec![id("a"), id("b")]);
}

#[tokio::test]
async fn channel_callbacks_stream_updates_in_order() {
    use tokio_stream::StreamExt;

    let registry = CorrelationRegistry::new();
    let (callbacks, mut updates) = ChannelCallbacks::new();
    registry
        .register(id("r"), callbacks, Binding::default())
        .unwrap();

    registry.open(&id("r"));
    registry.route(message(&id("r"), EventKind::Hits));
    registry.route(end(&id("r")));

    assert_eq!(updates.next().await, Some(StreamUpdate::Opened(id("r"))));
    assert!(matches!(
        updates.next().await,
        Some(StreamUpdate::Message(_, ref event)) if event.kind == EventKind::Hits
    ));
    let last = updates.next().await.unwrap();
    assert_eq!(last, StreamUpdate::Completed(id("r")));
    assert!(last.is_final());
}
