// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Stream hub -- one per application session
//
// Wires the controller task, the correlation registry, the transport
// table and the cancellation coordinator together, and exposes the
// command surface transports and consumers use:
//   start_stream / process_chunk / end_stream / cancel_stream / close_all
//
// Controller output is drained by a dispatcher task that routes each
// delivery through the registry, in order, and releases dedicated
// transports once their request has ended.

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cancel::{CancelReport, CancellationCoordinator};
use crate::config::ControllerConfig;
use crate::registry::{Binding, CorrelationRegistry, GroupKey, RegistryError, StreamCallbacks};
use crate::stream::{
    spawn_controller, Command, ControllerGone, ControllerHandle, Notification, RequestId,
    StreamError,
};
use crate::transport::{Transport, TransportId, TransportKind, TransportTable};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    ControllerGone(#[from] ControllerGone),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown transport {0}")]
    UnknownTransport(TransportId),
}

// ---------------------------------------------------------------------------
// Open options
// ---------------------------------------------------------------------------

/// How a request is bound when opened.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Transport carrying the request, if attached to this hub.
    pub transport: Option<TransportId>,
    /// Logical owner, for batched cancellation.
    pub group: Option<GroupKey>,
}

impl OpenOptions {
    pub fn on(transport: TransportId) -> Self {
        Self {
            transport: Some(transport),
            group: None,
        }
    }

    pub fn in_group(mut self, group: GroupKey) -> Self {
        self.group = Some(group);
        self
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Cheap to clone; every clone drives the same session.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct StreamHub {
    controller: ControllerHandle,
    registry: Arc<CorrelationRegistry>,
    transports: Arc<TransportTable>,
    coordinator: CancellationCoordinator,
    controller_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StreamHub {
    pub fn new(config: &ControllerConfig) -> Self {
        let (controller, notifications, task) =
            spawn_controller(config.max_buffer_bytes, config.mailbox_capacity);
        let registry = Arc::new(CorrelationRegistry::new());
        let transports = Arc::new(TransportTable::new());

        tokio::spawn(dispatch(
            notifications,
            registry.clone(),
            transports.clone(),
        ));

        let coordinator =
            CancellationCoordinator::new(controller.clone(), registry.clone(), transports.clone());

        Self {
            controller,
            registry,
            transports,
            coordinator,
            controller_task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &CancellationCoordinator {
        &self.coordinator
    }

    /// Attach a transport so requests can ride it.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) -> TransportId {
        let tid = self.transports.insert(transport);
        tracing::debug!(transport = %tid, "transport attached");
        tid
    }

    /// Requests currently riding `transport`.
    pub fn riders(&self, transport: TransportId) -> Vec<RequestId> {
        self.transports.riders(transport)
    }

    /// Register callbacks for `id`, start its stream, then fire `on_open`.
    pub async fn open(
        &self,
        id: RequestId,
        callbacks: Arc<dyn StreamCallbacks>,
        options: OpenOptions,
    ) -> Result<(), HubError> {
        let binding = Binding {
            transport: options.transport,
            group: options.group,
        };
        self.registry.register(id.clone(), callbacks, binding)?;

        if let Some(tid) = options.transport {
            if !self.transports.attach(tid, &id) {
                self.registry.unregister(&id);
                return Err(HubError::UnknownTransport(tid));
            }
        }

        if let Err(e) = self.start_stream(&id).await {
            self.registry.unregister(&id);
            if let Some(tid) = options.transport {
                release_rider(&self.transports, tid, &id).await;
            }
            return Err(e);
        }
        self.registry.open(&id);
        tracing::info!(request_id = %id, transport = ?options.transport, "stream opened");
        Ok(())
    }

    // -- Commands ------------------------------------------------------------

    pub async fn start_stream(&self, id: &RequestId) -> Result<(), HubError> {
        self.send(Command::Start(id.clone())).await
    }

    pub async fn process_chunk(
        &self,
        id: &RequestId,
        chunk: impl Into<String>,
    ) -> Result<(), HubError> {
        self.send(Command::Chunk(id.clone(), chunk.into())).await
    }

    /// Feed raw network bytes; multi-byte characters may span chunks.
    pub async fn process_bytes(&self, id: &RequestId, chunk: Bytes) -> Result<(), HubError> {
        self.send(Command::Bytes(id.clone(), chunk)).await
    }

    pub async fn end_stream(&self, id: &RequestId) -> Result<(), HubError> {
        self.send(Command::End(id.clone())).await
    }

    /// Fail one request with a terminal error, in order with its chunks.
    pub async fn fail_stream(&self, id: &RequestId, error: StreamError) -> Result<(), HubError> {
        self.send(Command::Fail(id.clone(), error)).await
    }

    pub async fn cancel_stream(&self, id: &RequestId) {
        self.coordinator.cancel(id).await;
    }

    /// Synchronous cancel for use inside callbacks.
    pub fn cancel_now(&self, id: &RequestId) {
        self.coordinator.cancel_now(id);
    }

    pub async fn cancel_group(&self, group: &GroupKey) -> CancelReport {
        self.coordinator.cancel_group(group).await
    }

    /// Tear everything down: every registered request gets `on_reset`,
    /// every open stream is closed and every transport released.
    ///
    /// Events queued before the call are still routed, ahead of `on_reset`.
    pub async fn close_all(&self) {
        if self.controller.send(Command::ResetAll).await.is_err() {
            tracing::debug!("controller gone during close_all");
        }
        if self.flush().await.is_err() {
            tracing::debug!("dispatcher gone during close_all");
        }

        let reset = self.registry.reset_all();
        // An open racing the reset may have started after ResetAll.
        for (id, _) in &reset {
            if self.controller.send(Command::Cancel(id.clone())).await.is_err() {
                break;
            }
        }

        let transports = self.transports.drain();
        for transport in &transports {
            transport.close().await;
        }
        tracing::info!(
            requests = reset.len(),
            transports = transports.len(),
            "hub closed"
        );
    }

    /// `close_all`, then stop the controller. Every later command on any
    /// clone of this hub fails with `ControllerGone`.
    pub async fn shutdown(&self) {
        self.close_all().await;
        let task = self
            .controller_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            tracing::info!("stream controller stopped");
        }
    }

    /// The connection behind `transport` died. Every rider gets a terminal
    /// error, after any chunks already queued for it.
    pub async fn transport_failed(
        &self,
        transport: TransportId,
        code: Option<u16>,
        reason: impl Into<String>,
    ) -> Result<(), HubError> {
        let reason = reason.into();
        let riders = self.transports.riders(transport);
        tracing::warn!(
            transport = %transport,
            code = ?code,
            reason = %reason,
            riders = riders.len(),
            "transport failed"
        );
        for id in &riders {
            let error = StreamError::TransportClosed {
                code,
                reason: reason.clone(),
            };
            self.send(Command::Fail(id.clone(), error)).await?;
        }
        if let Some(transport) = self.transports.remove(transport) {
            transport.close().await;
        }
        Ok(())
    }

    /// Close a transport on purpose. Riders still on it are failed, so
    /// none is left without a terminal callback.
    pub async fn close_transport(&self, transport: TransportId) -> Result<(), HubError> {
        self.transport_failed(transport, None, "transport closed").await
    }

    /// Resolves once every command sent before it has been decoded and its
    /// callbacks have run.
    pub async fn flush(&self) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx)).await?;
        rx.await.map_err(|_| HubError::ControllerGone(ControllerGone))
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        Ok(self.controller.send(command).await?)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

async fn dispatch(
    mut notifications: mpsc::Receiver<Notification>,
    registry: Arc<CorrelationRegistry>,
    transports: Arc<TransportTable>,
) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::Deliver(delivery) => {
                let id = delivery.id().clone();
                let Some(binding) = registry.route(delivery) else {
                    continue;
                };
                tracing::info!(request_id = %id, "stream finished");
                if let Some(tid) = binding.transport {
                    release_rider(&transports, tid, &id).await;
                }
            }
            Notification::Flushed(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// Detach a finished request; a dedicated transport goes with it.
async fn release_rider(transports: &TransportTable, tid: TransportId, id: &RequestId) {
    let Some(detached) = transports.detach(tid, id) else {
        return;
    };
    if detached.idle && detached.transport.kind() == TransportKind::Dedicated {
        transports.remove(tid);
        detached.transport.close().await;
    }
}
