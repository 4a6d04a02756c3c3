// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Cancellation coordinator
//
// Abandons one in-flight request without disturbing others sharing its
// connection:
// 1. silence the request and stop local decoding
// 2. shared transport: send a best-effort abandon signal to the server;
//    dedicated transport: close the connection
// 3. unregister the request and detach it from its transport
//
// Once `cancel` returns no callback fires for that request again, even if
// chunks for it are still in flight: the cancel waits on a flush barrier,
// so a callback the dispatcher had already picked up has finished.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::registry::{CorrelationRegistry, GroupKey};
use crate::stream::{Command, ControllerHandle, RequestId};
use crate::transport::{TransportError, TransportKind, TransportTable};

/// Outcome of cancelling a group of requests.
#[derive(Debug, Default)]
pub struct CancelReport {
    /// Every request that was cancelled.
    pub cancelled: Vec<RequestId>,
    /// Requests whose server-side abandon signal failed. They are still
    /// cancelled locally.
    pub failed_notifications: Vec<(RequestId, TransportError)>,
}

impl CancelReport {
    pub fn is_clean(&self) -> bool {
        self.failed_notifications.is_empty()
    }
}

#[derive(Clone)]
pub struct CancellationCoordinator {
    controller: ControllerHandle,
    registry: Arc<CorrelationRegistry>,
    transports: Arc<TransportTable>,
}

impl CancellationCoordinator {
    pub fn new(
        controller: ControllerHandle,
        registry: Arc<CorrelationRegistry>,
        transports: Arc<TransportTable>,
    ) -> Self {
        Self {
            controller,
            registry,
            transports,
        }
    }

    /// Cancel one request. Unknown ids are a no-op.
    ///
    /// A failed abandon signal is logged, never raised.
    pub async fn cancel(&self, id: &RequestId) {
        if let Err(e) = self.cancel_reporting(id).await {
            tracing::warn!(request_id = %id, error = %e, "abandon signal failed");
        }
    }

    /// Cancel from synchronous context, e.g. from inside a callback.
    ///
    /// The request is silenced before this returns; connection cleanup
    /// finishes on a spawned task.
    pub fn cancel_now(&self, id: &RequestId) {
        self.registry.silence(id);
        self.controller.send_now(Command::Cancel(id.clone()));

        let coordinator = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            coordinator.cancel(&id).await;
        });
    }

    /// Cancel every request in `group`, each independently.
    pub async fn cancel_group(&self, group: &GroupKey) -> CancelReport {
        let ids = self.registry.ids_in_group(group);
        tracing::info!(group = %group, requests = ids.len(), "cancelling group");

        let outcomes = join_all(ids.iter().map(|id| self.cancel_reporting(id))).await;

        let mut report = CancelReport::default();
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(request_id = %id, group = %group, error = %e, "abandon signal failed");
                report.failed_notifications.push((id.clone(), e));
            }
            report.cancelled.push(id);
        }
        report
    }

    async fn cancel_reporting(&self, id: &RequestId) -> Result<(), TransportError> {
        // 1) Local silence first, then stop decoding.
        let binding = self.registry.silence(id);
        if self.controller.send(Command::Cancel(id.clone())).await.is_err() {
            tracing::debug!(request_id = %id, "controller gone during cancel");
        }
        self.settle().await;

        let Some(binding) = binding else {
            return Ok(());
        };

        // 2) Reach the connection.
        let mut outcome = Ok(());
        if let Some(tid) = binding.transport {
            if let Some(transport) = self.transports.get(tid) {
                match transport.kind() {
                    TransportKind::Shared => {
                        outcome = transport.abandon(id).await;
                    }
                    TransportKind::Dedicated => {
                        transport.close().await;
                    }
                }
            }
        }

        // 3) Forget the request.
        self.registry.unregister(id);
        if let Some(tid) = binding.transport {
            if let Some(detached) = self.transports.detach(tid, id) {
                if detached.idle && detached.transport.kind() == TransportKind::Dedicated {
                    self.transports.remove(tid);
                }
            }
        }

        tracing::info!(
            request_id = %id,
            transport = ?binding.transport,
            group = ?binding.group,
            "stream cancelled"
        );
        outcome
    }

    /// Wait until the dispatcher has handled everything queued so far.
    async fn settle(&self) {
        let (tx, rx) = oneshot::channel();
        if self.controller.send(Command::Flush(tx)).await.is_err() {
            return;
        }
        if rx.await.is_err() {
            tracing::debug!("dispatcher gone before cancel barrier");
        }
    }
}
