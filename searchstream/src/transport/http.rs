// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Chunked-HTTP transport
//
// Opens streaming search requests with reqwest and pumps the response
// body into a hub, chunk by chunk, tagged with the request id.
//
// Two shapes:
// - dedicated: each request owns its response; cancelling aborts the
//   pump, which drops the connection
// - shared: requests ride one pooled client (HTTP/2 multiplexing);
//   cancelling aborts the request's pump and tells the server to stop the
//   query via the abandon endpoint, leaving the connection up

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;

use super::{Transport, TransportError, TransportId, TransportKind};
use crate::config::{TransportConfig, REQUEST_ID_PLACEHOLDER};
use crate::hub::{HubError, OpenOptions, StreamHub};
use crate::registry::{GroupKey, StreamCallbacks};
use crate::stream::{RequestId, StreamError};

/// Query parameter carrying the request id on stream requests.
pub const REQUEST_ID_PARAM: &str = "trace_id";

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Opens streaming search requests against one search endpoint.
#[derive(Clone)]
pub struct HttpSearchTransport {
    client: reqwest::Client,
    config: Arc<TransportConfig>,
}

impl HttpSearchTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: TransportConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.config.base_url, self.config.stream_path)
    }

    pub fn cancel_url(&self, id: &RequestId) -> String {
        let path = self
            .config
            .cancel_path
            .replace(REQUEST_ID_PLACEHOLDER, id.as_str());
        format!("{}{}", self.config.base_url, path)
    }

    /// Open `id` on its own connection and start pumping its body.
    ///
    /// Returns once the request is registered; results arrive through
    /// `callbacks`.
    pub async fn open_stream(
        &self,
        hub: &StreamHub,
        id: RequestId,
        callbacks: Arc<dyn StreamCallbacks>,
        body: serde_json::Value,
        group: Option<GroupKey>,
    ) -> Result<TransportId, HubError> {
        let connection = Arc::new(DedicatedConnection::default());
        let tid = hub.attach_transport(connection.clone());

        let options = OpenOptions {
            transport: Some(tid),
            group,
        };
        if let Err(e) = hub.open(id.clone(), callbacks, options).await {
            hub.close_transport(tid).await?;
            return Err(e);
        }

        let request = self.stream_request(&id, &body);
        let task = tokio::spawn(pump(hub.clone(), id, request));
        connection.bind(task.abort_handle());
        Ok(tid)
    }

    /// A shared connection for multiplexing many requests.
    pub fn shared(&self) -> Arc<SharedHttpConnection> {
        Arc::new(SharedHttpConnection {
            transport: self.clone(),
            pumps: DashMap::new(),
        })
    }

    fn stream_request(&self, id: &RequestId, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(self.stream_url())
            .query(&[(REQUEST_ID_PARAM, id.as_str())])
            .json(body);
        self.authorize(request)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_header {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

/// Send the request and feed its body into the hub until it ends.
async fn pump(hub: StreamHub, id: RequestId, request: reqwest::RequestBuilder) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let code = e.status().map(|s| s.as_u16());
            fail(&hub, &id, code, e.to_string()).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let reason = response
            .text()
            .await
            .unwrap_or_else(|e| format!("unreadable error body: {e}"));
        fail(&hub, &id, Some(status.as_u16()), reason).await;
        return;
    }

    let mut body = response.bytes_stream();
    while let Some(next) = body.next().await {
        let outcome = match next {
            Ok(chunk) => hub.process_bytes(&id, chunk).await,
            Err(e) => {
                fail(&hub, &id, Some(status.as_u16()), e.to_string()).await;
                return;
            }
        };
        if outcome.is_err() {
            return; // Hub shut down
        }
    }

    if let Err(e) = hub.end_stream(&id).await {
        tracing::debug!(request_id = %id, error = %e, "hub gone at end of stream");
    }
}

async fn fail(hub: &StreamHub, id: &RequestId, code: Option<u16>, reason: String) {
    tracing::warn!(request_id = %id, code = ?code, reason = %reason, "search stream failed");
    let error = StreamError::TransportClosed { code, reason };
    if let Err(e) = hub.fail_stream(id, error).await {
        tracing::debug!(request_id = %id, error = %e, "hub gone while failing stream");
    }
}

// ---------------------------------------------------------------------------
// Dedicated connection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
enum PumpSlot {
    #[default]
    Pending,
    Running(AbortHandle),
    Closed,
}

/// One request, one response body. Closing aborts the pump.
#[derive(Debug, Default)]
pub struct DedicatedConnection {
    slot: Mutex<PumpSlot>,
}

impl DedicatedConnection {
    /// Attach the pump task. If the connection was closed before the pump
    /// started, the pump is aborted immediately.
    fn bind(&self, handle: AbortHandle) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match *slot {
            PumpSlot::Closed => handle.abort(),
            _ => *slot = PumpSlot::Running(handle),
        }
    }

    fn shut(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let PumpSlot::Running(handle) = std::mem::replace(&mut *slot, PumpSlot::Closed) {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for DedicatedConnection {
    fn kind(&self) -> TransportKind {
        TransportKind::Dedicated
    }

    async fn close(&self) {
        self.shut();
    }
}

// ---------------------------------------------------------------------------
// Shared connection
// ---------------------------------------------------------------------------

/// Many requests over one pooled client.
pub struct SharedHttpConnection {
    transport: HttpSearchTransport,
    pumps: DashMap<RequestId, AbortHandle>,
}

impl SharedHttpConnection {
    /// Open `id` on this shared connection. `tid` is the id this
    /// connection was attached under.
    pub async fn open_stream(
        &self,
        hub: &StreamHub,
        tid: TransportId,
        id: RequestId,
        callbacks: Arc<dyn StreamCallbacks>,
        body: serde_json::Value,
        group: Option<GroupKey>,
    ) -> Result<(), HubError> {
        self.pumps.retain(|_, handle| !handle.is_finished());

        let options = OpenOptions {
            transport: Some(tid),
            group,
        };
        hub.open(id.clone(), callbacks, options).await?;

        let request = self.transport.stream_request(&id, &body);
        let task = tokio::spawn(pump(hub.clone(), id.clone(), request));
        self.pumps.insert(id, task.abort_handle());
        Ok(())
    }

    /// Requests with a pump still running.
    pub fn active(&self) -> usize {
        self.pumps.iter().filter(|entry| !entry.is_finished()).count()
    }
}

#[async_trait]
impl Transport for SharedHttpConnection {
    fn kind(&self) -> TransportKind {
        TransportKind::Shared
    }

    async fn abandon(&self, id: &RequestId) -> Result<(), TransportError> {
        if let Some((_, handle)) = self.pumps.remove(id) {
            handle.abort();
        }

        let request = self
            .transport
            .authorize(self.transport.client.delete(self.transport.cancel_url(id)));
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                action: "abandon",
                status: response.status().as_u16(),
            });
        }
        tracing::debug!(request_id = %id, "server acknowledged abandon");
        Ok(())
    }

    async fn close(&self) {
        let ids: Vec<RequestId> = self.pumps.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.pumps.remove(&id) {
                handle.abort();
            }
        }
    }
}
