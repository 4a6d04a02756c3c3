// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Transport handles
//
// A transport is the connection actually carrying one or more requests:
// either dedicated (one request per connection, e.g. a chunked HTTP
// response) or shared (many requests multiplexed over one connection).
// The table below tracks which requests ride which transport so that a
// dying connection can fail every rider and cancellation can reach the
// right connection.

pub mod http;

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::stream::RequestId;

pub use http::{HttpSearchTransport, SharedHttpConnection};

// ---------------------------------------------------------------------------
// Identity and kind
// ---------------------------------------------------------------------------

/// Handle for a transport attached to a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Carries exactly one request; closing it is how that request is
    /// abandoned.
    Dedicated,
    /// Multiplexes many requests; abandoning one needs an explicit server
    /// signal and must leave the connection up.
    Shared,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while talking to the server side of a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected {action} with status {status}")]
    Status { action: &'static str, status: u16 },

    #[error("transport is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Trait: Transport
// ---------------------------------------------------------------------------

/// The connection side of a request, as seen by cancellation.
///
/// Implementations must be Send + Sync; the hub keeps them behind `Arc`
/// and calls them from whichever task cancels.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Tell the origin server to stop working on `id`. Best effort; only
    /// meaningful for shared transports.
    async fn abandon(&self, _id: &RequestId) -> Result<(), TransportError> {
        Ok(())
    }

    /// Stop delivering data and release the connection.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// Transport table
// ---------------------------------------------------------------------------

struct TransportEntry {
    transport: Arc<dyn Transport>,
    riders: HashSet<RequestId>,
}

/// Result of detaching a rider.
pub struct Detached {
    pub transport: Arc<dyn Transport>,
    /// No rider remains on the transport.
    pub idle: bool,
}

/// Transports attached to a hub and the requests riding each.
#[derive(Default)]
pub struct TransportTable {
    entries: DashMap<TransportId, TransportEntry>,
    next_id: AtomicU64,
}

impl TransportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, transport: Arc<dyn Transport>) -> TransportId {
        let id = TransportId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(
            id,
            TransportEntry {
                transport,
                riders: HashSet::new(),
            },
        );
        id
    }

    /// Record that `request` rides `transport`. False if the transport is
    /// unknown.
    pub fn attach(&self, transport: TransportId, request: &RequestId) -> bool {
        match self.entries.get_mut(&transport) {
            Some(mut entry) => {
                entry.riders.insert(request.clone());
                true
            }
            None => false,
        }
    }

    pub fn detach(&self, transport: TransportId, request: &RequestId) -> Option<Detached> {
        let mut entry = self.entries.get_mut(&transport)?;
        entry.riders.remove(request);
        Some(Detached {
            transport: entry.transport.clone(),
            idle: entry.riders.is_empty(),
        })
    }

    pub fn get(&self, transport: TransportId) -> Option<Arc<dyn Transport>> {
        self.entries
            .get(&transport)
            .map(|entry| entry.transport.clone())
    }

    pub fn riders(&self, transport: TransportId) -> Vec<RequestId> {
        self.entries
            .get(&transport)
            .map(|entry| entry.riders.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, transport: TransportId) -> Option<Arc<dyn Transport>> {
        self.entries
            .remove(&transport)
            .map(|(_, entry)| entry.transport)
    }

    /// Remove every transport, returning them for closing.
    pub fn drain(&self) -> Vec<Arc<dyn Transport>> {
        let ids: Vec<TransportId> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
