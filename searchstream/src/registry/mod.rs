// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Correlation registry
//
// Maps each live request id to the consumer's callbacks and to the
// transport carrying it. One registry per hub; nothing here is global.
//
// Callbacks never run while a map guard is held. The callback set is
// cloned out first, and terminal routes remove the entry before invoking
// the terminal handler, so a callback may cancel its own request (or any
// other) without corrupting the map or deadlocking.

mod channel;

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

use crate::stream::{DecodedEvent, Delivery, RequestId, StreamError};
use crate::transport::TransportId;

pub use channel::{ChannelCallbacks, StreamUpdate, UpdateStream};

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Consumer handlers for one request.
///
/// `on_message` is the primary channel. Exactly one of `on_complete` or
/// `on_error` fires for a request that is not cancelled or reset.
pub trait StreamCallbacks: Send + Sync {
    fn on_open(&self, _id: &RequestId) {}

    fn on_message(&self, id: &RequestId, event: &DecodedEvent);

    fn on_error(&self, _id: &RequestId, _error: &StreamError) {}

    fn on_complete(&self, _id: &RequestId) {}

    /// The request was torn down by a hub-wide reset.
    fn on_reset(&self, _id: &RequestId) {}
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Logical owner of a set of requests, e.g. one dashboard panel. Used for
/// batched cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a request lives besides its callbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    pub transport: Option<TransportId>,
    pub group: Option<GroupKey>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("request {0} is already registered")]
    AlreadyRegistered(RequestId),
}

struct Entry {
    callbacks: Arc<dyn StreamCallbacks>,
    binding: Binding,
    /// Set by cancellation; a silenced entry never routes again.
    silenced: bool,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CorrelationRegistry {
    entries: DashMap<RequestId, Entry>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register callbacks for a fresh request id.
    ///
    /// A second registration for a live id is rejected; the first owner
    /// keeps the request.
    pub fn register(
        &self,
        id: RequestId,
        callbacks: Arc<dyn StreamCallbacks>,
        binding: Binding,
    ) -> Result<(), RegistryError> {
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                tracing::warn!(request_id = %occupied.key(), "duplicate registration rejected");
                Err(RegistryError::AlreadyRegistered(occupied.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    callbacks,
                    binding,
                    silenced: false,
                });
                Ok(())
            }
        }
    }

    /// Fire `on_open` for a registered request.
    pub fn open(&self, id: &RequestId) {
        if let Some(callbacks) = self.live_callbacks(id) {
            callbacks.on_open(id);
        }
    }

    /// Route one controller delivery to its request's callbacks.
    ///
    /// Unknown or silenced ids are a no-op. For terminal deliveries the
    /// entry is removed before the handler runs and its binding returned
    /// so the caller can release the transport.
    pub fn route(&self, delivery: Delivery) -> Option<Binding> {
        if delivery.is_terminal() {
            let (id, entry) = self.entries.remove_if(delivery.id(), |_, entry| !entry.silenced)?;
            match delivery {
                Delivery::Event { .. } => entry.callbacks.on_complete(&id),
                Delivery::Failed { error, .. } => entry.callbacks.on_error(&id, &error),
            }
            return Some(entry.binding);
        }

        if let Delivery::Event { id, event } = delivery {
            if let Some(callbacks) = self.live_callbacks(&id) {
                callbacks.on_message(&id, &event);
            }
        }
        None
    }

    /// Stop routing to `id` without removing it. Returns its binding if
    /// it was registered.
    pub fn silence(&self, id: &RequestId) -> Option<Binding> {
        let mut entry = self.entries.get_mut(id)?;
        entry.silenced = true;
        Some(entry.binding.clone())
    }

    /// Remove `id` without firing anything.
    pub fn unregister(&self, id: &RequestId) -> Option<Binding> {
        self.entries.remove(id).map(|(_, entry)| entry.binding)
    }

    /// Remove every registration, firing `on_reset` for each live one.
    pub fn reset_all(&self) -> Vec<(RequestId, Binding)> {
        let ids: Vec<RequestId> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((id, entry)) = self.entries.remove(&id) {
                if !entry.silenced {
                    entry.callbacks.on_reset(&id);
                }
                removed.push((id, entry.binding));
            }
        }
        removed
    }

    pub fn ids_in_group(&self, group: &GroupKey) -> Vec<RequestId> {
        self.entries
            .iter()
            .filter(|entry| entry.binding.group.as_ref() == Some(group))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn binding(&self, id: &RequestId) -> Option<Binding> {
        self.entries.get(id).map(|entry| entry.binding.clone())
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_callbacks(&self, id: &RequestId) -> Option<Arc<dyn StreamCallbacks>> {
        let entry = self.entries.get(id)?;
        if entry.silenced {
            return None;
        }
        Some(entry.callbacks.clone())
    }
}

#[cfg(test)]
mod tests;
