// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

pub mod cancel;
pub mod config;
pub mod hub;
pub mod registry;
pub mod stream;
pub mod transport;

pub use hub::{HubError, OpenOptions, StreamHub};
pub use registry::{ChannelCallbacks, GroupKey, StreamCallbacks, StreamUpdate};
pub use stream::{DecodedEvent, EventKind, Payload, RequestId, StreamError};
