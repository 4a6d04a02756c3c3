// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Incremental event stream decoding
//
// Responsibilities:
// - Reconstruct blank-line-delimited `event:`/`data:` messages from an
//   arbitrarily fragmented text or byte stream
// - Keep one pending buffer per open request
// - Drive the per-request open/closed state machine on an isolated task
// - Emit decoded events strictly in wire order per request

pub mod buffer;
pub mod controller;
pub mod decoder;
mod types;

pub use buffer::{BufferStore, PendingBuffer};
pub use controller::{
    spawn_controller, Command, ControllerGone, ControllerHandle, Notification, StreamController,
    DEFAULT_MAX_BUFFER_BYTES,
};
pub use decoder::{decode, encode, Decoded, FRAME_DELIMITER};
pub use types::{DecodedEvent, Delivery, EventKind, Payload, RequestId, StreamError};
