// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads searchstream.yaml, validates limits and paths, resolves variable
// interpolation, and computes a deterministic fingerprint.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use defaults::{
    DEFAULT_CANCEL_PATH, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAILBOX_CAPACITY,
    DEFAULT_STREAM_PATH, REQUEST_ID_PLACEHOLDER,
};
pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::{compute_fingerprint, load_config};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::{Config, ControllerConfig, TransportConfig};
