// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use sha2::{Digest, Sha256};

use super::defaults::{
    DEFAULT_BUFFER_LIMIT, DEFAULT_CANCEL_PATH, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_MAILBOX_CAPACITY, DEFAULT_STREAM_PATH, REQUEST_ID_PLACEHOLDER,
};
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a searchstream config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute the SHA256 fingerprint
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version and limits
/// 5. Resolve variable interpolation in transport strings
/// 6. Build the typed Config
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let fingerprint = compute_fingerprint(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.searchstream != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.searchstream
        )));
    }

    let controller = build_controller_config(raw.controller)?;
    let transport = raw.transport.map(build_transport_config).transpose()?;

    Ok(Config {
        version: raw.searchstream,
        environment: raw.environment.unwrap_or_default(),
        controller,
        transport,
        fingerprint,
    })
}

pub fn compute_fingerprint(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

fn build_controller_config(
    raw: Option<raw::RawControllerConfig>,
) -> Result<ControllerConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ControllerConfig::default());
    };

    let mailbox_capacity = raw.mailbox_capacity.unwrap_or(DEFAULT_MAILBOX_CAPACITY);
    if mailbox_capacity == 0 {
        return Err(ConfigError::Validation(
            "controller mailbox_capacity must be >= 1".into(),
        ));
    }

    let max_buffer_bytes = raw.max_buffer_bytes.unwrap_or(DEFAULT_BUFFER_LIMIT);
    if max_buffer_bytes == 0 {
        return Err(ConfigError::Validation(
            "controller max_buffer_bytes must be > 0".into(),
        ));
    }

    Ok(ControllerConfig {
        mailbox_capacity,
        max_buffer_bytes,
    })
}

fn build_transport_config(raw: raw::RawTransportConfig) -> Result<TransportConfig, ConfigError> {
    let base_url = resolve_variables(&raw.base_url)?;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "transport base_url \"{base_url}\" must start with http:// or https://"
        )));
    }
    let base_url = base_url.trim_end_matches('/').to_string();

    let stream_path = match raw.stream_path {
        Some(path) => resolve_variables(&path)?,
        None => DEFAULT_STREAM_PATH.to_string(),
    };
    validate_path("stream_path", &stream_path)?;

    let cancel_path = match raw.cancel_path {
        Some(path) => resolve_variables(&path)?,
        None => DEFAULT_CANCEL_PATH.to_string(),
    };
    validate_path("cancel_path", &cancel_path)?;
    if !cancel_path.contains(REQUEST_ID_PLACEHOLDER) {
        return Err(ConfigError::Validation(format!(
            "transport cancel_path \"{cancel_path}\" must contain {REQUEST_ID_PLACEHOLDER}"
        )));
    }

    let auth_header = raw
        .auth_header
        .map(|value| resolve_variables(&value))
        .transpose()?;

    let connect_timeout_ms = raw.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
    if connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "transport connect_timeout_ms must be > 0".into(),
        ));
    }

    Ok(TransportConfig {
        base_url,
        stream_path,
        cancel_path,
        auth_header,
        connect_timeout: Duration::from_millis(connect_timeout_ms),
    })
}

fn validate_path(field: &str, path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "transport {field} \"{path}\" must start with '/'"
        )));
    }
    Ok(())
}
