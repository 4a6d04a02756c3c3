// Raw YAML deserialization types (internal)
//
// Kept apart from the public config structs: interpolation, defaults and
// validation all happen between raw and typed.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub searchstream: String,
    pub environment: Option<String>,
    pub controller: Option<RawControllerConfig>,
    pub transport: Option<RawTransportConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawControllerConfig {
    pub mailbox_capacity: Option<usize>,
    pub max_buffer_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTransportConfig {
    pub base_url: String,
    pub stream_path: Option<String>,
    pub cancel_path: Option<String>,
    pub auth_header: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}
