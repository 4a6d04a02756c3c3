use std::time::Duration;

use super::defaults::{DEFAULT_BUFFER_LIMIT, DEFAULT_MAILBOX_CAPACITY};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated searchstream config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config format version. Always "v1".
    pub version: String,
    /// Environment label (e.g. "staging", "production").
    pub environment: String,
    pub controller: ControllerConfig,
    /// HTTP transport settings. Absent when the host feeds chunks itself.
    pub transport: Option<TransportConfig>,
    /// SHA256 of the raw YAML: "sha256:{hex}". Logged at startup to tell
    /// deployments apart.
    pub fingerprint: String,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Stream controller sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Bound of the controller command mailbox and notification channel.
    pub mailbox_capacity: usize,
    /// Largest undecoded remainder one request may hold.
    pub max_buffer_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_buffer_bytes: DEFAULT_BUFFER_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Chunked-HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Scheme and host, e.g. "https://search.example.com". No trailing slash.
    pub base_url: String,
    /// Path of the streaming search endpoint.
    pub stream_path: String,
    /// Path of the abandon endpoint; contains `{request_id}`.
    pub cancel_path: String,
    /// Value for the `Authorization` header, after interpolation.
    pub auth_header: Option<String>,
    pub connect_timeout: Duration,
}
