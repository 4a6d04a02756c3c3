// Default values applied when the YAML leaves a field out.

use crate::stream::DEFAULT_MAX_BUFFER_BYTES;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

pub const DEFAULT_BUFFER_LIMIT: usize = DEFAULT_MAX_BUFFER_BYTES;

pub const DEFAULT_STREAM_PATH: &str = "/api/default/_search_stream";

/// `{request_id}` is replaced with the id being abandoned.
pub const DEFAULT_CANCEL_PATH: &str = "/api/default/query_manager/{request_id}";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Placeholder substituted into `cancel_path`.
pub const REQUEST_ID_PLACEHOLDER: &str = "{request_id}";
