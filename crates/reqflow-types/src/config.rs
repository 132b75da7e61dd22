//! Global configuration types for reqflow.
//!
//! `GlobalConfig` represents the top-level `config.toml` in the data
//! directory: engine timeouts and scheduling limits, journal compression and
//! the HTTP client timeout.

use serde::{Deserialize, Serialize};

/// Top-level configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Per-invocation flow timeout in seconds.
    #[serde(default = "default_flow_timeout_secs")]
    pub flow_timeout_secs: u64,

    /// `Auto` mode runs `Single` at or below this many non-noop nodes.
    #[serde(default = "default_small_flow_threshold")]
    pub small_flow_threshold: usize,

    /// Worker bound for `Multi` mode (None = available parallelism).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Journal payloads larger than this are gzip-compressed.
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// Timeout for a single outbound HTTP request.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Status channel capacity per node.
    #[serde(default = "default_status_buffer_per_node")]
    pub status_buffer_per_node: usize,
}

fn default_flow_timeout_secs() -> u64 {
    60
}

fn default_small_flow_threshold() -> usize {
    8
}

fn default_compression_threshold_bytes() -> usize {
    1024
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_status_buffer_per_node() -> usize {
    4
}

/// Lower bound for status channel capacity.
pub const MIN_STATUS_BUFFER: usize = 16;

impl GlobalConfig {
    /// Worker count for `Multi` mode.
    pub fn workers(&self) -> usize {
        self.max_workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }

    /// Status channel capacity for a flow of `node_count` nodes.
    pub fn status_capacity(&self, node_count: usize) -> usize {
        node_count
            .saturating_mul(self.status_buffer_per_node)
            .max(MIN_STATUS_BUFFER)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            flow_timeout_secs: default_flow_timeout_secs(),
            small_flow_threshold: default_small_flow_threshold(),
            max_workers: None,
            compression_threshold_bytes: default_compression_threshold_bytes(),
            http_timeout_secs: default_http_timeout_secs(),
            status_buffer_per_node: default_status_buffer_per_node(),
        }
    }
}
