//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a capture run.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HarvestConfig {
    /// Run-wide debug switches.
    pub session: SessionConfig,

    /// Pipeline timing and buffering.
    pub flow: FlowConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Static per-run switches carried by every [`Context`](crate::lifecycle::Context).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Enable debug-level pipeline logging.
    pub debug: bool,

    /// Include full message bodies in debug logs.
    pub debug_http_messages: bool,
}

/// Pipeline timing and buffering.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowConfig {
    /// How long a request waits for its response before it is emitted
    /// as an incomplete exchange, in milliseconds.
    pub http_timeout_ms: u64,

    /// Upper bound on draining stage inboxes after cancellation, in milliseconds.
    pub drain_timeout_ms: u64,

    /// Capacity of the bounded channels between stages.
    pub buffer_size: usize,

    /// Largest message body accepted from a stream, in bytes. Larger
    /// bodies are reported as malformed and end the stream.
    pub max_body_bytes: usize,
}

impl FlowConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: 30_000,
            drain_timeout_ms: 1_000,
            buffer_size: 1024,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
