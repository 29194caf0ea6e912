//! Connection identity and stream lifetime tracking.
//!
//! # Responsibilities
//! - Derive a stable key for one observed connection
//! - Count captured streams that are still being parsed
//! - Record stream open/close for tracing and metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::observability::metrics;

/// Stable identifier grouping every message seen on one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap an already-stable key (a file path, a capture handle name).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the key from the observed client/server endpoints.
    pub fn from_endpoints(client: SocketAddr, server: SocketAddr) -> Self {
        Self(format!("{}->{}", client, server))
    }

    /// Get the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Tracks streams that are still being read.
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    active_count: Arc<AtomicU64>,
}

impl StreamTracker {
    /// Create a new stream tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active stream. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> StreamGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_streams(active);
        tracing::trace!(connection_id = %id, "Stream opened");
        StreamGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    /// Get current active stream count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks one stream's lifetime.
#[derive(Debug)]
pub struct StreamGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl StreamGuard {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_streams(active);
        tracing::trace!(connection_id = %self.id, "Stream closed");
    }
}
