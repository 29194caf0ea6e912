//! Error taxonomy shared by every pipeline stage.
//!
//! # Design Decisions
//! - Nothing here is run-fatal: stages report onto the error bus and the
//!   caller decides whether to cancel.
//! - Stream-local failures abort one stream; protocol anomalies are
//!   diagnostics and processing continues.

use thiserror::Error;

use crate::net::connection::ConnectionId;

/// Errors reported on the [`Context`](crate::lifecycle::Context) error bus.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading from a captured stream failed.
    #[error("stream {stream}: read failed: {source}")]
    Io {
        stream: String,
        #[source]
        source: std::io::Error,
    },

    /// A stream modifier could not wrap its input.
    #[error("stream {stream}: modifier failed: {reason}")]
    Modifier { stream: String, reason: String },

    /// Releasing a stream (or a modifier-produced wrapper) failed.
    #[error("stream {stream}: close failed: {source}")]
    Close {
        stream: String,
        #[source]
        source: std::io::Error,
    },

    /// Middleware rejected a message; parsing for the stream stops.
    #[error("stream {stream}: middleware failed: {reason}")]
    Middleware { stream: String, reason: String },

    /// A frame on the stream could not be parsed.
    #[error("stream {stream}: malformed message: {reason}")]
    Malformed { stream: String, reason: String },

    /// A response arrived with no pending request on its connection.
    #[error("orphan response on connection {connection} (status {status})")]
    OrphanResponse { connection: ConnectionId, status: u16 },

    /// Serializing an output document failed.
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    /// Writing an output document failed.
    #[error("failed to write output: {0}")]
    Write(#[source] std::io::Error),

    /// A single-use component was started twice.
    #[error("{0} already started")]
    AlreadyStarted(&'static str),
}

impl Error {
    /// Protocol anomalies are informational; processing continues past them.
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Error::Malformed { .. } | Error::OrphanResponse { .. })
    }

    /// Short label used for metrics and log fields.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Io { .. } => "read",
            Error::Modifier { .. } => "modifier",
            Error::Close { .. } => "close",
            Error::Middleware { .. } => "middleware",
            Error::Malformed { .. } => "parse",
            Error::OrphanResponse { .. } => "correlate",
            Error::Encode(_) | Error::Write(_) => "output",
            Error::AlreadyStarted(_) => "lifecycle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomalies_are_diagnostics() {
        let orphan = Error::OrphanResponse {
            connection: ConnectionId::new("c1"),
            status: 200,
        };
        assert!(orphan.is_diagnostic());
        assert_eq!(orphan.stage(), "correlate");

        let mw = Error::Middleware {
            stream: "s".into(),
            reason: "boom".into(),
        };
        assert!(!mw.is_diagnostic());
        assert!(mw.to_string().contains("boom"));
    }
}
