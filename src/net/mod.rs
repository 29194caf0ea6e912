//! Connection identity.
//!
//! Captured streams are keyed by the connection they were observed on.
//! Everything downstream (correlation, HAR `connection` field) groups by
//! that key, so it must stay stable for the life of the connection.

pub mod connection;

pub use connection::{ConnectionId, StreamTracker};
