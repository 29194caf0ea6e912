//! Capture HTTP traffic from raw connection streams and archive it as HAR.

pub mod config;
pub mod error;
pub mod flow;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::HarvestConfig;
pub use error::Error;
pub use lifecycle::Context;
