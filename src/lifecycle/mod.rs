//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Context (context.rs):
//!     created once per run → cloned/derived into every stage
//!     cancel() → every stage observes cancelled() → drains → returns
//!     stage errors → report() → error bus → single consumer
//!
//! Signals (signals.rs):
//!     SIGINT → cancel()
//! ```
//!
//! # Design Decisions
//! - Cancellation is one-shot and broadcast; it never resets
//! - The error bus never blocks a reporting stage

pub mod context;
pub mod signals;

pub use context::{error_channel, Context, ErrorReceiver, ErrorSender};
