//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! captured stream bytes
//!     → parser.rs (HTTP/1.x framing, heads via httparse)
//!     → format.rs (HttpFormat: middleware, publish to Out)
//!     → har.rs (forward into the correlator)
//!     → correlator.rs (per-connection FIFO matching, timeouts)
//!     → har.rs (exchange → entry, one JSON document at shutdown)
//! ```

pub mod cookie;
pub mod correlator;
pub mod format;
pub mod har;
pub mod message;
pub mod parser;

pub use correlator::{Correlator, CorrelatorHandle};
pub use format::HttpFormat;
pub use har::{Har, HarDocument, HarEntry};
pub use message::{Envelope, Exchange, Message, Request, Response, Values};
