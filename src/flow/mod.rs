//! Generic capture pipeline plumbing.
//!
//! # Data Flow
//! ```text
//! source.rs  (Source: one BoxedReader per captured connection)
//!     → reader.rs (InputModifier chain, left to right)
//!     → input.rs  (one task per stream, InputFormat::init)
//!     → middleware.rs (per message, before publishing)
//!     → out.rs    (Out(): lazy in-order sequence)
//!     → output.rs (OutputFormat: one document at shutdown)
//! pipeline.rs wires all of the above for one run.
//! ```
//!
//! Nothing in here knows about HTTP; see [`crate::http`] for the format,
//! the correlator and the HAR writer.

pub mod input;
pub mod middleware;
pub mod out;
pub mod output;
pub mod pipeline;
pub mod reader;
pub mod source;

pub use input::{Input, InputFormat};
pub use middleware::{Middleware, MiddlewareError, SharedMiddleware};
pub use out::Out;
pub use output::{Completion, CompletionSender, OutputFormat, OutputWriter};
pub use pipeline::Pipeline;
pub use reader::{
    BoxedReader, InputModifier, InputModifiers, InputReader, LimitModifier, ModifierError,
    StreamMeta, StreamReader,
};
pub use source::{FileSource, Source};
