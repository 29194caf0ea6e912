//! Per-message middleware contract.
//!
//! # Lifecycle
//! ```text
//! start() → exec() per parsed message … → wait() → close()
//! ```
//! `close` is always called on shutdown, whatever happened before it.
//! What a middleware does to a message is its own business; the pipeline
//! only drives the lifecycle and routes failures to the error bus.

use std::sync::Arc;

use crate::lifecycle::Context;

/// Error returned by a middleware. Its text ends up on the error bus.
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// Rewrites or inspects each parsed message before it is published.
pub trait Middleware<M>: Send + Sync {
    fn start(&self) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Transform one message. `header` is the raw framing header the
    /// message was parsed from.
    fn exec(&self, ctx: &Context, header: &[u8], message: M) -> Result<M, MiddlewareError>;

    /// Block until the middleware's own background work has finished.
    fn wait(&self) -> Result<(), MiddlewareError> {
        Ok(())
    }

    fn close(&self) {}
}

/// Shared handle passed to every stream's format task.
pub type SharedMiddleware<M> = Arc<dyn Middleware<M>>;
