//! Run-scoped cancellation, error bus and configuration.
//!
//! Every concurrent stage holds a [`Context`]. Its main loop selects between
//! "new work available" and [`Context::cancelled`]; once cancellation is
//! observed the stage stops taking work, releases what it owns and returns.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::config::{FlowConfig, SessionConfig};
use crate::error::Error;
use crate::observability::metrics;

/// Sending half of the error bus.
pub type ErrorSender = mpsc::UnboundedSender<Error>;

/// Receiving half of the error bus. There is exactly one per run.
pub type ErrorReceiver = mpsc::UnboundedReceiver<Error>;

/// Create the error bus for a run.
///
/// The bus is unbounded so that no stage ever blocks reporting a failure,
/// including while the run is shutting down.
pub fn error_channel() -> (ErrorSender, ErrorReceiver) {
    mpsc::unbounded_channel()
}

/// Cancellation token, error bus and shared configuration for one run.
///
/// Cloning is cheap. Clones and [`component`](Context::component)-derived
/// contexts share one cancellation signal and one error bus, so a single
/// [`cancel`](Context::cancel) stops all of them.
#[derive(Debug, Clone)]
pub struct Context {
    /// Run-wide debug switches.
    pub config: Arc<SessionConfig>,
    /// Pipeline timing and buffering.
    pub flow: Arc<FlowConfig>,
    session_id: Arc<str>,
    errors: ErrorSender,
    cancel: CancellationToken,
    span: Span,
}

impl Context {
    /// Build the root context for a run.
    pub fn new(config: SessionConfig, flow: FlowConfig, errors: ErrorSender) -> Self {
        let session_id: Arc<str> = uuid::Uuid::new_v4().to_string().into();
        let span = tracing::info_span!("session", session_id = %session_id);
        Self {
            config: Arc::new(config),
            flow: Arc::new(flow),
            session_id,
            errors,
            cancel: CancellationToken::new(),
            span,
        }
    }

    /// Derive a context for one component of the pipeline.
    ///
    /// The derived context logs under a child span tagged with `name`.
    pub fn component(&self, name: &'static str) -> Self {
        let span = tracing::debug_span!(parent: &self.span, "component", component = name);
        Self {
            span,
            ..self.clone()
        }
    }

    /// Signal cancellation. Idempotent and safe to call from any task.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(parent: &self.span, "Cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Whether cancellation has been signaled. Never resets.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once cancellation has been signaled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The underlying token, for handing to APIs that take one directly.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report an error on the bus. Never blocks.
    pub fn report(&self, err: Error) {
        metrics::record_error(err.stage());
        if err.is_diagnostic() {
            tracing::debug!(parent: &self.span, error = %err, "Protocol anomaly");
        } else {
            tracing::warn!(parent: &self.span, error = %err, "Stream error");
        }
        if let Err(mpsc::error::SendError(err)) = self.errors.send(err) {
            tracing::error!(parent: &self.span, error = %err, "Error bus closed, dropping error");
        }
    }

    /// Span that tasks spawned for this context should run in.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
