//! OS signal handling.
//!
//! Ctrl+C cancels the run context; the pipeline then drains and the
//! archive is written.

use crate::lifecycle::Context;

/// Cancel `ctx` on Ctrl+C. Returns early if the run is canceled another way.
pub async fn cancel_on_ctrl_c(ctx: Context) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to install Ctrl+C handler"),
            }
            ctx.cancel();
        }
        _ = ctx.cancelled() => {}
    }
}
