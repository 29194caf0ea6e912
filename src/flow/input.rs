//! Input orchestration: source → modifiers → format.
//!
//! # Responsibilities
//! - Pull captured streams from the [`Source`] until it ends or the run is canceled
//! - Run one task per stream: wrap with modifiers, parse with the format, close
//! - Keep stream failures local to their stream
//!
//! # Design Decisions
//! - The format is shared; every stream task publishes into its one `Out()`
//! - `Input::init` returns only after every stream task has returned

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::error::Error;
use crate::flow::middleware::SharedMiddleware;
use crate::flow::out::Out;
use crate::flow::reader::{BoxedReader, InputModifier, InputModifiers};
use crate::flow::source::Source;
use crate::lifecycle::Context;
use crate::net::connection::{StreamGuard, StreamTracker};

/// Parses framed messages out of one stream at a time.
#[async_trait]
pub trait InputFormat: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Parse `reader` until end of stream or cancellation, publishing every
    /// message (after `middleware`) on [`out`](InputFormat::out).
    ///
    /// Failures are reported on the context's error bus and end parsing for
    /// this stream only. The caller owns `reader` and closes it afterwards.
    async fn init(
        &self,
        ctx: &Context,
        middleware: Option<SharedMiddleware<Self::Item>>,
        reader: &mut BoxedReader,
    );

    fn out(&self) -> Out<Self::Item>;
}

/// Drives a format over every stream a source produces.
pub struct Input<S, F> {
    source: S,
    modifiers: Arc<InputModifiers>,
    pub format: Arc<F>,
    tracker: StreamTracker,
}

impl<S, F> Input<S, F>
where
    S: Source,
    F: InputFormat,
{
    pub fn new(source: S, modifiers: InputModifiers, format: F) -> Self {
        Self {
            source,
            modifiers: Arc::new(modifiers),
            format: Arc::new(format),
            tracker: StreamTracker::new(),
        }
    }

    /// Number of streams still being parsed.
    pub fn active_streams(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Consume the source until it ends or `ctx` is canceled, then wait for
    /// every stream task to return.
    pub async fn init(&mut self, ctx: &Context, middleware: Option<SharedMiddleware<F::Item>>) {
        let ctx = ctx.component("input");
        let mut streams = JoinSet::new();

        tracing::debug!(parent: ctx.span(), "init");

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                next = self.source.next() => next,
            };

            let reader = match next {
                Some(Ok(reader)) => reader,
                Some(Err(e)) => {
                    ctx.report(e);
                    continue;
                }
                None => {
                    tracing::debug!(parent: ctx.span(), "Source exhausted");
                    break;
                }
            };

            let id = reader.meta().connection_id.clone();
            let span = tracing::debug_span!(parent: ctx.span(), "stream", connection_id = %id);
            let guard = self.tracker.track(id);

            streams.spawn(
                run_stream(
                    ctx.clone(),
                    Arc::clone(&self.modifiers),
                    Arc::clone(&self.format),
                    middleware.clone(),
                    reader,
                    guard,
                )
                .instrument(span),
            );

            while let Some(joined) = streams.try_join_next() {
                log_join(joined);
            }
        }

        while let Some(joined) = streams.join_next().await {
            log_join(joined);
        }

        tracing::debug!(parent: ctx.span(), "All streams finished");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Stream task failed");
    }
}

async fn run_stream<F: InputFormat>(
    ctx: Context,
    modifiers: Arc<InputModifiers>,
    format: Arc<F>,
    middleware: Option<SharedMiddleware<F::Item>>,
    reader: BoxedReader,
    _guard: StreamGuard,
) {
    let stream = reader.meta().connection_id.to_string();
    let mut open = OpenStream {
        ctx: ctx.clone(),
        stream: stream.clone(),
        reader: Some(reader),
    };

    for modifier in modifiers.iter() {
        if let Err(reason) = open.wrap(modifier.as_ref()) {
            ctx.report(Error::Modifier { stream, reason });
            return;
        }
    }

    if let Some(reader) = open.reader.as_mut() {
        format.init(&ctx, middleware, reader).await;
    }
}

/// A stream's reader, closed exactly once when dropped, whichever way the
/// stream task ends.
struct OpenStream {
    ctx: Context,
    stream: String,
    reader: Option<BoxedReader>,
}

impl OpenStream {
    /// Wrap the reader; a failing modifier hands it back untouched.
    fn wrap(&mut self, modifier: &dyn InputModifier) -> Result<(), String> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        match modifier.wrap(reader) {
            Ok(wrapped) => {
                self.reader = Some(wrapped);
                Ok(())
            }
            Err(failed) => {
                self.reader = Some(failed.reader);
                Err(failed.reason)
            }
        }
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        let Some(mut reader) = self.reader.take() else {
            return;
        };
        if let Err(source) = reader.close() {
            self.ctx.report(Error::Close {
                stream: std::mem::take(&mut self.stream),
                source,
            });
        }
    }
}
