//! End-to-end wiring of one capture run.
//!
//! ```text
//! Source → Input (+ modifiers) → InputFormat (+ middleware) → Out()
//!     → OutputFormat::input() → OutputFormat::init → writer
//! ```
//!
//! The run ends when the source is exhausted and every parsed item has been
//! handed to the output, or earlier when the context is canceled. Either
//! way the context ends up canceled, the output writes its document, and
//! middleware is waited on and closed.

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::Error;
use crate::flow::input::{Input, InputFormat};
use crate::flow::middleware::SharedMiddleware;
use crate::flow::output::OutputFormat;
use crate::flow::source::Source;
use crate::lifecycle::Context;

pub struct Pipeline<S, F: InputFormat, O> {
    input: Input<S, F>,
    output: O,
    middleware: Option<SharedMiddleware<F::Item>>,
}

impl<S, F, O> Pipeline<S, F, O>
where
    S: Source,
    F: InputFormat,
    O: OutputFormat<Item = F::Item>,
{
    pub fn new(input: Input<S, F>, output: O, middleware: Option<SharedMiddleware<F::Item>>) -> Self {
        Self {
            input,
            output,
            middleware,
        }
    }

    /// Run to completion, writing the output document to `writer`.
    pub async fn run<W>(self, ctx: &Context, mut writer: W)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let Self {
            mut input,
            mut output,
            middleware,
        } = self;

        let started = match &middleware {
            Some(mw) => match mw.start() {
                Ok(()) => true,
                Err(e) => {
                    ctx.report(Error::Middleware {
                        stream: "*".into(),
                        reason: format!("start: {}", e),
                    });
                    // Nothing is parsed, but the output still writes its
                    // (empty) document.
                    ctx.cancel();
                    false
                }
            },
            None => true,
        };

        let completion = output.complete();
        let sink = output.input();

        let output_ctx = ctx.component("output");
        let output_task = tokio::spawn(
            async move {
                output.init(&output_ctx, &mut writer).await;
            }
            .instrument(ctx.span().clone()),
        );

        if started {
            feed(ctx, &mut input, middleware.clone(), &sink).await;
        }
        drop(sink);

        ctx.cancel();

        if let Err(e) = output_task.await {
            tracing::error!(error = %e, "Output task failed");
        }
        completion.wait().await;

        if let Some(mw) = &middleware {
            if started {
                if let Err(e) = mw.wait() {
                    ctx.report(Error::Middleware {
                        stream: "*".into(),
                        reason: format!("wait: {}", e),
                    });
                }
            }
            mw.close();
        }

        tracing::debug!(parent: ctx.span(), "Pipeline finished");
    }
}

/// Run the input and hand everything it publishes to `sink`. Returns once
/// every stream task has returned and everything published was handed over.
async fn feed<S, F>(
    ctx: &Context,
    input: &mut Input<S, F>,
    middleware: Option<SharedMiddleware<F::Item>>,
    sink: &mpsc::Sender<F::Item>,
) where
    S: Source,
    F: InputFormat,
{
    let out = input.format.out();
    let mut input_done = false;
    {
        let run_input = input.init(ctx, middleware);
        tokio::pin!(run_input);

        loop {
            tokio::select! {
                biased;
                _ = &mut run_input => {
                    input_done = true;
                    break;
                }
                item = out.next() => match item {
                    Some(item) => {
                        if !forward(sink, item).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        if !input_done {
            // Canceled, or the output went away, while streams were
            // still running; make sure they observe it and return.
            ctx.cancel();
            run_input.await;
        }
    }

    // Every stream task has returned, so whatever they published is
    // already buffered.
    let mut handed = 0usize;
    while let Some(item) = out.try_next() {
        if !forward(sink, item).await {
            tracing::warn!(parent: ctx.span(), handed, "Output closed before the input drained");
            return;
        }
        handed += 1;
    }
    tracing::debug!(parent: ctx.span(), handed, "Input drained");
}

async fn forward<T>(sink: &mpsc::Sender<T>, item: T) -> bool {
    sink.send(item).await.is_ok()
}
