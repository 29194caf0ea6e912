//! harvest: HTTP traffic capture to HAR.
//!
//! # Architecture Overview
//!
//! ```text
//!   capture files ──▶ FileSource ──▶ Input (+ modifiers) ──▶ HttpFormat (+ middleware)
//!                                                                 │ Out()
//!                                                                 ▼
//!   archive.har ◀── HAR document ◀── Correlator ◀──────────── Har::input()
//!
//!   Context: one cancellation signal + one error bus, shared by every stage
//! ```
//!
//! The run ends when every input file has been parsed (or on Ctrl+C). The
//! archive is written once, after the pipeline has drained.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use harvest::config::{load_config, HarvestConfig};
use harvest::flow::{FileSource, Input, InputModifiers, LimitModifier, Pipeline};
use harvest::http::{Har, HttpFormat};
use harvest::lifecycle::{error_channel, signals, Context, ErrorReceiver};
use harvest::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Reconstruct HTTP exchanges from captured streams and write a HAR archive", long_about = None)]
struct Cli {
    /// Captured connection streams, one file per connection.
    #[arg(short, long, num_args = 1.., required = true)]
    input: Vec<PathBuf>,

    /// Archive destination; `-` writes to stdout.
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Optional TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `flow.http_timeout_ms`.
    #[arg(long)]
    http_timeout_ms: Option<u64>,

    /// Read at most this many bytes from each stream.
    #[arg(long)]
    max_stream_bytes: Option<u64>,

    /// Debug logging, including full messages.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HarvestConfig::default(),
    };
    if let Some(ms) = cli.http_timeout_ms {
        config.flow.http_timeout_ms = ms;
    }
    if cli.debug {
        config.session.debug = true;
        config.session.debug_http_messages = true;
        config.observability.log_level = "debug".to_string();
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "harvest starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let (errors_tx, errors_rx) = error_channel();
    let ctx = Context::new(config.session, config.flow, errors_tx);
    tracing::info!(
        session_id = ctx.session_id(),
        inputs = cli.input.len(),
        http_timeout_ms = ctx.flow.http_timeout_ms,
        "Configuration loaded"
    );

    tokio::spawn(signals::cancel_on_ctrl_c(ctx.clone()));
    let error_log = tokio::spawn(log_errors(errors_rx));

    let mut modifiers: InputModifiers = Vec::new();
    if let Some(limit) = cli.max_stream_bytes {
        modifiers.push(Arc::new(LimitModifier::new(limit)));
    }

    let input = Input::new(FileSource::new(cli.input), modifiers, HttpFormat::new(&ctx));
    let pipeline = Pipeline::new(input, Har::new(&ctx), None);

    if cli.output == "-" {
        pipeline.run(&ctx, tokio::io::stdout()).await;
    } else {
        let file = tokio::fs::File::create(&cli.output).await?;
        pipeline.run(&ctx, file).await;
    }

    // Every stage holding a sender is done; the bus closes once `ctx` goes.
    drop(ctx);
    let (failures, diagnostics) = error_log.await.unwrap_or((0, 0));

    tracing::info!(failures, diagnostics, "Capture complete");
    Ok(())
}

/// The single consumer of the error bus. Errors were already logged where
/// they were reported; this only tallies them.
async fn log_errors(mut errors: ErrorReceiver) -> (usize, usize) {
    let (mut failures, mut diagnostics) = (0, 0);
    while let Some(err) = errors.recv().await {
        if err.is_diagnostic() {
            diagnostics += 1;
        } else {
            failures += 1;
        }
        tracing::trace!(stage = err.stage(), "Error drained");
    }
    (failures, diagnostics)
}
