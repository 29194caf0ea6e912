//! Output format contract.

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};

use crate::lifecycle::Context;

/// Destination a format writes its document to.
pub type OutputWriter = dyn AsyncWrite + Send + Unpin;

/// Consumes items and writes one document when the run ends.
#[async_trait]
pub trait OutputFormat: Send + 'static {
    type Item: Send + 'static;

    /// Where upstream stages send items.
    fn input(&self) -> mpsc::Sender<Self::Item>;

    /// Run until `ctx` is canceled, then write the document to `writer`
    /// exactly once and signal [`complete`](OutputFormat::complete).
    async fn init(&mut self, ctx: &Context, writer: &mut OutputWriter);

    fn complete(&self) -> Completion;
}

/// One-shot completion signal of an output format.
#[derive(Debug, Clone)]
pub struct Completion(watch::Receiver<bool>);

impl Completion {
    /// Pair of signaling half and observer.
    pub fn channel() -> (CompletionSender, Completion) {
        let (tx, rx) = watch::channel(false);
        (CompletionSender(tx), Completion(rx))
    }

    pub fn is_complete(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the format has written its document.
    pub async fn wait(mut self) {
        // An error means the format was dropped; nothing left to wait for.
        let _ = self.0.wait_for(|done| *done).await;
    }
}

#[derive(Debug)]
pub struct CompletionSender(watch::Sender<bool>);

impl CompletionSender {
    pub fn signal(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> Completion {
        Completion(self.0.subscribe())
    }
}
