//! The lazy output sequence of an input format.

use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// In-order sequence of items published by a format.
///
/// Readers wait until an item is available or the run is canceled. Once
/// canceled, items already buffered are still handed out, then the
/// sequence ends for good.
///
/// Clones are handles to one sequence: each item goes to exactly one
/// reader. A run has a single reader, the pipeline.
pub struct Out<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    cancel: CancellationToken,
}

impl<T> Clone for Out<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Send + 'static> Out<T> {
    pub fn new(rx: mpsc::Receiver<T>, cancel: CancellationToken) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
            cancel,
        }
    }

    /// Wait for the next item. `None` once canceled and drained.
    pub async fn next(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        if self.cancel.is_cancelled() {
            return rx.try_recv().ok();
        }
        tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = self.cancel.cancelled() => rx.try_recv().ok(),
        }
    }

    /// Take an already-buffered item without waiting.
    pub fn try_next(&self) -> Option<T> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures_util::stream::unfold(self, |out| async move {
            let item = out.next().await?;
            Some((item, out))
        })
    }
}
