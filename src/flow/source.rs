//! Producers of captured streams.
//!
//! # Responsibilities
//! - Hand out one [`BoxedReader`] per captured connection
//! - Stop producing once exhausted; the caller stops asking on cancellation

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Error;
use crate::flow::reader::{BoxedReader, StreamMeta, StreamReader};

/// A sequence of captured streams.
#[async_trait]
pub trait Source: Send {
    /// The next stream, or `None` once the source is exhausted.
    ///
    /// Must be cancel-safe: the caller races it against cancellation.
    async fn next(&mut self) -> Option<Result<BoxedReader, Error>>;
}

/// Treats each file as one recorded connection stream, keyed by its path.
#[derive(Debug, Default)]
pub struct FileSource {
    paths: VecDeque<PathBuf>,
}

impl FileSource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn next(&mut self) -> Option<Result<BoxedReader, Error>> {
        let path = self.paths.pop_front()?;
        let stream = path.display().to_string();

        let result = match tokio::fs::File::open(&path).await {
            Ok(file) => {
                tracing::debug!(path = %stream, "Opened capture file");
                Ok(StreamReader::boxed(StreamMeta::new(stream), file))
            }
            Err(source) => Err(Error::Io { stream, source }),
        };
        Some(result)
    }
}
