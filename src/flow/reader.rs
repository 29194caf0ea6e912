//! Captured stream handles and stream-level modifiers.
//!
//! # Responsibilities
//! - Give every captured connection stream an identity and a close step
//! - Let modifiers wrap a stream before protocol parsing
//!
//! # Design Decisions
//! - Wrappers own what they wrap; closing the outermost reader closes the
//!   whole chain, innermost first
//! - A failing modifier hands the untouched reader back so the caller can
//!   still close it

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

use crate::net::ConnectionId;

/// Where a captured stream came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMeta {
    /// Stable key of the connection this stream belongs to.
    pub connection_id: ConnectionId,
    /// Server address as text, empty when unknown.
    pub server_addr: String,
    /// Server port as text, empty when unknown.
    pub server_port: String,
}

impl StreamMeta {
    pub fn new(connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            connection_id: connection_id.into(),
            server_addr: String::new(),
            server_port: String::new(),
        }
    }

    /// Metadata for a stream observed between `client` and `server`.
    pub fn from_endpoints(client: SocketAddr, server: SocketAddr) -> Self {
        Self {
            connection_id: ConnectionId::from_endpoints(client, server),
            server_addr: server.ip().to_string(),
            server_port: server.port().to_string(),
        }
    }
}

/// One captured connection's bytes.
pub trait InputReader: AsyncRead + Send + Unpin {
    fn meta(&self) -> &StreamMeta;

    /// Release the underlying resource. The pipeline calls this exactly once.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub type BoxedReader = Box<dyn InputReader>;

/// Adapts any [`AsyncRead`] into an [`InputReader`] with a no-op close.
pub struct StreamReader<R> {
    meta: StreamMeta,
    inner: R,
}

impl<R> StreamReader<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    pub fn new(meta: StreamMeta, inner: R) -> Self {
        Self { meta, inner }
    }

    pub fn boxed(meta: StreamMeta, inner: R) -> BoxedReader {
        Box::new(Self::new(meta, inner))
    }
}

impl<R: AsyncRead + Send + Unpin> AsyncRead for StreamReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R: AsyncRead + Send + Unpin> InputReader for StreamReader<R> {
    fn meta(&self) -> &StreamMeta {
        &self.meta
    }
}

/// A modifier that could not wrap its input.
pub struct ModifierError {
    /// The reader as it was passed in, still open.
    pub reader: BoxedReader,
    pub reason: String,
}

impl std::fmt::Debug for ModifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModifierError")
            .field("stream", &self.reader.meta().connection_id)
            .field("reason", &self.reason)
            .finish()
    }
}

/// Stream-level transform applied before protocol parsing.
///
/// A modifier may also expand one stream into several logical passes
/// (for example replaying its contents), in which case the format stage
/// parses each pass in turn.
pub trait InputModifier: Send + Sync {
    fn wrap(&self, reader: BoxedReader) -> Result<BoxedReader, ModifierError>;
}

/// Modifiers applied left to right.
pub type InputModifiers = Vec<Arc<dyn InputModifier>>;

/// Caps how many bytes of a stream reach the parser.
#[derive(Debug, Clone, Copy)]
pub struct LimitModifier {
    limit: u64,
}

impl LimitModifier {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl InputModifier for LimitModifier {
    fn wrap(&self, reader: BoxedReader) -> Result<BoxedReader, ModifierError> {
        if self.limit == 0 {
            return Err(ModifierError {
                reader,
                reason: "byte limit must be greater than zero".into(),
            });
        }
        Ok(Box::new(LimitedReader {
            inner: reader.take(self.limit),
        }))
    }
}

struct LimitedReader {
    inner: Take<BoxedReader>,
}

impl AsyncRead for LimitedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl InputReader for LimitedReader {
    fn meta(&self) -> &StreamMeta {
        self.inner.get_ref().meta()
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.get_mut().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limit_modifier_truncates() {
        let reader = StreamReader::boxed(StreamMeta::new("s1"), &b"abcdefgh"[..]);
        let mut wrapped = LimitModifier::new(3).wrap(reader).unwrap();

        let mut out = String::new();
        wrapped.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "abc");
        assert_eq!(wrapped.meta().connection_id.as_str(), "s1");
        assert!(wrapped.close().is_ok());
    }

    #[test]
    fn zero_limit_returns_reader() {
        let reader = StreamReader::boxed(StreamMeta::new("s1"), &b""[..]);
        let err = LimitModifier::new(0).wrap(reader).err().expect("expected zero limit to return the reader");
        assert_eq!(err.reader.meta().connection_id.as_str(), "s1");
    }

    #[test]
    fn meta_from_endpoints() {
        let meta = StreamMeta::from_endpoints(
            "10.0.0.1:4000".parse().unwrap(),
            "10.0.0.2:8080".parse().unwrap(),
        );
        assert_eq!(meta.server_addr, "10.0.0.2");
        assert_eq!(meta.server_port, "8080");
    }
}
