//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context as TaskContext, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::sync::mpsc;

use harvest::config::{FlowConfig, SessionConfig};
use harvest::flow::{
    BoxedReader, InputFormat, InputModifier, InputReader, Middleware, MiddlewareError, ModifierError, Out,
    SharedMiddleware, Source, StreamMeta, StreamReader,
};
use harvest::http::Message;
use harvest::lifecycle::{error_channel, ErrorReceiver};
use harvest::{Context, Error};

pub fn test_context() -> (Context, ErrorReceiver) {
    test_context_with(FlowConfig::default())
}

pub fn test_context_with(flow: FlowConfig) -> (Context, ErrorReceiver) {
    let (tx, rx) = error_channel();
    (Context::new(SessionConfig::default(), flow, tx), rx)
}

pub fn text_reader(id: &str, text: &'static str) -> BoxedReader {
    StreamReader::boxed(StreamMeta::new(id), text.as_bytes())
}

/// Everything currently queued on the error bus.
pub fn drain_errors(errors: &mut ErrorReceiver) -> Vec<Error> {
    let mut out = Vec::new();
    while let Ok(err) = errors.try_recv() {
        out.push(err);
    }
    out
}

/// Source fed through a channel; ends when every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<BoxedReader>,
}

impl ChannelSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<BoxedReader>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }

    /// A source that yields `readers` and then ends.
    pub fn from_readers(readers: Vec<BoxedReader>) -> Self {
        let (source, tx) = Self::new();
        for reader in readers {
            let _ = tx.send(reader);
        }
        source
    }
}

#[async_trait]
impl Source for ChannelSource {
    async fn next(&mut self) -> Option<Result<BoxedReader, Error>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Parses one unsigned integer per line.
pub struct LineFormat {
    tx: mpsc::Sender<u64>,
    out: Out<u64>,
}

impl LineFormat {
    pub fn new(ctx: &Context) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            tx,
            out: Out::new(rx, ctx.token().clone()),
        }
    }
}

#[async_trait]
impl InputFormat for LineFormat {
    type Item = u64;

    async fn init(&self, ctx: &Context, middleware: Option<SharedMiddleware<u64>>, reader: &mut BoxedReader) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(source) => {
                    ctx.report(Error::Io {
                        stream: "lines".into(),
                        source,
                    });
                    return;
                }
            };
            let Ok(mut n) = line.trim().parse::<u64>() else {
                ctx.report(Error::Malformed {
                    stream: "lines".into(),
                    reason: line,
                });
                return;
            };
            if let Some(mw) = &middleware {
                match mw.exec(ctx, line.as_bytes(), n) {
                    Ok(v) => n = v,
                    Err(e) => {
                        ctx.report(Error::Middleware {
                            stream: "lines".into(),
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                sent = self.tx.send(n) => if sent.is_err() { return },
            }
        }
    }

    fn out(&self) -> Out<u64> {
        self.out.clone()
    }
}

/// Panics on the first stream it is given.
pub struct PanickingFormat {
    out: Out<u64>,
}

impl PanickingFormat {
    pub fn new(ctx: &Context) -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self {
            out: Out::new(rx, ctx.token().clone()),
        }
    }
}

#[async_trait]
impl InputFormat for PanickingFormat {
    type Item = u64;

    async fn init(&self, _ctx: &Context, _middleware: Option<SharedMiddleware<u64>>, _reader: &mut BoxedReader) {
        panic!("format bug");
    }

    fn out(&self) -> Out<u64> {
        self.out.clone()
    }
}

/// Replays the whole stream a second time after it ends, so every
/// message is parsed twice.
#[derive(Default)]
pub struct DoublingModifier {
    pub close_err: Option<String>,
    pub closed: Arc<AtomicUsize>,
}

impl InputModifier for DoublingModifier {
    fn wrap(&self, reader: BoxedReader) -> Result<BoxedReader, ModifierError> {
        Ok(Box::new(DoublingReader {
            meta: reader.meta().clone(),
            inner: reader,
            recorded: Vec::new(),
            replaying: false,
            pos: 0,
            close_err: self.close_err.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct DoublingReader {
    meta: StreamMeta,
    inner: BoxedReader,
    recorded: Vec<u8>,
    replaying: bool,
    pos: usize,
    close_err: Option<String>,
    closed: Arc<AtomicUsize>,
}

impl AsyncRead for DoublingReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if !this.replaying {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
            let read = &buf.filled()[before..];
            if !read.is_empty() {
                this.recorded.extend_from_slice(read);
                return Poll::Ready(Ok(()));
            }
            this.replaying = true;
        }

        let rest = &this.recorded[this.pos..];
        let n = rest.len().min(buf.remaining());
        buf.put_slice(&rest[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl InputReader for DoublingReader {
    fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close()?;
        match &self.close_err {
            Some(reason) => Err(io::Error::other(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Always fails to wrap.
pub struct ErrModifier {
    pub reason: String,
}

impl InputModifier for ErrModifier {
    fn wrap(&self, reader: BoxedReader) -> Result<BoxedReader, ModifierError> {
        Err(ModifierError {
            reader,
            reason: self.reason.clone(),
        })
    }
}

/// Appends a tag to the request target and the response status.
pub struct TaggingMiddleware {
    pub tag: &'static str,
}

impl Middleware<Message> for TaggingMiddleware {
    fn exec(&self, _ctx: &Context, _header: &[u8], mut message: Message) -> Result<Message, MiddlewareError> {
        match &mut message {
            Message::Request(r) => {
                r.request_uri.push(' ');
                r.request_uri.push_str(self.tag);
            }
            Message::Response(r) => {
                r.status.push(' ');
                r.status.push_str(self.tag);
            }
        }
        Ok(message)
    }
}

/// Middleware whose `start` fails.
pub struct FailingStart;

impl Middleware<Message> for FailingStart {
    fn start(&self) -> Result<(), MiddlewareError> {
        Err("111".into())
    }

    fn exec(&self, _ctx: &Context, _header: &[u8], message: Message) -> Result<Message, MiddlewareError> {
        Ok(message)
    }
}

/// Counts the messages it lets through.
#[derive(Default)]
pub struct CountingMiddleware {
    pub seen: Arc<AtomicUsize>,
}

impl Middleware<Message> for CountingMiddleware {
    fn exec(&self, _ctx: &Context, _header: &[u8], message: Message) -> Result<Message, MiddlewareError> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(message)
    }
}
