//! HTTP input format.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::flow::input::InputFormat;
use crate::flow::middleware::SharedMiddleware;
use crate::flow::out::Out;
use crate::flow::reader::BoxedReader;
use crate::http::message::Message;
use crate::http::parser::{Frame, MessageReader, ParseError};
use crate::lifecycle::Context;
use crate::observability::metrics;

/// Parses HTTP/1.x requests and responses from captured streams.
pub struct HttpFormat {
    tx: mpsc::Sender<Message>,
    out: Out<Message>,
}

impl HttpFormat {
    pub fn new(ctx: &Context) -> Self {
        let (tx, rx) = mpsc::channel(ctx.flow.buffer_size.max(1));
        Self {
            tx,
            out: Out::new(rx, ctx.token().clone()),
        }
    }
}

#[async_trait]
impl InputFormat for HttpFormat {
    type Item = Message;

    async fn init(
        &self,
        ctx: &Context,
        middleware: Option<SharedMiddleware<Message>>,
        reader: &mut BoxedReader,
    ) {
        let meta = reader.meta().clone();
        let stream = meta.connection_id.to_string();
        let mut messages = MessageReader::new(reader, meta).with_max_body(ctx.flow.max_body_bytes);

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                next = messages.next() => next,
            };

            let Frame { head, message } = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!(stream = %stream, "End of stream");
                    return;
                }
                Err(ParseError::Io(source)) => {
                    ctx.report(Error::Io { stream, source });
                    return;
                }
                Err(ParseError::Malformed(reason)) => {
                    ctx.report(Error::Malformed { stream, reason });
                    return;
                }
            };
            metrics::record_message_parsed(message.kind());

            let message = match &middleware {
                Some(mw) => match mw.exec(ctx, &head, message) {
                    Ok(message) => message,
                    Err(e) => {
                        ctx.report(Error::Middleware {
                            stream,
                            reason: e.to_string(),
                        });
                        return;
                    }
                },
                None => message,
            };

            if ctx.config.debug_http_messages {
                tracing::debug!(stream = %stream, message = ?message, "Parsed message");
            } else {
                tracing::debug!(stream = %stream, kind = message.kind(), "Parsed message");
            }

            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                permit = self.tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            permit.send(message);
        }
    }

    fn out(&self) -> Out<Message> {
        self.out.clone()
    }
}
