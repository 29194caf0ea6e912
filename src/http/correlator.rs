//! Request/response matching.
//!
//! # Data Flow
//! ```text
//! Message ──► messages() ──► matching loop ──► exchanges
//!                              │
//!                              ├─ Request:  enqueue on its connection, arm timer
//!                              ├─ Response: pop oldest request, disarm, emit complete
//!                              ├─ Expiry:   dequeue that request, emit incomplete
//!                              └─ Cancel:   drain inbox, emit every pending request incomplete
//! ```
//!
//! # Design Decisions
//! - All matching state is owned by one task; queues need no locks
//! - Responses pair with requests in FIFO order per connection (HTTP/1.1 pipelining)
//! - Timeouts run from the request's creation time, not from when it was enqueued
//! - The exchange stream closes only after every pending request was flushed

use std::collections::{HashMap, VecDeque};
use std::future::poll_fn;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::Instrument;

use crate::error::Error;
use crate::http::message::{Exchange, Message, Request, Response};
use crate::lifecycle::Context;
use crate::net::ConnectionId;
use crate::observability::metrics;

/// Default capacity of the inbound message channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Pairs requests with responses, per connection.
pub struct Correlator {
    messages: mpsc::Sender<Message>,
    inbox: mpsc::Receiver<Message>,
    timeout: Duration,
}

/// A running correlator.
#[derive(Debug)]
pub struct CorrelatorHandle {
    /// Complete and incomplete exchanges, in emission order. Closes once the
    /// matching loop has flushed everything after cancellation.
    pub exchanges: mpsc::UnboundedReceiver<Exchange>,
    pub task: JoinHandle<()>,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self::with_capacity(timeout, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(timeout: Duration, capacity: usize) -> Self {
        let (messages, inbox) = mpsc::channel(capacity.max(1));
        Self {
            messages,
            inbox,
            timeout,
        }
    }

    /// Sending side of the message channel.
    ///
    /// Take every sender needed before calling [`start`](Correlator::start);
    /// the loop drains until all of them are dropped.
    pub fn messages(&self) -> mpsc::Sender<Message> {
        self.messages.clone()
    }

    /// Spawn the matching loop. It runs until `ctx` is canceled.
    pub fn start(self, ctx: &Context) -> CorrelatorHandle {
        let Self {
            messages,
            inbox,
            timeout,
        } = self;
        drop(messages);

        let (outbox, exchanges) = mpsc::unbounded_channel();
        let ctx = ctx.component("correlator");
        let span = ctx.span().clone();
        let task = tokio::spawn(
            async move {
                let state = Matcher::new(timeout, outbox);
                run(ctx, inbox, state).await;
            }
            .instrument(span),
        );

        CorrelatorHandle { exchanges, task }
    }
}

async fn run(ctx: Context, mut inbox: mpsc::Receiver<Message>, mut state: Matcher) {
    tracing::debug!(timeout_ms = state.timeout.as_millis() as u64, "Correlator started");

    let mut open = true;
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            // Expired timers are handled before any newer message.
            Some(expired) = poll_fn(|cx| state.timers.poll_expired(cx)), if !state.timers.is_empty() => {
                let (connection, seq) = expired.into_inner();
                state.on_expired(&connection, seq);
            }
            msg = inbox.recv(), if open => match msg {
                Some(msg) => state.on_message(&ctx, msg),
                // Every producer is gone; only timers can still fire.
                None => open = false,
            },
        }
    }

    // Messages handed over before cancellation are still matched.
    let deadline = tokio::time::sleep(ctx.flow.drain_timeout());
    tokio::pin!(deadline);
    while open {
        tokio::select! {
            biased;
            msg = inbox.recv() => match msg {
                Some(msg) => state.on_message(&ctx, msg),
                None => break,
            },
            _ = &mut deadline => {
                tracing::debug!("Drain timeout reached, discarding late messages");
                break;
            }
        }
    }
    drop(inbox);

    let flushed = state.flush();
    tracing::debug!(flushed, "Correlator stopped");
}

struct Pending {
    seq: u64,
    key: delay_queue::Key,
    request: Request,
}

/// Matching state. Lives inside the loop task only.
struct Matcher {
    queues: HashMap<ConnectionId, VecDeque<Pending>>,
    timers: DelayQueue<(ConnectionId, u64)>,
    next_seq: u64,
    pending: usize,
    timeout: Duration,
    outbox: mpsc::UnboundedSender<Exchange>,
}

impl Matcher {
    fn new(timeout: Duration, outbox: mpsc::UnboundedSender<Exchange>) -> Self {
        Self {
            queues: HashMap::new(),
            timers: DelayQueue::new(),
            next_seq: 0,
            pending: 0,
            timeout,
            outbox,
        }
    }

    fn on_message(&mut self, ctx: &Context, msg: Message) {
        match msg {
            Message::Request(request) => self.enqueue(request),
            Message::Response(response) => self.on_response(ctx, response),
        }
    }

    fn enqueue(&mut self, request: Request) {
        let age = (Utc::now() - request.envelope.created)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self.timeout.saturating_sub(age);

        let connection = request.envelope.connection_id.clone();
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = self.timers.insert((connection.clone(), seq), remaining);
        self.queues
            .entry(connection)
            .or_default()
            .push_back(Pending { seq, key, request });
        self.set_pending(self.pending + 1);
    }

    fn on_response(&mut self, ctx: &Context, response: Response) {
        let connection = &response.envelope.connection_id;
        self.expire_overdue(connection);
        let Some(pending) = self.pop_front(connection) else {
            metrics::record_orphan_response();
            ctx.report(Error::OrphanResponse {
                connection: connection.clone(),
                status: response.status_code,
            });
            return;
        };

        self.timers.remove(&pending.key);
        self.emit(Exchange::complete(pending.request, response));
    }

    fn on_expired(&mut self, connection: &ConnectionId, seq: u64) {
        let Some(queue) = self.queues.get_mut(connection) else {
            return;
        };
        let Some(pos) = queue.iter().position(|p| p.seq == seq) else {
            return;
        };
        let expired = queue.remove(pos);
        if queue.is_empty() {
            self.queues.remove(connection);
        }

        if let Some(pending) = expired {
            tracing::debug!(connection_id = %connection, "Request timed out without response");
            self.set_pending(self.pending - 1);
            self.emit(Exchange::incomplete(pending.request));
        }
    }

    /// Emit the requests at the front of `connection`'s queue whose timeout
    /// has already passed, even if their timers have not been polled yet.
    fn expire_overdue(&mut self, connection: &ConnectionId) {
        let now = Utc::now();
        while let Some(front) = self.queues.get(connection).and_then(VecDeque::front) {
            let age = (now - front.request.envelope.created)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age < self.timeout {
                return;
            }
            let Some(pending) = self.pop_front(connection) else {
                return;
            };
            self.timers.remove(&pending.key);
            tracing::debug!(connection_id = %connection, "Request timed out without response");
            self.emit(Exchange::incomplete(pending.request));
        }
    }

    fn pop_front(&mut self, connection: &ConnectionId) -> Option<Pending> {
        let queue = self.queues.get_mut(connection)?;
        let pending = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(connection);
        }
        if pending.is_some() {
            self.set_pending(self.pending - 1);
        }
        pending
    }

    /// Emit every queued request as incomplete. Returns how many were emitted.
    fn flush(&mut self) -> usize {
        self.timers.clear();
        let queues = std::mem::take(&mut self.queues);
        let mut flushed = 0;
        for (_, queue) in queues {
            for pending in queue {
                self.emit(Exchange::incomplete(pending.request));
                flushed += 1;
            }
        }
        self.set_pending(0);
        flushed
    }

    fn emit(&self, exchange: Exchange) {
        metrics::record_exchange(exchange.is_complete());
        if self.outbox.send(exchange).is_err() {
            tracing::trace!("Exchange receiver dropped");
        }
    }

    fn set_pending(&mut self, pending: usize) {
        self.pending = pending;
        metrics::record_pending_requests(pending);
    }
}
