//! HTTP Archive (HAR 1.2) output.
//!
//! # Data Flow
//! ```text
//! input() ──► forwarder ──► Correlator ──► consumer ──► HarLog.entries
//!                                                          │
//!                                         cancel ──► serialize once ──► writer
//! ```
//!
//! # Design Decisions
//! - The document is written once, at shutdown, never streamed
//! - Incomplete exchanges are archived with an empty response rather than dropped
//! - Field mapping follows <http://www.softwareishard.com/blog/har-12-spec/>

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::Error;
use crate::flow::output::{Completion, CompletionSender, OutputFormat, OutputWriter};
use crate::http::correlator::{Correlator, CorrelatorHandle};
use crate::http::cookie::Cookie;
use crate::http::message::{header_value, Exchange, Message, Request, Response, Values};
use crate::lifecycle::Context;

pub const HAR_VERSION: &str = "1.2";
pub const CREATOR_NAME: &str = "harvest";

/// HAR output format.
pub struct Har {
    /// Dropped once `init` starts, so the inbox closes with its last
    /// upstream sender.
    tx: Option<mpsc::Sender<Message>>,
    inbox: Option<mpsc::Receiver<Message>>,
    complete: CompletionSender,
}

impl Har {
    pub fn new(ctx: &Context) -> Self {
        let (tx, inbox) = mpsc::channel(ctx.flow.buffer_size.max(1));
        let (complete, _) = Completion::channel();
        Self {
            tx: Some(tx),
            inbox: Some(inbox),
            complete,
        }
    }
}

#[async_trait]
impl OutputFormat for Har {
    type Item = Message;

    /// A sender taken after `init` has started is already closed.
    fn input(&self) -> mpsc::Sender<Message> {
        match &self.tx {
            Some(tx) => tx.clone(),
            None => mpsc::channel(1).0,
        }
    }

    async fn init(&mut self, ctx: &Context, writer: &mut OutputWriter) {
        let ctx = ctx.component("har");
        let Some(inbox) = self.inbox.take() else {
            ctx.report(Error::AlreadyStarted("har output"));
            return;
        };
        self.tx = None;
        tracing::debug!(parent: ctx.span(), "HAR output started");

        let correlator = Correlator::with_capacity(ctx.flow.http_timeout(), ctx.flow.buffer_size);
        let messages = correlator.messages();
        let CorrelatorHandle {
            mut exchanges,
            task: correlator_task,
        } = correlator.start(&ctx);

        let forwarder = tokio::spawn(
            forward(ctx.clone(), inbox, messages).instrument(ctx.span().clone()),
        );

        let mut log = HarLog::new();
        while let Some(exchange) = exchanges.recv().await {
            let entry = HarEntry::from_exchange(&exchange);
            if ctx.config.debug_http_messages {
                tracing::debug!(parent: ctx.span(), entry = ?entry, "Adding entry");
            } else {
                tracing::debug!(parent: ctx.span(), url = %entry.request.url, "Adding entry");
            }
            log.entries.push(entry);
        }

        if let Err(e) = forwarder.await {
            tracing::error!(parent: ctx.span(), error = %e, "HAR forwarder failed");
        }
        if let Err(e) = correlator_task.await {
            tracing::error!(parent: ctx.span(), error = %e, "Correlator task failed");
        }

        let entries = log.entries.len();
        if let Err(e) = write_document(&HarDocument { log }, writer).await {
            ctx.report(e);
        } else {
            tracing::info!(parent: ctx.span(), entries, "HAR written");
        }
        self.complete.signal();
    }

    fn complete(&self) -> Completion {
        self.complete.subscribe()
    }
}

/// Pass messages on to the correlator until canceled, then keep handing
/// over until every upstream sender is gone or the drain timeout passes.
async fn forward(ctx: Context, mut inbox: mpsc::Receiver<Message>, messages: mpsc::Sender<Message>) {
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            msg = inbox.recv() => match msg {
                Some(msg) => {
                    if messages.send(msg).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
        }
    }

    let deadline = tokio::time::sleep(ctx.flow.drain_timeout());
    tokio::pin!(deadline);
    let mut handed = 0usize;
    loop {
        tokio::select! {
            biased;
            msg = inbox.recv() => match msg {
                Some(msg) => {
                    if messages.send(msg).await.is_err() {
                        return;
                    }
                    handed += 1;
                }
                None => break,
            },
            _ = &mut deadline => {
                tracing::debug!(handed, "Drain timeout reached, discarding late messages");
                return;
            }
        }
    }
    tracing::debug!(handed, "Forwarder drained");
}

async fn write_document(doc: &HarDocument, writer: &mut OutputWriter) -> Result<(), Error> {
    let mut bytes = serde_json::to_vec(doc)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await.map_err(Error::Write)?;
    writer.flush().await.map_err(Error::Write)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarDocument {
    pub log: HarLog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

impl HarLog {
    pub fn new() -> Self {
        Self {
            version: HAR_VERSION.to_string(),
            creator: HarCreator {
                name: CREATOR_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            entries: Vec::new(),
        }
    }
}

impl Default for HarLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: String,
    /// Round trip in milliseconds.
    pub time: i64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: HarCache,
    pub timings: HarTimings,
    #[serde(rename = "serverIPAddress", default, skip_serializing_if = "String::is_empty")]
    pub server_ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl HarEntry {
    pub fn from_exchange(exchange: &Exchange) -> Self {
        let req = &exchange.request;
        let (response, comment) = match exchange.response() {
            Some(resp) => (HarResponse::from_response(resp), None),
            None => (HarResponse::missing(), Some("incomplete".to_string())),
        };

        Self {
            started_date_time: req
                .envelope
                .created
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            time: exchange.round_trip_ms(),
            request: HarRequest::from_request(req),
            response,
            cache: HarCache {},
            timings: HarTimings::fixed(),
            server_ip_address: req.envelope.server_addr.clone(),
            connection: req.envelope.connection_id.to_string(),
            comment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarNameValue>,
    pub query_string: Vec<HarNameValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
    pub headers_size: i64,
    pub body_size: i64,
}

impl HarRequest {
    fn from_request(req: &Request) -> Self {
        Self {
            method: req.method.clone(),
            url: absolute_url(req),
            http_version: req.proto.clone(),
            cookies: req.cookies.iter().map(HarCookie::from).collect(),
            headers: name_value_pairs(&req.header),
            query_string: query_pairs(req),
            post_data: post_data(req),
            headers_size: -1,
            body_size: req.body_len as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarNameValue>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

impl HarResponse {
    fn from_response(resp: &Response) -> Self {
        let size = if resp.content_length >= 0 {
            resp.content_length
        } else {
            resp.body_len as i64
        };
        Self {
            status: resp.status_code,
            status_text: resp.status.clone(),
            http_version: resp.proto.clone(),
            cookies: resp.cookies.iter().map(HarCookie::from).collect(),
            headers: name_value_pairs(&resp.header),
            content: HarContent {
                size,
                mime_type: header_value(&resp.header, "Content-Type")
                    .unwrap_or_default()
                    .to_string(),
                text: resp.body.clone(),
            },
            redirect_url: resp.location.clone(),
            headers_size: -1,
            body_size: resp.body_len as i64,
        }
    }

    /// Placeholder for a request that never got a response.
    fn missing() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            http_version: String::new(),
            cookies: Vec::new(),
            headers: Vec::new(),
            content: HarContent::default(),
            redirect_url: String::new(),
            headers_size: -1,
            body_size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    /// RFC 3339, empty when the cookie carries no expiry.
    #[serde(default)]
    pub expires: String,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl From<&Cookie> for HarCookie {
    fn from(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            path: cookie.path.clone(),
            domain: cookie.domain.clone(),
            expires: cookie
                .expires
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            http_only: cookie.http_only,
            secure: cookie.secure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarNameValue {
    pub name: String,
    pub value: String,
}

/// `params` and `text` are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<HarNameValue>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

/// Always empty; nothing cache-related is observable from captured traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarCache {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarTimings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<i64>,
    pub send: i64,
    pub wait: i64,
    pub receive: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<i64>,
}

impl HarTimings {
    fn fixed() -> Self {
        Self {
            blocked: None,
            dns: None,
            connect: None,
            send: 1,
            wait: 1,
            receive: 1,
            ssl: None,
        }
    }
}

/// Scheme defaults to `http`; host defaults to the server address, with
/// `:port` when known.
fn absolute_url(req: &Request) -> String {
    let scheme = req.url.scheme_str().unwrap_or("http");
    let host = match req.url.authority() {
        Some(authority) => authority.as_str().to_string(),
        None if req.envelope.server_port.is_empty() => req.envelope.server_addr.clone(),
        None => format!("{}:{}", req.envelope.server_addr, req.envelope.server_port),
    };
    let path = req
        .url
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{}://{}{}", scheme, host, path)
}

/// One pair per value.
fn name_value_pairs(values: &Values) -> Vec<HarNameValue> {
    values
        .iter()
        .flat_map(|(name, vals)| {
            vals.iter().map(move |value| HarNameValue {
                name: name.clone(),
                value: value.clone(),
            })
        })
        .collect()
}

fn query_pairs(req: &Request) -> Vec<HarNameValue> {
    let Some(query) = req.url.query() else {
        return Vec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| HarNameValue {
            name: name.into_owned(),
            value: value.into_owned(),
        })
        .collect()
}

fn post_data(req: &Request) -> Option<HarPostData> {
    if req.method != "POST" {
        return None;
    }
    let mut post = HarPostData {
        mime_type: req.mime_type.clone(),
        params: Vec::new(),
        text: String::new(),
    };
    match &req.post_form {
        Some(form) => post.params = name_value_pairs(form),
        None => post.text = req.body.clone(),
    }
    Some(post)
}
