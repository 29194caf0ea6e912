//! Parsed HTTP messages and correlated exchanges.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hyper::Uri;

use crate::flow::reader::StreamMeta;
use crate::http::cookie::Cookie;
use crate::net::ConnectionId;

/// Header or form values keyed by name, each name holding one or more values.
pub type Values = BTreeMap<String, Vec<String>>;

/// Canonical MIME header form: `content-type` → `Content-Type`.
pub fn canonical_header_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// First value of header `name` (canonical form), if any.
pub fn header_value<'a>(header: &'a Values, name: &str) -> Option<&'a str> {
    header.get(name).and_then(|v| v.first()).map(String::as_str)
}

/// Metadata shared by requests and responses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// When the message was parsed.
    pub created: DateTime<Utc>,
    pub connection_id: ConnectionId,
    pub server_addr: String,
    pub server_port: String,
}

impl Envelope {
    pub fn new(meta: &StreamMeta, created: DateTime<Utc>) -> Self {
        Self {
            created,
            connection_id: meta.connection_id.clone(),
            server_addr: meta.server_addr.clone(),
            server_port: meta.server_port.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub envelope: Envelope,
    pub method: String,
    pub url: Uri,
    /// Request target exactly as it appeared on the request line.
    pub request_uri: String,
    pub proto: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    pub header: Values,
    pub cookies: Vec<Cookie>,
    pub mime_type: String,
    pub body: String,
    /// Body size in bytes as read off the wire.
    pub body_len: usize,
    /// `-1` when unknown.
    pub content_length: i64,
    /// Parsed body of an `application/x-www-form-urlencoded` POST.
    pub post_form: Option<Values>,
    /// Attached by the correlator, never before.
    pub response: Option<Box<Response>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub envelope: Envelope,
    /// Status line text after the protocol, e.g. `204 No Content`.
    pub status: String,
    pub status_code: u16,
    pub proto: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    pub header: Values,
    pub cookies: Vec<Cookie>,
    pub body: String,
    /// Body size in bytes as read off the wire.
    pub body_len: usize,
    /// `-1` when unknown.
    pub content_length: i64,
    /// Value of the `Location` header, empty when absent.
    pub location: String,
}

/// One parsed protocol unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Message::Request(r) => &r.envelope,
            Message::Response(r) => &r.envelope,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.envelope().connection_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.envelope().created
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
        }
    }
}

/// A request and, unless matching timed out, its response.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub request: Request,
}

impl Exchange {
    pub fn complete(mut request: Request, response: Response) -> Self {
        request.response = Some(Box::new(response));
        Self { request }
    }

    /// No response arrived in time (or before shutdown).
    pub fn incomplete(mut request: Request) -> Self {
        request.response = None;
        Self { request }
    }

    pub fn response(&self) -> Option<&Response> {
        self.request.response.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.request.response.is_some()
    }

    /// Response minus request creation time in milliseconds; zero when incomplete.
    pub fn round_trip_ms(&self) -> i64 {
        self.response()
            .map(|resp| {
                resp.envelope
                    .created
                    .signed_duration_since(self.request.envelope.created)
                    .num_milliseconds()
            })
            .unwrap_or(0)
    }
}
