//! HTTP/1.x framing over a captured byte stream.
//!
//! # Responsibilities
//! - Split a stream into message heads and bodies
//! - Tell requests from responses by their start line
//! - Decode `Content-Length`, chunked and read-to-close bodies
//!
//! # Design Decisions
//! - Heads are parsed with `httparse`; everything after the head is framed here
//! - A malformed frame ends the stream: there is no reliable resync point
//! - Declared body sizes are checked against a cap before anything is read,
//!   and buffers grow only with the bytes that actually arrive
//! - Header names are canonicalized so lookups and the HAR output are stable

use chrono::Utc;
use hyper::Uri;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::flow::reader::StreamMeta;
use crate::http::cookie::{parse_cookie_header, parse_set_cookie};
use crate::http::message::{canonical_header_key, header_value, Envelope, Message, Request, Response, Values};

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 128;
/// Body cap used unless the reader is given another one.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Malformed(String),
}

fn malformed(reason: impl Into<String>) -> ParseError {
    ParseError::Malformed(reason.into())
}

/// A parsed message together with the raw head it came from.
#[derive(Debug)]
pub struct Frame {
    pub head: Vec<u8>,
    pub message: Message,
}

/// Reads consecutive HTTP messages from one stream.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    meta: StreamMeta,
    max_body: usize,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R, meta: StreamMeta) -> Self {
        Self {
            reader: BufReader::new(reader),
            meta,
            max_body: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Reject bodies larger than `max_body` bytes.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// The next message, or `None` at a clean end of stream.
    pub async fn next(&mut self) -> Result<Option<Frame>, ParseError> {
        let head = match self.read_head().await? {
            Some(head) => head,
            None => return Ok(None),
        };
        let envelope = Envelope::new(&self.meta, Utc::now());

        let message = if head.starts_with(b"HTTP/") {
            let (mut response, framing) = parse_response_head(&head, envelope)?;
            let body = self.read_body(framing).await?;
            response.body_len = body.len();
            response.body = String::from_utf8_lossy(&body).into_owned();
            Message::Response(response)
        } else {
            let (mut request, framing) = parse_request_head(&head, envelope)?;
            let body = self.read_body(framing).await?;
            finish_request(&mut request, body);
            Message::Request(request)
        };

        Ok(Some(Frame { head, message }))
    }

    async fn read_head(&mut self) -> Result<Option<Vec<u8>>, ParseError> {
        let mut head = Vec::new();
        loop {
            let start = head.len();
            let n = self.reader.read_until(b'\n', &mut head).await?;
            if n == 0 {
                if head.is_empty() {
                    return Ok(None);
                }
                return Err(malformed("unexpected end of stream in message head"));
            }
            let line = &head[start..];
            let blank = line == b"\r\n" || line == b"\n";
            if blank && start == 0 {
                // Stray line breaks between messages.
                head.clear();
                continue;
            }
            if blank {
                return Ok(Some(head));
            }
            if head.len() > MAX_HEAD_BYTES {
                return Err(malformed("message head too large"));
            }
        }
    }

    async fn read_body(&mut self, framing: BodyFraming) -> Result<Vec<u8>, ParseError> {
        let mut body = Vec::new();
        match framing {
            BodyFraming::None => {}
            BodyFraming::Length(len) => {
                if len > self.max_body {
                    return Err(malformed(format!(
                        "Content-Length {} exceeds the {} byte body limit",
                        len, self.max_body
                    )));
                }
                self.read_exactly(&mut body, len).await?;
            }
            BodyFraming::Chunked => self.read_chunked(&mut body).await?,
            BodyFraming::UntilClose => {
                let limit = (self.max_body as u64).saturating_add(1);
                (&mut self.reader).take(limit).read_to_end(&mut body).await?;
                if body.len() > self.max_body {
                    return Err(malformed(format!("body exceeds the {} byte limit", self.max_body)));
                }
            }
        }
        Ok(body)
    }

    /// Append exactly `len` bytes to `buf`.
    async fn read_exactly(&mut self, buf: &mut Vec<u8>, len: usize) -> Result<(), ParseError> {
        let read = (&mut self.reader).take(len as u64).read_to_end(buf).await?;
        if read < len {
            return Err(malformed(format!(
                "stream ended {} bytes into a {} byte body",
                read, len
            )));
        }
        Ok(())
    }

    async fn read_chunked(&mut self, body: &mut Vec<u8>) -> Result<(), ParseError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(malformed("unexpected end of stream in chunked body"));
            }
            let size = line.trim().split(';').next().unwrap_or_default();
            let size = usize::from_str_radix(size.trim(), 16)
                .map_err(|_| malformed(format!("invalid chunk size {:?}", line.trim())))?;

            if size == 0 {
                // Trailers, up to the terminating blank line.
                loop {
                    line.clear();
                    let n = self.reader.read_line(&mut line).await?;
                    if n == 0 || line.trim().is_empty() {
                        return Ok(());
                    }
                }
            }

            match body.len().checked_add(size) {
                Some(total) if total <= self.max_body => {}
                _ => {
                    return Err(malformed(format!(
                        "chunked body exceeds the {} byte limit",
                        self.max_body
                    )))
                }
            }
            self.read_exactly(body, size).await?;

            line.clear();
            self.reader.read_line(&mut line).await?;
            if !line.trim().is_empty() {
                return Err(malformed("missing CRLF after chunk"));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    None,
    Length(usize),
    Chunked,
    UntilClose,
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Values {
    let mut values = Values::new();
    for h in headers {
        values
            .entry(canonical_header_key(h.name))
            .or_default()
            .push(String::from_utf8_lossy(h.value).trim().to_string());
    }
    values
}

fn is_chunked(header: &Values) -> bool {
    header
        .get("Transfer-Encoding")
        .map(|vals| vals.iter().any(|v| v.to_ascii_lowercase().contains("chunked")))
        .unwrap_or(false)
}

fn content_length(header: &Values) -> Result<Option<usize>, ParseError> {
    match header_value(header, "Content-Length") {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| malformed(format!("invalid Content-Length {:?}", v))),
        None => Ok(None),
    }
}

fn parse_request_head(head: &[u8], envelope: Envelope) -> Result<(Request, BodyFraming), ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(malformed("incomplete request head")),
        Err(e) => return Err(malformed(format!("request head: {}", e))),
    }

    let method = req.method.unwrap_or_default().to_string();
    let request_uri = req.path.unwrap_or_default().to_string();
    let url: Uri = request_uri
        .parse()
        .map_err(|e| malformed(format!("request target {:?}: {}", request_uri, e)))?;
    let minor = req.version.unwrap_or(1);
    let header = collect_headers(req.headers);

    let (framing, content_length) = if is_chunked(&header) {
        (BodyFraming::Chunked, -1)
    } else {
        match content_length(&header)? {
            Some(0) | None => (BodyFraming::None, 0),
            Some(len) => (BodyFraming::Length(len), len as i64),
        }
    };

    let cookies = header
        .get("Cookie")
        .map(|vals| vals.iter().flat_map(|v| parse_cookie_header(v)).collect())
        .unwrap_or_default();

    let request = Request {
        envelope,
        method,
        url,
        request_uri,
        proto: format!("HTTP/1.{}", minor),
        proto_major: 1,
        proto_minor: minor,
        header,
        cookies,
        mime_type: String::new(),
        body: String::new(),
        body_len: 0,
        content_length,
        post_form: None,
        response: None,
    };
    Ok((request, framing))
}

fn finish_request(request: &mut Request, body: Vec<u8>) {
    request.mime_type = match header_value(&request.header, "Content-Type") {
        Some(ct) => ct.to_string(),
        None => sniff_content_type(&body).to_string(),
    };

    if request.method == "POST" && request.mime_type.starts_with(FORM_CONTENT_TYPE) {
        let mut form = Values::new();
        for (k, v) in url::form_urlencoded::parse(&body) {
            form.entry(k.into_owned()).or_default().push(v.into_owned());
        }
        request.post_form = Some(form);
    }

    request.body_len = body.len();
    request.body = String::from_utf8_lossy(&body).into_owned();
}

fn sniff_content_type(body: &[u8]) -> &'static str {
    if std::str::from_utf8(body).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn parse_response_head(head: &[u8], envelope: Envelope) -> Result<(Response, BodyFraming), ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);
    match res.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(malformed("incomplete response head")),
        Err(e) => return Err(malformed(format!("response head: {}", e))),
    }

    let status_code = res.code.unwrap_or_default();
    let reason = res.reason.unwrap_or_default();
    let minor = res.version.unwrap_or(1);
    let header = collect_headers(res.headers);

    let bodiless = (100..200).contains(&status_code) || status_code == 204 || status_code == 304;
    let (framing, content_length) = if bodiless {
        (BodyFraming::None, 0)
    } else if is_chunked(&header) {
        (BodyFraming::Chunked, -1)
    } else {
        match content_length(&header)? {
            Some(len) => (BodyFraming::Length(len), len as i64),
            None => (BodyFraming::UntilClose, -1),
        }
    };

    let cookies = header
        .get("Set-Cookie")
        .map(|vals| vals.iter().filter_map(|v| parse_set_cookie(v)).collect())
        .unwrap_or_default();
    let location = header_value(&header, "Location").unwrap_or_default().to_string();

    let response = Response {
        envelope,
        status: format!("{} {}", status_code, reason).trim_end().to_string(),
        status_code,
        proto: format!("HTTP/1.{}", minor),
        proto_major: 1,
        proto_minor: minor,
        header,
        cookies,
        body: String::new(),
        body_len: 0,
        content_length,
        location,
    };
    Ok((response, framing))
}
