//! HTTP/1.1 requests and responses as handed to the serializer.
//!
//! Rendering a message produces its head (start line, headers, blank line)
//! as one buffer and hands back the body. Framing headers are always
//! derived from the body: `Content-Length` for fixed bodies and
//! `Transfer-Encoding: chunked` for streams. Caller-supplied values for
//! either are replaced.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::body::Body;
use crate::error::{HttpError, HttpResult};
use crate::header::{is_token_byte, HeaderMap};

const VERSION: &str = "HTTP/1.1";

/// An outgoing request.
#[derive(Debug)]
pub struct Request {
    method: String,
    target: String,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_ref(&self) -> &Body {
        &self.body
    }
}

/// An outgoing response.
#[derive(Debug)]
pub struct Response {
    status: u16,
    reason: Option<String>,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Override the reason phrase. Without one, the canonical phrase for
    /// the status is used.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// 1xx, 204 and 304 responses never carry a body.
    fn forbids_body(&self) -> bool {
        matches!(self.status, 100..=199 | 204 | 304)
    }
}

/// Anything the serializer can write.
#[derive(Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn headers(&self) -> &HeaderMap {
        match self {
            Self::Request(request) => &request.headers,
            Self::Response(response) => &response.headers,
        }
    }

    /// Render the head and return it together with the body to send.
    pub fn into_parts(self) -> HttpResult<(Bytes, Body)> {
        let mut head = BytesMut::with_capacity(256);
        match self {
            Self::Request(mut request) => {
                write_request_line(&request.method, &request.target, &mut head)?;
                let framing = match request.body.len() {
                    // A request without a body needs no framing at all.
                    Some(0) => None,
                    Some(len) => Some(Framing::Length(len)),
                    None => Some(Framing::Chunked),
                };
                apply_framing(&mut request.headers, framing);
                finish_head(&request.headers, &mut head)?;
                Ok((head.freeze(), request.body))
            }
            Self::Response(mut response) => {
                write_status_line(response.status, response.reason.as_deref(), &mut head)?;
                let body = if response.forbids_body() {
                    if !response.body.is_empty() {
                        debug!(status = response.status, "dropping body of bodiless response");
                    }
                    apply_framing(&mut response.headers, None);
                    Body::Empty
                } else {
                    let framing = match response.body.len() {
                        Some(len) => Framing::Length(len),
                        None => Framing::Chunked,
                    };
                    apply_framing(&mut response.headers, Some(framing));
                    response.body
                };
                finish_head(&response.headers, &mut head)?;
                Ok((head.freeze(), body))
            }
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

enum Framing {
    Length(usize),
    Chunked,
}

fn apply_framing(headers: &mut HeaderMap, framing: Option<Framing>) {
    headers.remove("Content-Length");
    headers.remove("Transfer-Encoding");
    match framing {
        Some(Framing::Length(len)) => headers.insert("Content-Length", len.to_string()),
        Some(Framing::Chunked) => headers.insert("Transfer-Encoding", "chunked"),
        None => {}
    }
}

fn write_request_line(method: &str, target: &str, out: &mut BytesMut) -> HttpResult<()> {
    if method.is_empty() || !method.bytes().all(is_token_byte) {
        return Err(HttpError::InvalidStartLine(format!("bad method {method:?}")));
    }
    if target.is_empty() || target.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(HttpError::InvalidStartLine(format!("bad target {target:?}")));
    }
    out.put_slice(method.as_bytes());
    out.put_u8(b' ');
    out.put_slice(target.as_bytes());
    out.put_u8(b' ');
    out.put_slice(VERSION.as_bytes());
    out.put_slice(b"\r\n");
    Ok(())
}

fn write_status_line(status: u16, reason: Option<&str>, out: &mut BytesMut) -> HttpResult<()> {
    if !(100..=999).contains(&status) {
        return Err(HttpError::InvalidStartLine(format!("bad status {status}")));
    }
    let reason = reason.unwrap_or_else(|| canonical_reason(status));
    if reason.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(HttpError::InvalidStartLine(
            "reason phrase contains CR or LF".to_string(),
        ));
    }
    out.put_slice(format!("{VERSION} {status} {reason}\r\n").as_bytes());
    Ok(())
}

fn finish_head(headers: &HeaderMap, out: &mut BytesMut) -> HttpResult<()> {
    headers.write_to(out)?;
    out.put_slice(b"\r\n");
    Ok(())
}

fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Content Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}
