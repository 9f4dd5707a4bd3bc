//! Minimal HTTP/1.0 framing
//!
//! Bounded line reader, request-line/header parsing, body reading under a size cap,
//! and the response writer. Works over any `embedded_io_async` stream.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use embedded_io_async::{Error as _, ErrorKind, Read, Write};
use serde::Serialize;

/// Longest accepted request line, CRLF excluded
pub const MAX_REQUEST_LINE: usize = 256;
/// Longest accepted header line, CRLF excluded
pub const MAX_HEADER_LINE: usize = 512;

const READ_BUFFER_SIZE: usize = 512;

/// Transport and framing faults. Apart from `BodyTooLarge` they end the connection
/// without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    Io(ErrorKind),
    /// Peer closed before the request was complete
    ConnectionClosed,
    LineTooLong,
    MalformedRequestLine,
    MalformedHeader,
    /// Declared body exceeds the route's limit
    BodyTooLarge { declared: usize, limit: usize },
    /// Status line and headers did not fit the response head buffer
    HeadTooLong,
}

impl HttpError {
    fn io<E: embedded_io_async::Error>(error: E) -> Self {
        HttpError::Io(error.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    /// Target with the query string removed
    pub path: heapless::String<MAX_REQUEST_LINE>,
}

/// Parse `METHOD SP target SP version`
pub fn parse_request_line(line: &[u8]) -> Result<RequestLine, HttpError> {
    let text = core::str::from_utf8(line).map_err(|_| HttpError::MalformedRequestLine)?;
    let mut parts = text.split_ascii_whitespace();
    let (Some(method), Some(target), Some(_version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::MalformedRequestLine);
    };

    let target = target.split('?').next().unwrap_or(target);
    let mut path = heapless::String::new();
    path.push_str(target)
        .map_err(|_| HttpError::MalformedRequestLine)?;

    Ok(RequestLine {
        method: Method::parse(method),
        path,
    })
}

/// `Some(length)` when the line is a Content-Length header
pub fn parse_content_length(line: &[u8]) -> Result<Option<usize>, HttpError> {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return Ok(None);
    };
    let (name, value) = (&line[..colon], &line[colon + 1..]);
    if !name.trim_ascii().eq_ignore_ascii_case(b"content-length") {
        return Ok(None);
    }

    core::str::from_utf8(value.trim_ascii())
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .map(Some)
        .ok_or(HttpError::MalformedHeader)
}

/// Buffered reader over one connection
pub struct RequestReader<'c, C> {
    conn: &'c mut C,
    buf: [u8; READ_BUFFER_SIZE],
    start: usize,
    end: usize,
}

impl<'c, C: Read> RequestReader<'c, C> {
    pub fn new(conn: &'c mut C) -> Self {
        Self {
            conn,
            buf: [0; READ_BUFFER_SIZE],
            start: 0,
            end: 0,
        }
    }

    /// Hand the connection back for writing the response
    pub fn into_inner(self) -> &'c mut C {
        self.conn
    }

    /// Refill the (fully consumed) buffer, returning the number of bytes read
    async fn refill(&mut self) -> Result<usize, HttpError> {
        self.start = 0;
        self.end = 0;
        let n = self.conn.read(&mut self.buf).await.map_err(HttpError::io)?;
        self.end = n;
        Ok(n)
    }

    fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Read one line into `line`, stripping the line terminator
    pub async fn read_line<const N: usize>(
        &mut self,
        line: &mut heapless::Vec<u8, N>,
    ) -> Result<(), HttpError> {
        line.clear();
        loop {
            while self.start < self.end {
                let byte = self.buf[self.start];
                self.start += 1;
                if byte == b'\n' {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Ok(());
                }
                line.push(byte).map_err(|_| HttpError::LineTooLong)?;
            }
            if self.refill().await? == 0 {
                return Err(HttpError::ConnectionClosed);
            }
        }
    }

    /// Read the request body.
    ///
    /// With a declared length the body is read completely, or rejected without reading
    /// when it exceeds `limit`. Without one, the body is whatever a single read
    /// delivers, capped at `limit`.
    pub async fn read_body(
        &mut self,
        content_length: Option<usize>,
        limit: usize,
    ) -> Result<Vec<u8>, HttpError> {
        let wanted = match content_length {
            Some(declared) if declared > limit => {
                return Err(HttpError::BodyTooLarge { declared, limit });
            }
            Some(declared) => declared,
            None => {
                if self.buffered() == 0 {
                    self.refill().await?;
                }
                let take = self.buffered().min(limit);
                let body = self.buf[self.start..self.start + take].to_vec();
                self.start += take;
                return Ok(body);
            }
        };

        let mut body = Vec::with_capacity(wanted);
        while body.len() < wanted {
            if self.buffered() == 0 && self.refill().await? == 0 {
                return Err(HttpError::ConnectionClosed);
            }
            let take = self.buffered().min(wanted - body.len());
            body.extend_from_slice(&self.buf[self.start..self.start + take]);
            self.start += take;
        }
        Ok(body)
    }
}

/// Response status codes used by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    PayloadTooLarge,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::PayloadTooLarge => 413,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::InternalServerError => "Internal Server Error",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
    detail: &'a str,
}

/// Status plus optional JSON body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: Option<String>,
}

impl Response {
    pub fn json<T: Serialize>(status: Status, payload: &T) -> Self {
        match serde_json::to_string(payload) {
            Ok(body) => Self {
                status,
                body: Some(body),
            },
            Err(_) => Self::error(
                Status::InternalServerError,
                "serialization",
                "response could not be encoded",
            ),
        }
    }

    /// `{"error": kind, "detail": detail}`
    pub fn error(status: Status, kind: &str, detail: &str) -> Self {
        let body = serde_json::to_string(&ErrorPayload {
            error: kind,
            detail,
        })
        .unwrap_or_default();
        Self {
            status,
            body: Some(body),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            body: None,
        }
    }
}

/// Room for the longest status line, both JSON headers and the blank line
const RESPONSE_HEAD_CAPACITY: usize = 128;

/// Write status line, headers and body, then flush
pub async fn write_response<C: Write>(conn: &mut C, response: &Response) -> Result<(), HttpError> {
    let mut head: heapless::String<RESPONSE_HEAD_CAPACITY> = heapless::String::new();
    let status = response.status;
    write!(head, "HTTP/1.0 {} {}\r\n", status.code(), status.reason())
        .map_err(|_| HttpError::HeadTooLong)?;
    if let Some(body) = &response.body {
        write!(
            head,
            "Content-Type: application/json\r\nContent-Length: {}\r\n",
            body.len()
        )
        .map_err(|_| HttpError::HeadTooLong)?;
    }
    head.push_str("\r\n").map_err(|_| HttpError::HeadTooLong)?;

    conn.write_all(head.as_bytes()).await.map_err(HttpError::io)?;
    if let Some(body) = &response.body {
        conn.write_all(body.as_bytes()).await.map_err(HttpError::io)?;
    }
    conn.flush().await.map_err(HttpError::io)
}
