//! HTTP response representation and serialization.

use crate::request::Version;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Status codes produced by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    NoContent,
    BadRequest,
    NotFound,
    InternalServerError,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

/// A response travelling back to the peer.
///
/// Handlers build one with the constructors below. The writer owns the
/// delivery state: a response ends up either sent over the socket or marked
/// as failed, never both and never neither.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
    version: Version,
    keep_alive: bool,
    sent: bool,
    send_failed_at: Option<Instant>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            version: Version::Http11,
            keep_alive: true,
            sent: false,
            send_failed_at: None,
        }
    }

    pub fn with_body(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let mut response = Self::new(status);
        response.body = body.into();
        response
    }

    /// Appends a header. `Content-Length` and `Connection` are emitted by
    /// the serializer and must not be set here.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The generic response used when a handler crashed.
    pub(crate) fn internal_server_error() -> Self {
        Self::with_body(StatusCode::InternalServerError, "internal server error")
    }

    pub(crate) fn not_found() -> Self {
        Self::with_body(StatusCode::NotFound, "not found")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn send_failed(&self) -> bool {
        self.send_failed_at.is_some()
    }

    /// Records that this response will never be written, without touching
    /// the socket.
    pub(crate) fn set_send_failed(&mut self, at: Instant) {
        debug_assert!(!self.sent);
        self.send_failed_at = Some(at);
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Serializes the full response and writes it to `stream`, marking the
    /// response as sent once the bytes were flushed.
    pub(crate) async fn send<S>(&mut self, stream: &mut S) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let encoded = self.encode();
        stream.write_all(&encoded).await?;
        stream.flush().await?;
        self.sent = true;
        Ok(())
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128 + self.body.len());
        buf.put_slice(self.version.as_str().as_bytes());
        buf.put_slice(
            format!(" {} {}\r\n", self.status.code(), self.status.reason()).as_bytes(),
        );
        for (name, value) in &self.headers {
            buf.put_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        // Explicit framing only; chunked encoding is never produced.
        buf.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        match (self.version, self.keep_alive) {
            (_, false) => buf.put_slice(b"Connection: close\r\n"),
            // Keep-alive is the HTTP/1.1 default and goes unsaid.
            (Version::Http10, true) => buf.put_slice(b"Connection: keep-alive\r\n"),
            (Version::Http11, true) => {}
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_minimal_response() {
        let response = Response::with_body(StatusCode::Ok, "A");
        assert_eq!(&response.encode()[..], b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA");
    }

    #[test]
    fn encodes_close_and_custom_headers() {
        let mut response =
            Response::with_body(StatusCode::NotFound, "not found").header("X-Request-Id", "42");
        response.set_keep_alive(false);
        assert_eq!(
            &response.encode()[..],
            b"HTTP/1.1 404 Not Found\r\nX-Request-Id: 42\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found"
                as &[u8]
        );
    }

    #[test]
    fn http10_keep_alive_is_explicit() {
        let mut response = Response::new(StatusCode::NoContent);
        response.set_version(Version::Http10);
        assert_eq!(
            &response.encode()[..],
            b"HTTP/1.0 204 No Content\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n"
                as &[u8]
        );
    }

    #[tokio::test]
    async fn send_marks_response_sent() {
        let mut response = Response::with_body(StatusCode::Ok, "A");
        let mut stream = tokio_test::io::Builder::new()
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA")
            .build();

        assert!(!response.is_sent());
        response.send(&mut stream).await.unwrap();
        assert!(response.is_sent());
        assert!(!response.send_failed());
    }
}
