//! Parsed HTTP request representation.

use bytes::Bytes;
use std::fmt;
use std::time::Instant;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl Method {
    pub(crate) fn parse(token: &str) -> Option<Method> {
        let method = match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parsed request.
///
/// The reader hands one clone to the handler task and moves another into
/// the request slot, where the writer keeps it until the response has been
/// sent (or marked as failed) and the access log line was written. Cloning
/// is cheap where it matters: the body is a [`Bytes`] handle.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    headers: Vec<(String, String)>,
    pub body: Bytes,
    /// No further requests will be accepted on the connection after this
    /// one (`Connection: close`, or HTTP/1.0 without keep-alive).
    pub(crate) is_final: bool,
    pub(crate) received_at: Instant,
    pub(crate) start_send_time: Option<Instant>,
    pub(crate) finish_send_time: Option<Instant>,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        target: String,
        version: Version,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Self {
        let is_final = match find_header(&headers, "connection") {
            Some(value) if value.eq_ignore_ascii_case("close") => true,
            Some(value) if value.eq_ignore_ascii_case("keep-alive") => false,
            // HTTP/1.0 closes by default, HTTP/1.1 keeps the connection.
            _ => version == Version::Http10,
        };
        Self {
            method,
            target,
            version,
            headers,
            body,
            is_final,
            received_at: Instant::now(),
            start_send_time: None,
            finish_send_time: None,
        }
    }

    /// The request target without its query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// The query string, if any, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Case-insensitive header lookup, returning the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Whether this is the last request the connection will accept.
    pub fn is_final(&self) -> bool {
        self.is_final
    }
}

fn find_header<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
