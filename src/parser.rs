//! Incremental HTTP/1.1 request parser.
//!
//! Bytes are fed in as they arrive from the socket; complete requests are
//! pulled out one at a time. A single read may carry several pipelined
//! requests, a fraction of one, or both.

use crate::config::ParserConfig;
use crate::request::{Method, Request, Version};
use crate::stats::ParserStats;
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::sync::Arc;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug)]
pub(crate) struct RequestParser {
    buf: BytesMut,
    config: ParserConfig,
    stats: Arc<ParserStats>,
    /// Set after the first parse error; malformed input is never recovered
    /// from, the connection winds down instead.
    poisoned: bool,
}

impl RequestParser {
    pub(crate) fn new(config: ParserConfig, stats: Arc<ParserStats>) -> Self {
        Self {
            buf: BytesMut::new(),
            config,
            stats,
            poisoned: false,
        }
    }

    /// Appends raw bytes received from the peer.
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete request from the buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Any error poisons the
    /// parser: the input is permanently malformed and subsequent calls keep
    /// failing.
    pub(crate) fn next_request(&mut self) -> Result<Option<Request>> {
        if self.poisoned {
            return Err(Error::MalformedRequest("parser already failed".into()));
        }
        match self.try_parse() {
            Ok(Some(request)) => {
                self.stats.request_parsed();
                Ok(Some(request))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.poisoned = true;
                self.stats.parse_error();
                Err(err)
            }
        }
    }

    fn try_parse(&mut self) -> Result<Option<Request>> {
        let Some(head_end) = find_subslice(&self.buf, HEAD_TERMINATOR) else {
            // The buffer always sits at a request boundary here, so bytes
            // that cannot start a method are rejected without waiting for
            // the rest of the head.
            if !plausible_method_prefix(&self.buf) {
                return Err(Error::MalformedRequest("bad method".into()));
            }
            if self.buf.len() > self.config.max_request_head_size {
                return Err(Error::HeadTooLarge(self.config.max_request_head_size));
            }
            return Ok(None);
        };
        if head_end > self.config.max_request_head_size {
            return Err(Error::HeadTooLarge(self.config.max_request_head_size));
        }

        let head = std::str::from_utf8(&self.buf[..head_end])
            .map_err(|_| Error::MalformedRequest("head is not valid utf-8".into()))?;
        let mut lines = head.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Vec::new();
        let mut content_length = 0usize;
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::MalformedRequest(format!("bad header line: {line:?}")))?;
            if name.is_empty() || name.contains(' ') {
                return Err(Error::MalformedRequest(format!("bad header name: {name:?}")));
            }
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = atoi::atoi::<usize>(value.as_bytes())
                    .ok_or_else(|| Error::MalformedRequest("bad content-length".into()))?;
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                // Only explicitly-framed bodies are supported.
                return Err(Error::MalformedRequest("transfer-encoding not supported".into()));
            }
            headers.push((name.to_string(), value.to_string()));
        }

        if content_length > self.config.max_body_size {
            return Err(Error::BodyTooLarge(self.config.max_body_size));
        }
        if self.buf.len() < head_end + HEAD_TERMINATOR.len() + content_length {
            // Head is complete but the body is still in flight.
            return Ok(None);
        }

        let target = target.to_string();
        self.buf.advance(head_end + HEAD_TERMINATOR.len());
        let body = self.buf.split_to(content_length).freeze();

        Ok(Some(Request::new(method, target, version, headers, body)))
    }
}

fn parse_request_line(line: &str) -> Result<(Method, &str, Version)> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::MalformedRequest(format!("bad request line: {line:?}")));
    };

    let method = Method::parse(method)
        .ok_or_else(|| Error::MalformedRequest(format!("bad method: {method:?}")))?;
    if !target.starts_with('/') {
        return Err(Error::MalformedRequest(format!("bad target: {target:?}")));
    }
    let version = match version {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        _ => return Err(Error::MalformedRequest(format!("bad version: {version:?}"))),
    };

    Ok((method, target, version))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

const METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"];

/// Whether `buf` could still grow into a request line starting with a
/// known method.
fn plausible_method_prefix(buf: &[u8]) -> bool {
    METHODS.iter().any(|method| {
        let method = method.as_bytes();
        if buf.len() <= method.len() {
            method.starts_with(buf)
        } else {
            buf.starts_with(method) && buf[method.len()] == b' '
        }
    })
}
