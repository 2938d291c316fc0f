//! Per-connection tuning knobs.

/// Immutable parameters applied to every connection accepted by a server.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bytes requested from the socket per read.
    pub in_buffer_size: usize,
    /// Capacity of the request pipeline between the reader and the writer.
    ///
    /// When the writer falls behind by this many requests, the reader
    /// suspends and the kernel receive window takes over as backpressure.
    pub requests_queue_size_threshold: usize,
    /// Limits enforced by the request parser.
    pub parser: ParserConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            in_buffer_size: 32 * 1024,
            requests_queue_size_threshold: 100,
            parser: ParserConfig::default(),
        }
    }
}

/// Limits enforced while turning raw bytes into [`Request`]s.
///
/// [`Request`]: crate::Request
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Maximum size of the request line plus all headers, in bytes.
    pub max_request_head_size: usize,
    /// Maximum `Content-Length` accepted, in bytes.
    pub max_body_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_request_head_size: 16 * 1024,
            max_body_size: 1024 * 1024,
        }
    }
}
