//! Process-wide counters, shared by reference between the server, the
//! connections and their reader/writer tasks.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Counters covering every connection served by one server instance.
///
/// All counters are monotonic except the `active_*` gauges. Updates come
/// from both the reader and the writer task of each connection, so every
/// field is atomic; relaxed ordering is enough since no counter guards
/// other memory.
#[derive(Debug, Default)]
pub struct ServerStats {
    active_connections: AtomicU64,
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    active_request_count: AtomicU64,
    requests_processed_count: AtomicU64,
    parser: Arc<ParserStats>,
}

impl ServerStats {
    pub(crate) fn connection_opened(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Called by the reader, once per request, before the request enters
    /// the pipeline.
    pub(crate) fn request_queued(&self) {
        self.active_request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Called once per request after its response was either sent or marked
    /// as failed. Balances [`ServerStats::request_queued`] exactly.
    pub(crate) fn request_processed(&self) {
        self.active_request_count.fetch_sub(1, Ordering::Relaxed);
        self.requests_processed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn parser(&self) -> Arc<ParserStats> {
        Arc::clone(&self.parser)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn connections_created(&self) -> u64 {
        self.connections_created.load(Ordering::Relaxed)
    }

    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    pub fn active_request_count(&self) -> u64 {
        self.active_request_count.load(Ordering::Relaxed)
    }

    pub fn requests_processed_count(&self) -> u64 {
        self.requests_processed_count.load(Ordering::Relaxed)
    }

    pub fn requests_parsed(&self) -> u64 {
        self.parser.requests_parsed.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parser.parse_errors.load(Ordering::Relaxed)
    }
}

/// Counters owned by the request parser.
#[derive(Debug, Default)]
pub struct ParserStats {
    requests_parsed: AtomicU64,
    parse_errors: AtomicU64,
}

impl ParserStats {
    pub(crate) fn request_parsed(&self) {
        self.requests_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_parsed(&self) -> u64 {
        self.requests_parsed.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }
}
