//! The unit travelling through a connection's pipeline.

use crate::access_log;
use crate::request::Request;
use crate::response::Response;
use crate::stats::ServerStats;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::task::JoinHandle;

/// A parsed request paired with the handle of its executing handler task.
///
/// The slot owns the [`Request`] for its entire lifetime, so the request
/// data stays alive even when the handler task is aborted mid-flight. The
/// handler's result is observed exactly once, by whoever owns the slot:
/// the writer in the normal case, the reader when the pipeline is gone.
#[derive(Debug)]
pub(crate) struct RequestSlot {
    pub(crate) request: Request,
    pub(crate) handler: JoinHandle<Response>,
}

impl RequestSlot {
    pub(crate) fn new(request: Request, handler: JoinHandle<Response>) -> Self {
        Self { request, handler }
    }

    /// Winds the slot down without a writer: aborts the handler, records
    /// the response as failed and settles the request accounting.
    ///
    /// Used by the reader when a push fails because the consumer side of
    /// the pipeline is gone.
    pub(crate) async fn abandon(mut self, peer: SocketAddr, stats: &ServerStats) {
        self.handler.abort();
        let mut response = match (&mut self.handler).await {
            Ok(response) => response,
            Err(_) => Response::internal_server_error(),
        };
        response.set_send_failed(Instant::now());
        self.request.finish_send_time = Some(Instant::now());
        stats.request_processed();
        access_log::write_access_logs(peer, &self.request, &response);
    }
}
