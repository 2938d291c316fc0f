//! Socket-writing half of a connection.
//!
//! Drains the pipeline in arrival order, waits for each handler task and
//! serializes its response, so the peer observes responses in exactly the
//! order it sent the requests. The writer is the last task standing on a
//! connection: it exits only once the pipeline is empty and the producer
//! side is closed, and teardown runs after it.

use crate::access_log;
use crate::connection::ConnectionStream;
use crate::error;
use crate::pipeline::Consumer;
use crate::response::Response;
use crate::shutdown::Shutdown;
use crate::slot::RequestSlot;
use crate::stats::ServerStats;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

#[derive(Debug)]
pub(crate) struct Writer<S> {
    pub(crate) stream: WriteHalf<S>,
    pub(crate) consumer: Consumer<RequestSlot>,
    /// Trips on `Connection::stop` and on reader exits where the peer is
    /// gone; remaining handlers are then aborted instead of awaited.
    pub(crate) cancel: Shutdown,
    pub(crate) stats: Arc<ServerStats>,
    pub(crate) peer: SocketAddr,
    /// Cleared once a response could not be produced in order; every
    /// response after that is marked failed without touching the socket.
    /// Owned by the writer; the reader never branches on it.
    pub(crate) is_response_chain_valid: bool,
    /// Cleared after a send error; nothing is written past a broken socket.
    pub(crate) socket_open: bool,
}

impl<S: ConnectionStream> Writer<S> {
    /// Drains the pipeline until the reader drops its producer handle and
    /// the queue is empty.
    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    pub(crate) async fn run(&mut self) {
        while let Some(slot) = self.consumer.pop().await {
            self.handle_slot(slot).await;
        }
        debug_assert_eq!(self.consumer.size(), 0);
        debug!("pipeline drained");
    }

    /// Half-closes the socket towards the peer. Never fails.
    pub(crate) async fn close(&mut self) {
        if let Err(err) = self.stream.shutdown().await {
            debug!(%err, "socket shutdown failed");
        }
    }

    async fn handle_slot(&mut self, slot: RequestSlot) {
        let RequestSlot {
            mut request,
            handler,
        } = slot;
        let mut response = self.join_handler(handler).await;

        request.start_send_time = Some(Instant::now());
        if self.is_response_chain_valid && self.socket_open {
            response.set_version(request.version);
            response.set_keep_alive(!request.is_final());
            // The send is never raced against cancellation: once a response
            // starts going out it goes out whole, keeping the HTTP framing
            // on the wire intact.
            if let Err(err) = response.send(&mut self.stream).await {
                if error::is_disconnect(&err) {
                    warn!(%err, "peer went away mid-response");
                } else {
                    error!(%err, "failed to send response");
                }
                self.socket_open = false;
                response.set_send_failed(Instant::now());
            }
        } else {
            response.set_send_failed(Instant::now());
        }
        request.finish_send_time = Some(Instant::now());

        self.stats.request_processed();
        access_log::write_access_logs(self.peer, &request, &response);
    }

    /// Waits for the handler task, honoring cancellation.
    ///
    /// The handler's result is observed here and nowhere else. A cancelled
    /// wait aborts the handler and invalidates the response chain; a
    /// panicked handler is converted into a `500` and the chain continues.
    async fn join_handler(&mut self, mut handler: JoinHandle<Response>) -> Response {
        if !self.cancel.check() {
            tokio::select! {
                biased;
                result = &mut handler => return self.unpack(result),
                _ = self.cancel.recv() => {}
            }
        }

        // Cancellation was requested before the handler finished: take it
        // down and short-circuit this and all remaining responses.
        handler.abort();
        self.is_response_chain_valid = false;
        let result = handler.await;
        self.unpack(result)
    }

    fn unpack(&mut self, result: Result<Response, JoinError>) -> Response {
        match result {
            Ok(response) => response,
            Err(err) if err.is_panic() => {
                error!("handler panicked, replying with a 500");
                Response::internal_server_error()
            }
            Err(_) => {
                // Aborted before producing a response.
                self.is_response_chain_valid = false;
                Response::internal_server_error()
            }
        }
    }
}
