//! Socket-reading half of a connection.
//!
//! Reads from the peer, feeds the parser and queues one slot per parsed
//! request. Runs until the peer half-closes, the input turns malformed, a
//! final request is seen, the connection is cancelled or the socket fails.

use crate::connection::ConnectionStream;
use crate::error;
use crate::handler::Router;
use crate::parser::RequestParser;
use crate::pipeline::Producer;
use crate::request::Request;
use crate::shutdown::Shutdown;
use crate::slot::RequestSlot;
use crate::stats::ServerStats;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub(crate) struct Reader<S> {
    pub(crate) stream: ReadHalf<S>,
    pub(crate) parser: RequestParser,
    pub(crate) producer: Producer<RequestSlot>,
    pub(crate) router: Arc<Router>,
    pub(crate) stats: Arc<ServerStats>,
    /// Trips when `Connection::stop` is called.
    pub(crate) cancel: Shutdown,
    /// Trips when the whole server begins shutting down.
    pub(crate) server_shutdown: Shutdown,
    /// Sender half of the connection's cancel channel, used by the exit
    /// guard to stop the writer's in-flight work.
    pub(crate) cancel_writer: broadcast::Sender<()>,
    pub(crate) peer: SocketAddr,
    pub(crate) in_buffer_size: usize,
    /// Cleared once this connection has seen its last request. Owned by
    /// the reader; the writer never branches on it.
    pub(crate) is_accepting_requests: bool,
}

impl<S: ConnectionStream> Reader<S> {
    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    pub(crate) async fn run(mut self) {
        // On exits that mean the peer is gone (half-close, I/O error,
        // cancellation), in-flight handlers are pointless and the writer is
        // told to cancel them. The final-request and malformed paths disarm
        // the guard instead: the peer is still reading and queued responses
        // must flush.
        let mut stop_writer = CancelGuard::new(self.cancel_writer.clone());
        let mut buf = vec![0u8; self.in_buffer_size];

        while self.is_accepting_requests {
            let read = tokio::select! {
                read = self.stream.read(&mut buf) => read,
                _ = self.cancel.recv() => {
                    debug!("reader cancelled");
                    return;
                }
                _ = self.server_shutdown.recv() => {
                    debug!("server is shutting down");
                    return;
                }
            };
            let bytes = match read {
                Ok(bytes) => bytes,
                Err(err) => {
                    if error::is_disconnect(&err) {
                        warn!(%err, "peer reset the connection");
                    } else {
                        error!(%err, "socket read failed");
                    }
                    return;
                }
            };
            if bytes == 0 {
                debug!("peer half-closed the connection");
                return;
            }

            self.parser.feed(&buf[..bytes]);
            loop {
                match self.parser.next_request() {
                    Ok(Some(request)) => {
                        if !self.enqueue(request).await {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%err, "stopped accepting requests");
                        self.is_accepting_requests = false;
                        break;
                    }
                }
            }
        }

        stop_writer.disarm();
    }

    /// Queues one request for the writer. Returns `false` when the reader
    /// must stop because the pipeline's consumer side is gone.
    async fn enqueue(&mut self, request: Request) -> bool {
        if !self.is_accepting_requests {
            // A final request was already seen; anything parsed after it
            // from the same read never reaches the pipeline.
            debug!(uri = %request.target, "dropping request parsed after the final one");
            return true;
        }
        if request.is_final() {
            debug!(uri = %request.target, "final request");
            self.is_accepting_requests = false;
        }

        debug!(uri = %request.target, queue = self.producer.size(), "queueing request");
        self.stats.request_queued();
        let handler = self.router.start_request_task(request.clone());
        match self.producer.push(RequestSlot::new(request, handler)).await {
            Ok(()) => true,
            Err(slot) => {
                // The writer is gone, nobody will ever pop this slot.
                slot.abandon(self.peer, &self.stats).await;
                self.is_accepting_requests = false;
                false
            }
        }
    }
}

/// Trips the connection's cancel channel when dropped, unless disarmed.
struct CancelGuard {
    cancel: broadcast::Sender<()>,
    armed: bool,
}

impl CancelGuard {
    fn new(cancel: broadcast::Sender<()>) -> Self {
        Self {
            cancel,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            // Nobody listening is fine, the writer may already be done.
            let _ = self.cancel.send(());
        }
    }
}
