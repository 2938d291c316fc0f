//! Per-connection orchestration.
//!
//! A [`Connection`] owns an accepted socket and the pair of cooperating
//! tasks serving it: the reader parses requests and queues them, the
//! writer drains the queue and emits responses in arrival order. Teardown
//! is finalized by the writer once the pipeline is empty.

use crate::config::ConnectionConfig;
use crate::handler::Router;
use crate::parser::RequestParser;
use crate::pipeline;
use crate::reader::Reader;
use crate::shutdown::Shutdown;
use crate::stats::ServerStats;
use crate::writer::Writer;
use std::fmt;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// A trait for types that can back a connection.
pub trait ConnectionStream: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types that implement `AsyncRead + AsyncWrite + Unpin + Send`.
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConnectionStream for T {}

type CloseCallback = Box<dyn FnOnce() + Send>;

/// One accepted client connection.
///
/// The writer task holds the only strong reference during steady state, so
/// the `Connection` lives exactly as long as its tasks and drops when the
/// writer returns from teardown.
pub struct Connection {
    config: ConnectionConfig,
    router: Arc<Router>,
    stats: Arc<ServerStats>,
    peer: SocketAddr,
    fd: Option<RawFd>,
    /// Sender half of the cancel channel shared by `stop`, the reader's
    /// exit guard and both tasks' listeners.
    cancel_tx: broadcast::Sender<()>,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Connection {
    /// Creates the connection state for an accepted socket and records it
    /// in the server counters.
    pub fn new(
        config: ConnectionConfig,
        router: Arc<Router>,
        stats: Arc<ServerStats>,
        peer: SocketAddr,
        fd: Option<RawFd>,
    ) -> Arc<Self> {
        stats.connection_opened();
        let (cancel_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            router,
            stats,
            peer,
            fd,
            cancel_tx,
            on_close: Mutex::new(None),
        })
    }

    /// Registers a one-shot callback invoked after teardown completes.
    ///
    /// The callback runs on the writer task and must not panic.
    pub fn set_on_close(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_close.lock().unwrap() = Some(Box::new(callback));
    }

    /// Requests cancellation of the connection.
    ///
    /// In-flight handlers are aborted, their responses are marked as
    /// failed, and the connection tears down. A response that already
    /// started going out still completes.
    pub fn stop(&self) {
        // No receivers just means the tasks are already gone.
        let _ = self.cancel_tx.send(());
    }

    /// Raw descriptor of the peer socket, for diagnostics only.
    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Spawns the reader and writer tasks for `stream`.
    ///
    /// The returned handle resolves once teardown has finished: socket
    /// closed, counters updated and the `on_close` callback invoked. The
    /// `shutdown_complete` sender is dropped at the same point, which is
    /// what the server's graceful drain waits on.
    pub fn start<S>(
        self: &Arc<Self>,
        stream: S,
        server_shutdown: Shutdown,
        shutdown_complete: mpsc::Sender<()>,
    ) -> JoinHandle<()>
    where
        S: ConnectionStream + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (producer, consumer) = pipeline::bounded(self.config.requests_queue_size_threshold);

        let reader = Reader {
            stream: read_half,
            parser: RequestParser::new(self.config.parser.clone(), self.stats.parser()),
            producer,
            router: Arc::clone(&self.router),
            stats: Arc::clone(&self.stats),
            cancel: Shutdown::new(self.cancel_tx.subscribe()),
            server_shutdown,
            cancel_writer: self.cancel_tx.clone(),
            peer: self.peer,
            in_buffer_size: self.config.in_buffer_size,
            is_accepting_requests: true,
        };
        let mut writer = Writer {
            stream: write_half,
            consumer,
            cancel: Shutdown::new(self.cancel_tx.subscribe()),
            stats: Arc::clone(&self.stats),
            peer: self.peer,
            is_response_chain_valid: true,
            socket_open: true,
        };

        let connection = Arc::clone(self);
        tokio::spawn(async move {
            let reader_task = tokio::spawn(reader.run());
            writer.run().await;
            // `pop` only returns `None` once the producer was dropped, so
            // the reader has already returned; joining just ties it off.
            let _ = reader_task.await;
            writer.close().await;
            connection.finish();
            drop(shutdown_complete);
        })
    }

    /// Final teardown steps, run by the writer task after the socket was
    /// shut down.
    fn finish(&self) {
        self.stats.connection_closed();
        debug!(peer = %self.peer, "connection closed");
        let callback = self.on_close.lock().unwrap().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("fd", &self.fd)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Response, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Notify;

    /// Everything a scenario test needs to observe a connection's fate.
    struct Rig {
        handle: Option<JoinHandle<()>>,
        connection: Arc<Connection>,
        stats: Arc<ServerStats>,
        on_close_calls: Arc<AtomicUsize>,
        /// Keeps the fake server-shutdown channel open for the test's
        /// lifetime; dropping it early would read as a server shutdown.
        _notify_shutdown: broadcast::Sender<()>,
    }

    fn start<S: ConnectionStream + 'static>(
        stream: S,
        router: Router,
        config: ConnectionConfig,
    ) -> Rig {
        let stats = Arc::new(ServerStats::default());
        let connection = Connection::new(
            config,
            Arc::new(router),
            Arc::clone(&stats),
            "127.0.0.1:49152".parse().unwrap(),
            None,
        );

        let on_close_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&on_close_calls);
        connection.set_on_close(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, _) = mpsc::channel(1);
        let handle = connection.start(
            stream,
            Shutdown::new(notify_shutdown.subscribe()),
            shutdown_complete_tx,
        );

        Rig {
            handle: Some(handle),
            connection,
            stats,
            on_close_calls,
            _notify_shutdown: notify_shutdown,
        }
    }

    fn assert_settled(rig: &Rig, processed: u64) {
        assert_eq!(rig.stats.requests_processed_count(), processed);
        assert_eq!(rig.stats.active_request_count(), 0);
        assert_eq!(rig.stats.connections_created(), 1);
        assert_eq!(rig.stats.connections_closed(), 1);
        assert_eq!(rig.stats.active_connections(), 0);
        assert_eq!(rig.on_close_calls.load(Ordering::SeqCst), 1);
    }

    fn body_router(routes: &[(&'static str, &'static str)]) -> Router {
        routes.iter().fold(Router::new(), |router, (path, body)| {
            let path = *path;
            let body = *body;
            router.route(path, move |_req| async move {
                Response::with_body(StatusCode::Ok, body)
            })
        })
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn responses_arrive_in_request_order() {
        let router = body_router(&[("/a", "A"), ("/b", "B"), ("/c", "C")]);
        let stream = tokio_test::io::Builder::new()
            .read(b"GET /a HTTP/1.1\r\n\r\n")
            .read(b"GET /b HTTP/1.1\r\n\r\n")
            .read(b"GET /c HTTP/1.1\r\n\r\n")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nB")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nC")
            .build();

        let mut rig = start(stream, router, ConnectionConfig::default());
        rig.handle.take().unwrap().await.unwrap();

        assert_settled(&rig, 3);
        assert_eq!(rig.stats.requests_parsed(), 3);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn final_request_flushes_and_closes() {
        let router = body_router(&[("/a", "A"), ("/b", "B"), ("/c", "C")]);
        // The second read carries the final request plus a pipelined one
        // behind it, which must never be queued.
        let stream = tokio_test::io::Builder::new()
            .read(b"GET /a HTTP/1.1\r\n\r\n")
            .read(b"GET /b HTTP/1.1\r\nConnection: close\r\n\r\nGET /c HTTP/1.1\r\n\r\n")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nConnection: close\r\n\r\nB")
            .build();

        let mut rig = start(stream, router, ConnectionConfig::default());
        rig.handle.take().unwrap().await.unwrap();

        // `/c` was parsed but dropped after the final request.
        assert_settled(&rig, 2);
        assert_eq!(rig.stats.requests_parsed(), 3);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn malformed_input_flushes_queued_responses() {
        let router = body_router(&[("/a", "A")]);
        let stream = tokio_test::io::Builder::new()
            .read(b"GET /a HTTP/1.1\r\n\r\n")
            .read(b"\x00\x00\x00")
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA")
            .build();

        let mut rig = start(stream, router, ConnectionConfig::default());
        rig.handle.take().unwrap().await.unwrap();

        assert_settled(&rig, 1);
        assert_eq!(rig.stats.parse_errors(), 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn crashed_handler_replies_500_and_connection_survives() {
        let router = Router::new()
            .route("/crash", |_req| async { panic!("boom") })
            .route("/ok", |_req| async { Response::with_body(StatusCode::Ok, "ok") });
        let stream = tokio_test::io::Builder::new()
            .read(b"GET /crash HTTP/1.1\r\n\r\n")
            .read(b"GET /ok HTTP/1.1\r\n\r\n")
            .write(
                b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 21\r\n\r\n\
                  internal server error",
            )
            .write(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .build();

        let mut rig = start(stream, router, ConnectionConfig::default());
        rig.handle.take().unwrap().await.unwrap();

        assert_settled(&rig, 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn half_close_cancels_in_flight_handler() {
        let router = Router::new().route("/slow", |_req| async {
            std::future::pending::<()>().await;
            Response::new(StatusCode::Ok)
        });
        // The peer half-closes right after the request; no response may be
        // written.
        let stream = tokio_test::io::Builder::new()
            .read(b"GET /slow HTTP/1.1\r\n\r\n")
            .build();

        let mut rig = start(stream, router, ConnectionConfig::default());
        rig.handle.take().unwrap().await.unwrap();

        // The request still counts as processed: its response was marked
        // as failed and the accounting settled.
        assert_settled(&rig, 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn stop_aborts_slow_handler_and_tears_down() {
        let entered = Arc::new(Notify::new());
        let handler_entered = Arc::clone(&entered);
        let router = Router::new().route("/slow", move |_req| {
            let entered = Arc::clone(&handler_entered);
            async move {
                entered.notify_one();
                std::future::pending::<()>().await;
                Response::new(StatusCode::Ok)
            }
        });

        let (mut client, server) = tokio::io::duplex(1024);
        let mut rig = start(server, router, ConnectionConfig::default());

        client
            .write_all(b"GET /slow HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        entered.notified().await;

        rig.connection.stop();
        rig.handle.take().unwrap().await.unwrap();
        assert_settled(&rig, 1);

        // The server side closed without writing anything.
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn tiny_queue_keeps_responses_ordered_under_stalled_handlers() {
        // Three handlers gated individually and released in reverse order;
        // with a single-slot pipeline the responses must still come out in
        // request order.
        let gates: Vec<Arc<Notify>> = (0..3).map(|_| Arc::new(Notify::new())).collect();
        let mut router = Router::new();
        for (i, gate) in gates.iter().enumerate() {
            let gate = Arc::clone(gate);
            router = router.route(format!("/{i}"), move |_req| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Response::with_body(StatusCode::Ok, i.to_string())
                }
            });
        }

        let config = ConnectionConfig {
            requests_queue_size_threshold: 1,
            ..ConnectionConfig::default()
        };
        let (mut client, server) = tokio::io::duplex(4096);
        let mut rig = start(server, router, config);

        client
            .write_all(b"GET /0 HTTP/1.1\r\n\r\nGET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        for gate in gates.iter().rev() {
            gate.notify_one();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let expected = b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n0\
                         HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n1\
                         HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n2";
        let mut received = vec![0u8; expected.len()];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(client);
        rig.handle.take().unwrap().await.unwrap();
        assert_settled(&rig, 3);
    }
}
