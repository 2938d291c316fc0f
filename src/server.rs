//! HTTP server entry point.
//!
//! Provides an async `run` function that listens for inbound connections,
//! creating a [`Connection`] per accepted socket.

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::handler::Router;
use crate::shutdown::Shutdown;
use crate::stats::ServerStats;
use std::future::Future;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// Server listener state. Created in the `run` call. It includes a `run`
/// method which performs the TCP listening and initialization of
/// per-connection state.
#[derive(Debug)]
struct Listener {
    /// TCP listener supplied by the `run` caller.
    listener: TcpListener,
    /// Handler registry shared by every connection.
    router: Arc<Router>,
    /// Process-wide counters shared by every connection.
    stats: Arc<ServerStats>,
    /// Per-connection parameters.
    config: ConnectionConfig,
    /// Limit the max number of connections.
    ///
    /// A `Semaphore` is used to limit the max number of connections. Before
    /// attempting to accept a new connection, a permit is acquired from the
    /// semaphore. If none are available, the listener waits for one.
    ///
    /// The permit travels into the connection's `on_close` callback, so it
    /// returns to the semaphore exactly when the connection finished its
    /// teardown.
    limit_connections: Arc<Semaphore>,
    /// Broadcasts a shutdown signal to all active connections.
    ///
    /// Each connection's reader listens on a subscription of this channel;
    /// when the sender is dropped the connections wind down, cancelling
    /// their in-flight handlers.
    notify_shutdown: broadcast::Sender<()>,
    /// Used as part of the graceful shutdown process to wait for
    /// connections to complete processing.
    ///
    /// Every connection's writer task holds a clone of this sender and
    /// drops it after teardown. Once all clones are gone,
    /// `shutdown_complete_rx.recv()` completes with `None` and it is safe
    /// to return from `run`.
    shutdown_complete_tx: mpsc::Sender<()>,
}

/// Maximum number of concurrent connections the server will accept.
///
/// When this limit is reached, the server stops accepting connections
/// until an active connection terminates.
const MAX_CONNECTIONS: usize = 250;

/// Run the server.
///
/// Accepts connections from the supplied listener. For each inbound
/// connection a [`Connection`] is created and started. The server runs
/// until the `shutdown` future completes, at which point every connection
/// is wound down gracefully and `run` returns once the last one finished
/// its teardown.
///
/// `tokio::signal::ctrl_c()` can be used as the `shutdown` argument. This
/// will listen for a SIGINT signal.
pub async fn run(
    listener: TcpListener,
    router: Router,
    config: ConnectionConfig,
    shutdown: impl Future,
) {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

    let mut server = Listener {
        listener,
        router: Arc::new(router),
        stats: Arc::new(ServerStats::default()),
        config,
        limit_connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        notify_shutdown,
        shutdown_complete_tx,
    };

    tokio::select! {
        res = server.run() => {
            // Errors encountered on individual connections never bubble up
            // to this point; an `Err` here means accepting itself kept
            // failing and the server is giving up.
            if let Err(err) = res {
                error!(cause = %err, "failed to accept");
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    let Listener {
        shutdown_complete_tx,
        notify_shutdown,
        ..
    } = server;

    // When `notify_shutdown` is dropped, every connection observes the
    // signal and winds down.
    drop(notify_shutdown);
    // Drop the final `Sender` so the `Receiver` below can complete.
    drop(shutdown_complete_tx);

    // Wait for every connection to finish its teardown. The only remaining
    // `Sender` instances are held by connection writer tasks; when those
    // drop, `recv()` returns `None`.
    let _ = shutdown_complete_rx.recv().await;
}

impl Listener {
    /// Listen for inbound connections, starting a [`Connection`] for each.
    ///
    /// # Errors
    ///
    /// Returns `Err` if accepting keeps failing after backing off; see
    /// [`Listener::accept`].
    async fn run(&mut self) -> crate::Result<()> {
        info!("accepting inbound connections");

        loop {
            // Wait for a permit to become available.
            //
            // `acquire_owned()` returns `Err` when the semaphore has been
            // closed. We don't ever close it, so `unwrap()` is safe.
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .unwrap();

            let socket = self.accept().await?;
            let peer = match socket.peer_addr() {
                Ok(peer) => peer,
                Err(err) => {
                    // The peer vanished between accept and here; the permit
                    // returns to the semaphore on drop.
                    warn!(%err, "failed to read peer address");
                    continue;
                }
            };

            let connection = Connection::new(
                self.config.clone(),
                Arc::clone(&self.router),
                Arc::clone(&self.stats),
                peer,
                Some(socket.as_raw_fd()),
            );
            // The permit rides in the close callback: it returns to the
            // semaphore exactly when the connection finished its teardown.
            connection.set_on_close(move || drop(permit));
            connection.start(
                socket,
                Shutdown::new(self.notify_shutdown.subscribe()),
                self.shutdown_complete_tx.clone(),
            );
        }
    }

    /// Accept an inbound connection.
    ///
    /// Errors are handled by backing off and retrying, doubling the wait
    /// each time. If accepting still fails after the backoff exceeds 64
    /// seconds, the error is returned.
    async fn accept(&mut self) -> crate::Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => {
                    debug!("accepted inbound connection");
                    return Ok(socket);
                }
                Err(err) => {
                    if backoff > 64 {
                        error!(%err, "failed to accept inbound connection too many times");
                        return Err(err.into());
                    }
                    warn!(%err, "error accepting inbound connection, trying again in {backoff} seconds");
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}
