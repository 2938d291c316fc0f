//! A pipelined HTTP/1.1 server core.
//!
//! Each accepted connection is served by two cooperating tasks sharing a
//! bounded pipeline: a reader that parses requests incrementally and spawns
//! one handler task per request, and a writer that waits for each handler
//! and emits responses back to the peer in the exact order the requests
//! arrived. Graceful shutdown, per-connection cancellation, handler-panic
//! isolation and backpressure are built into the pair.
//!
//! The easiest entry point is [`server::run`]:
//!
//! ```no_run
//! use esteira::{server, ConnectionConfig, Response, Router, StatusCode};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let router = Router::new()
//!         .route("/ping", |_req| async { Response::with_body(StatusCode::Ok, "pong") });
//!
//!     server::run(listener, router, ConnectionConfig::default(), tokio::signal::ctrl_c()).await;
//! }
//! ```

mod access_log;
mod parser;
mod pipeline;
mod reader;
mod slot;
mod writer;

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod shutdown;
pub mod stats;

pub use config::{ConnectionConfig, ParserConfig};
pub use connection::{Connection, ConnectionStream};
pub use error::Error;
pub use handler::Router;
pub use request::{Method, Request, Version};
pub use response::{Response, StatusCode};
pub use shutdown::Shutdown;
pub use stats::ServerStats;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";

pub type Result<T> = std::result::Result<T, Error>;
