use anyhow::Context;
use clap::Parser;
use esteira::{server, ConnectionConfig, Response, Router, StatusCode, DEFAULT_HOST, DEFAULT_PORT};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "esteira-server", version, about = "Pipelined HTTP/1.1 server")]
struct ServerCli {
    /// Address to bind to.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Requests buffered per connection before the reader backs off.
    #[arg(long, default_value_t = 100)]
    queue_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = ServerCli::parse();
    let listener = TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .context("failed to bind tcp listener")?;
    info!(host = %cli.host, port = cli.port, "listening");

    let router = Router::new()
        .route("/ping", |_req| async {
            Response::with_body(StatusCode::Ok, "pong")
        })
        .route("/echo", |req: esteira::Request| async move {
            Response::with_body(StatusCode::Ok, req.body.clone())
        });

    let config = ConnectionConfig {
        requests_queue_size_threshold: cli.queue_size,
        ..ConnectionConfig::default()
    };

    server::run(listener, router, config, tokio::signal::ctrl_c()).await;

    Ok(())
}
