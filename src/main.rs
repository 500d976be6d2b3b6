//! Caching reverse proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ request id ─▶ access log ─▶ timeout ─▶ cache ──hit──▶ Client
//!                                                          │
//!                                                         miss
//!                                                          ▼
//!                                   routing (longest prefix) ─▶ Mapping
//!                                                          │
//!                                   single backend ◀───────┴──▶ round-robin balancer
//!                                                          │
//!     Client ◀── tee (client + cache sink) ◀── upstream response
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use caching_proxy::http::HttpServer;
use caching_proxy::lifecycle::{signals, startup, Shutdown};
use caching_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "caching-proxy")]
#[command(about = "Caching, load-balancing HTTP reverse proxy", long_about = None)]
struct Cli {
    /// Path to a TOML or JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let port = std::env::var("PORT").ok();

    let resolved = startup::resolve_config(cli.config.as_deref(), port.as_deref())?;
    logging::init_logging(&resolved.config.observability);
    resolved.log();
    let config = resolved.config;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        cache_enabled = config.cache.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "caching-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config)?;
    let listener = startup::bind_listener(server.config()).await?;

    let shutdown = Shutdown::new();
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    signals::shutdown_on_signal(&shutdown).await;
    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
