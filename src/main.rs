//! Edge gateway binary.
//!
//! ```text
//!     Client connection (TLS optional)
//!         → net::listener (bounded accept)
//!         → net::detect (HTTP/2 preface or sniffed HTTP/1.x head)
//!         ├─ HTTP/2 → hyper server → routing::Router::dispatch_stream
//!         │              → proxy (HTTP/2 upstream) | handler | static files
//!         └─ Upgrade → routing::Router::dispatch_upgrade
//!                        → proxy tunnel (HTTP/1.1 upstream) | protocol (WebSocket)
//! ```

use clap::Parser;
use std::path::PathBuf;

use edge_gateway::config::{load_config, GatewayConfig};
use edge_gateway::lifecycle::{signals, startup};
use edge_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "HTTP/2 and WebSocket edge gateway", long_about = None)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        proxies = config.proxies.len(),
        static_mounts = config.static_mounts.len(),
        websockets = config.websockets.len(),
        "Configuration loaded"
    );

    let server = startup::start(&config).await?;

    server.run(signals::shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
