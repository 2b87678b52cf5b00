//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated [`GatewayConfig`] into a [`Router`]
//! - Create the WebSocket endpoints named in the config
//! - Start the metrics exporter and bind the listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Registration order is proxies, static mounts, then WebSocket endpoints;
//!   within each list the file order is kept

use metrics_exporter_prometheus::BuildError;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use thiserror::Error;

use crate::config::{GatewayConfig, WebSocketMode, WebSocketRouteConfig};
use crate::http::server::{GatewayServer, ServeError};
use crate::http::static_files::{StaticError, StaticFiles};
use crate::observability::metrics;
use crate::protocol::websocket::{Session, SessionEvent, WebSocket};
use crate::proxy::{Destination, ProxyError, ProxyOptions};
use crate::routing::{RouteError, Router};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Static(#[from] StaticError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error("invalid metrics address `{0}`")]
    MetricsAddress(String),

    #[error("metrics exporter failed: {0}")]
    Metrics(#[from] BuildError),
}

/// Build the routing table described by `config`.
pub fn build_router(config: &GatewayConfig) -> Result<Router, StartupError> {
    let mut builder = Router::builder();

    for proxy in &config.proxies {
        let destination = Destination::template(&proxy.destination)?;
        let options = ProxyOptions {
            ca_file: proxy.ca_file.clone(),
            insecure: proxy.insecure,
        };
        tracing::info!(path = %proxy.path, destination = %proxy.destination, "Proxy route registered");
        builder = builder.proxy(&proxy.path, destination, options);
    }

    for mount in &config.static_mounts {
        let files = StaticFiles::new(&mount.directory)?;
        tracing::info!(path = %mount.path, directory = ?mount.directory, "Static mount registered");
        builder = files.mount(builder, &mount.path);
    }

    for route in &config.websockets {
        let endpoint = websocket_endpoint(route, config.websocket.max_frame_size);
        tracing::info!(path = %route.path, name = %route.name, mode = ?route.mode, "WebSocket endpoint registered");
        builder = builder.upgrade(&route.path, endpoint);
    }

    Ok(builder.build()?)
}

/// Install the Prometheus exporter when enabled, then bind the server.
pub async fn start(config: &GatewayConfig) -> Result<GatewayServer, StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let router = build_router(config)?;
    Ok(GatewayServer::bind(config, router).await?)
}

/// A configured WebSocket endpoint.
pub fn websocket_endpoint(route: &WebSocketRouteConfig, max_frame_size: usize) -> Arc<WebSocket> {
    match route.mode {
        WebSocketMode::Echo => Arc::new(
            WebSocket::new(route.name.clone())
                .max_frame_size(max_frame_size)
                .on_session(|session| {
                    tokio::spawn(echo(session));
                }),
        ),
        WebSocketMode::Broadcast => Arc::new_cyclic(|engine: &Weak<WebSocket>| {
            let engine = engine.clone();
            WebSocket::new(route.name.clone())
                .max_frame_size(max_frame_size)
                .on_session(move |session| {
                    tokio::spawn(fan_out(engine.clone(), session));
                })
        }),
    }
}

async fn echo(mut session: Session) {
    while let Some(event) = session.recv().await {
        let result = match event {
            SessionEvent::Text(text) => session.text(&text).await,
            SessionEvent::Binary(data) => session.binary(&data).await,
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::debug!(session_id = session.id(), error = %err, "Echo stopped");
            break;
        }
    }
}

async fn fan_out(engine: Weak<WebSocket>, mut session: Session) {
    while let Some(event) = session.recv().await {
        let Some(live) = engine.upgrade() else {
            break;
        };
        let delivered = match event {
            SessionEvent::Text(text) => live.broadcast_text(&text).await,
            SessionEvent::Binary(data) => live.broadcast_binary(&data).await,
            _ => continue,
        };
        tracing::trace!(session_id = session.id(), delivered, "Broadcast relayed");
    }
}
