//! Gateway server: accept loop and per-connection protocol dispatch.
//!
//! # Responsibilities
//! - Accept connections through the bounded listener
//! - Terminate TLS when configured
//! - Detect HTTP/2 versus sniffed HTTP/1.x upgrade requests
//! - Serve HTTP/2 through hyper with the tower middleware stack
//! - Hand upgrade sockets to the router, answering 404 when unclaimed
//! - Drain connections on shutdown

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use super::response::{self, RAW_NOT_FOUND, SERVER_NAME};
use crate::config::GatewayConfig;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::detect::{detect, Detected};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::rewind::{BoxedIo, RawSocket};
use crate::net::sniff::UpgradeRequest;
use crate::net::tls::{self, TlsError};
use crate::observability::metrics;
use crate::routing::{Router, UpgradeOutcome};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every connection task.
struct Shared {
    router: Arc<Router>,
    tls: Option<TlsAcceptor>,
    sniff_limit: usize,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

/// A bound gateway, ready to run.
pub struct GatewayServer {
    listener: Listener,
    shared: Arc<Shared>,
    drain_timeout: Duration,
}

impl GatewayServer {
    /// Bind the listener and load TLS material.
    pub async fn bind(config: &GatewayConfig, router: Router) -> Result<Self, ServeError> {
        let tls = match &config.listener.tls {
            Some(tls_config) => Some(tls::load_acceptor(&tls_config.cert_path, &tls_config.key_path)?),
            None => None,
        };
        let listener = Listener::bind(&config.listener).await?;

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                router: Arc::new(router),
                tls,
                sniff_limit: config.listener.sniff_limit_bytes,
                tracker: ConnectionTracker::new(),
                shutdown: Shutdown::new(),
            }),
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// The routing table; subscribe to it for dispatch failure events.
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.shared.router)
    }

    pub fn connections(&self) -> ConnectionTracker {
        self.shared.tracker.clone()
    }

    /// Accept connections until `signal` resolves, then drain.
    pub async fn run<F>(self, signal: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()>,
    {
        let addr = self.listener.local_addr()?;
        tracing::info!(address = %addr, tls = self.shared.tls.is_some(), "Gateway serving");

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let shared = Arc::clone(&self.shared);
                        let shutdown = self.shared.shutdown.subscribe();
                        tokio::spawn(handle_connection(shared, stream, peer, permit, shutdown));
                    }
                    Err(ListenerError::Closed) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        tracing::info!(active = self.shared.tracker.active_count(), "Shutting down, draining connections");
        self.shared.shutdown.trigger();
        if !self.shared.tracker.drain(self.drain_timeout).await {
            tracing::warn!(
                remaining = self.shared.tracker.active_count(),
                "Drain timeout reached, dropping connections"
            );
        }
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    shutdown: broadcast::Receiver<()>,
) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer, error = %err, "Could not set TCP_NODELAY");
    }

    let (io, negotiated_h2): (BoxedIo, bool) = match &shared.tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                let h2 = tls_stream.get_ref().1.alpn_protocol() == Some(&b"h2"[..]);
                (Box::new(tls_stream) as BoxedIo, h2)
            }
            Err(err) => {
                tracing::debug!(peer = %peer, error = %err, "TLS handshake failed");
                return;
            }
        },
        None => (Box::new(stream) as BoxedIo, false),
    };

    let detected = match detect(io, negotiated_h2, shared.sniff_limit).await {
        Ok(detected) => detected,
        Err(err) => {
            tracing::debug!(peer = %peer, error = %err, "Connection closed during detection");
            return;
        }
    };

    let guard = shared.tracker.track(detected.label());
    let span = tracing::info_span!(
        "connection",
        id = %guard.id(),
        peer = %peer,
        protocol = detected.label()
    );

    async move {
        match detected {
            Detected::Http2(socket) => serve_http2(&shared, socket, shutdown).await,
            Detected::Upgrade(request, socket) => serve_upgrade(&shared, request, socket).await,
            Detected::NotUpgrade(request, mut socket) => {
                tracing::debug!(method = %request.method, path = %request.path, "HTTP/1.x request without upgrade");
                reply_raw(&mut socket, RAW_NOT_FOUND).await;
            }
            Detected::Malformed => tracing::debug!("Unrecognized protocol, closing"),
        }
        drop(guard);
    }
    .instrument(span)
    .await;
}

async fn serve_http2(shared: &Shared, socket: RawSocket, mut shutdown: broadcast::Receiver<()>) {
    let router = Arc::clone(&shared.router);
    let service = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::SERVER,
            HeaderValue::from_static(SERVER_NAME),
        ))
        .map_request(|request: Request<Incoming>| request.map(Body::new))
        .service_fn(move |request: Request<Body>| {
            let router = Arc::clone(&router);
            async move { Ok::<_, Infallible>(serve_stream(&router, request).await) }
        });

    let builder = hyper::server::conn::http2::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(socket), TowerToHyperService::new(service));
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    if let Err(err) = result {
        tracing::debug!(error = %err, "HTTP/2 connection ended with error");
    }
}

/// Route one stream, falling back to a plain 404.
async fn serve_stream(router: &Router, request: Request<Body>) -> Response<Body> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match router.dispatch_stream(request).await {
        Some(response) => response,
        None => {
            tracing::debug!(method = %method, path = %path, "No route matched");
            metrics::record_request("fallback", 404);
            response::not_found()
        }
    }
}

async fn serve_upgrade(shared: &Shared, request: UpgradeRequest, socket: RawSocket) {
    match shared.router.dispatch_upgrade(request, socket).await {
        UpgradeOutcome::Handled => {}
        UpgradeOutcome::Unhandled(request, mut socket) => {
            tracing::debug!(path = %request.path, upgrade = ?request.header("upgrade"), "No upgrade target matched");
            reply_raw(&mut socket, RAW_NOT_FOUND).await;
        }
    }
}

async fn reply_raw(socket: &mut RawSocket, reply: &[u8]) {
    let result = async {
        socket.write_all(reply).await?;
        socket.shutdown().await
    }
    .await;
    if let Err(err) = result {
        tracing::debug!(error = %err, "Raw reply not delivered");
    }
}
