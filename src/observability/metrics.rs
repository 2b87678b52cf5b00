//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, upgrades, proxy failures, sessions)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): streams by kind (`handler`, `proxy`, `fallback`) and status
//! - `gateway_upgrades_total` (counter): dispatched upgrades by target
//! - `gateway_proxy_errors_total` (counter): failed forwards by path (`stream`, `upgrade`)
//! - `gateway_connections_active` (gauge): open client connections
//! - `gateway_connections_total` (counter): accepted connections by protocol
//! - `gateway_websocket_sessions_active` (gauge): live WebSocket sessions
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const UPGRADES_TOTAL: &str = "gateway_upgrades_total";
pub const PROXY_ERRORS_TOTAL: &str = "gateway_proxy_errors_total";
pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";
pub const CONNECTIONS_TOTAL: &str = "gateway_connections_total";
pub const WEBSOCKET_SESSIONS_ACTIVE: &str = "gateway_websocket_sessions_active";
pub const WEBSOCKET_SESSIONS_TOTAL: &str = "gateway_websocket_sessions_total";

/// Install the Prometheus recorder and its HTTP scrape listener on `addr`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// A stream answered by a handler, a proxy or the not-found fallback.
pub fn record_request(kind: &'static str, status: u16) {
    ::metrics::counter!(REQUESTS_TOTAL, "kind" => kind, "status" => status.to_string()).increment(1);
}

/// An upgrade handed to a proxy or protocol engine.
pub fn record_upgrade(target: &str) {
    ::metrics::counter!(UPGRADES_TOTAL, "target" => target.to_string()).increment(1);
}

pub fn record_proxy_error(path: &'static str) {
    ::metrics::counter!(PROXY_ERRORS_TOTAL, "path" => path).increment(1);
}

pub fn connection_opened(protocol: &'static str) {
    ::metrics::counter!(CONNECTIONS_TOTAL, "protocol" => protocol).increment(1);
    ::metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn connection_closed() {
    ::metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn websocket_session_opened() {
    ::metrics::counter!(WEBSOCKET_SESSIONS_TOTAL).increment(1);
    ::metrics::gauge!(WEBSOCKET_SESSIONS_ACTIVE).increment(1.0);
}

pub fn websocket_session_closed() {
    ::metrics::gauge!(WEBSOCKET_SESSIONS_ACTIVE).decrement(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request("handler", 200);
        record_upgrade("websocket");
        record_proxy_error("stream");
        connection_opened("h2");
        connection_closed();
        websocket_session_opened();
        websocket_session_closed();
    }

    #[test]
    fn local_recorder_renders_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            record_request("proxy", 502);
            record_proxy_error("stream");
        });

        let output = handle.render();
        assert!(output.contains(REQUESTS_TOTAL));
        assert!(output.contains("status=\"502\""));
        assert!(output.contains(PROXY_ERRORS_TOTAL));
    }
}
