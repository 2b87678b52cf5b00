//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::protocol::websocket::assembler::DEFAULT_MAX_FRAME_SIZE;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS, detection limits).
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Defaults for every WebSocket endpoint.
    pub websocket: WebSocketConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Proxy routes, in precedence order.
    pub proxies: Vec<ProxyRouteConfig>,

    /// Static directories, in precedence order.
    pub static_mounts: Vec<StaticMountConfig>,

    /// WebSocket endpoints, in precedence order.
    pub websockets: Vec<WebSocketRouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest HTTP/1.x request head read while looking for an upgrade.
    pub sniff_limit_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            tls: None,
            max_connections: 10_000,
            sniff_limit_bytes: 16 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest accepted frame or reassembled message, in bytes.
    pub max_frame_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long open connections may drain after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}

/// A proxied path pattern.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyRouteConfig {
    /// Anchored regular expression over the request path.
    pub path: String,

    /// Upstream URL; `$1`..`$9` are replaced with the path captures.
    pub destination: String,

    /// Extra trust anchors for TLS upstreams (PEM).
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Skip upstream certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

/// A directory served under a path pattern.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticMountConfig {
    /// Pattern whose first capture group is the file path, e.g. `/assets/(.*)`.
    pub path: String,

    pub directory: PathBuf,
}

/// A WebSocket endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSocketRouteConfig {
    pub path: String,

    /// Name used in logs and metrics.
    #[serde(default = "default_websocket_name")]
    pub name: String,

    #[serde(default)]
    pub mode: WebSocketMode,
}

fn default_websocket_name() -> String {
    "websocket".to_string()
}

/// What a configured endpoint does with incoming messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSocketMode {
    /// Send every message back to its sender.
    #[default]
    Echo,
    /// Send every message to all sessions of the endpoint.
    Broadcast,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8443");
        assert_eq!(config.listener.sniff_limit_bytes, 16 * 1024);
        assert_eq!(config.websocket.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.proxies.is_empty());
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn full_document_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9443"
            max_connections = 64
            tls = { cert_path = "cert.pem", key_path = "key.pem" }

            [observability]
            log_level = "debug"
            json_logs = true

            [[proxies]]
            path = "/server2/(.*)/(.*)"
            destination = "https://localhost:$1/$2"
            ca_file = "ca.pem"

            [[static_mounts]]
            path = "/assets/(.*)"
            directory = "public"

            [[websockets]]
            path = "/chat"
            name = "chat"
            mode = "broadcast"

            [[websockets]]
            path = "/echo"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.max_connections, 64);
        assert!(config.listener.tls.is_some());
        assert!(config.observability.json_logs);
        assert_eq!(config.proxies[0].ca_file.as_deref(), Some(std::path::Path::new("ca.pem")));
        assert!(!config.proxies[0].insecure);
        assert_eq!(config.websockets[0].mode, WebSocketMode::Broadcast);
        assert_eq!(config.websockets[1].mode, WebSocketMode::Echo);
        assert_eq!(config.websockets[1].name, "websocket");
    }
}
