//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Check that patterns compile and destinations are URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use regex::Regex;
use std::net::SocketAddr;
use thiserror::Error;

use super::schema::GatewayConfig;
use crate::proxy::Destination;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `proxies[0].path`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.listener.sniff_limit_bytes == 0 {
        errors.push(ValidationError::new("listener.sniff_limit_bytes", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }
    if config.websocket.max_frame_size == 0 {
        errors.push(ValidationError::new("websocket.max_frame_size", "must be greater than 0"));
    }

    for (i, proxy) in config.proxies.iter().enumerate() {
        check_pattern(&mut errors, &format!("proxies[{i}].path"), &proxy.path);
        if let Err(err) = Destination::template(&proxy.destination) {
            errors.push(ValidationError::new(format!("proxies[{i}].destination"), err.to_string()));
        }
        if let Some(ca_file) = &proxy.ca_file {
            if !ca_file.is_file() {
                errors.push(ValidationError::new(
                    format!("proxies[{i}].ca_file"),
                    format!("{} is not a file", ca_file.display()),
                ));
            }
        }
    }

    for (i, mount) in config.static_mounts.iter().enumerate() {
        check_pattern(&mut errors, &format!("static_mounts[{i}].path"), &mount.path);
        if !mount.directory.is_dir() {
            errors.push(ValidationError::new(
                format!("static_mounts[{i}].directory"),
                format!("{} is not a directory", mount.directory.display()),
            ));
        }
    }

    for (i, socket) in config.websockets.iter().enumerate() {
        check_pattern(&mut errors, &format!("websockets[{i}].path"), &socket.path);
        if socket.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("websockets[{i}].name"), "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_pattern(errors: &mut Vec<ValidationError>, field: &str, pattern: &str) {
    if let Err(err) = Regex::new(&format!("^(?:{pattern})$")) {
        errors.push(ValidationError::new(field, err.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ProxyRouteConfig, StaticMountConfig, WebSocketRouteConfig, WebSocketMode};

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.max_connections = 0;
        config.listener.bind_address = "nowhere".into();
        config.proxies.push(ProxyRouteConfig {
            path: "/(".into(),
            destination: "not a url".into(),
            ca_file: None,
            insecure: false,
        });
        config.static_mounts.push(StaticMountConfig {
            path: "/assets/(.*)".into(),
            directory: "/definitely/missing".into(),
        });
        config.websockets.push(WebSocketRouteConfig {
            path: "/ws".into(),
            name: " ".into(),
            mode: WebSocketMode::Echo,
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.max_connections",
                "proxies[0].path",
                "proxies[0].destination",
                "static_mounts[0].directory",
                "websockets[0].name",
            ]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = GatewayConfig::default();
        config.observability.metrics_address = "bad".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
