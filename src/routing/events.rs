//! Failure events raised while dispatching.
//!
//! Handler panics, proxy failures and protocol panics never escape the
//! router. They are logged and published on a broadcast channel so the
//! embedding application can observe them.

use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// What was running when the failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    Handler,
    Proxy,
    Protocol(String),
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Handler => write!(f, "handler"),
            EventSource::Proxy => write!(f, "proxy"),
            EventSource::Protocol(name) => write!(f, "protocol:{}", name),
        }
    }
}

/// A contained dispatch failure.
#[derive(Debug, Clone)]
pub struct RouterEvent {
    pub method: String,
    pub path: String,
    pub source: EventSource,
    /// Pattern or destination that was handling the exchange.
    pub target: String,
    pub error: String,
}

/// Publishing side of the router's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<RouterEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.tx.subscribe()
    }

    /// Log and publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: RouterEvent) {
        tracing::error!(
            method = %event.method,
            path = %event.path,
            source = %event.source,
            target = %event.target,
            error = %event.error,
            "Dispatch failed"
        );
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
