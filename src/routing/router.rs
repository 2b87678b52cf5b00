//! Route registration and dispatch.
//!
//! # Responsibilities
//! - Collect method routes, proxies and upgrade protocols at startup
//! - Dispatch HTTP/2 streams and sniffed upgrade requests
//! - Contain handler, proxy and protocol failures
//!
//! # Design Decisions
//! - [`RouterBuilder`] is the only way to register; [`Router`] is immutable
//!   and shared through `Arc` once traffic starts
//! - Proxies are consulted before method routes and protocols
//! - Once a handler starts the exchange counts as handled, even if it fails

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::events::{EventSink, EventSource, RouterEvent};
use super::resolver::{Captures, PatternResolver, RouteError, RouteMatch};
use crate::http::response;
use crate::net::rewind::RawSocket;
use crate::net::sniff::UpgradeRequest;
use crate::observability::metrics;
use crate::protocol::Protocol;
use crate::proxy::{Destination, Proxy, ProxyOptions};

/// A local request handler.
///
/// Implemented for any `Fn(Request<Body>, Captures) -> impl Future<Output = impl IntoResponse>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request<Body>, captures: Captures) -> BoxFuture<'static, Response<Body>>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request<Body>, Captures) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn call(&self, request: Request<Body>, captures: Captures) -> BoxFuture<'static, Response<Body>> {
        let fut = (self)(request, captures);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// Outcome of [`Router::dispatch_upgrade`].
pub enum UpgradeOutcome {
    Handled,
    /// Nothing matched; the request and socket go back to the caller.
    Unhandled(UpgradeRequest, RawSocket),
}

impl UpgradeOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, UpgradeOutcome::Handled)
    }
}

/// Registration phase of a [`Router`].
pub struct RouterBuilder {
    routes: Vec<(Method, String, Arc<dyn Handler>)>,
    proxies: Vec<(String, Destination, ProxyOptions)>,
    protocols: Vec<(String, Arc<dyn Protocol>)>,
    events: EventSink,
}

macro_rules! method_shorthand {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Register a `", stringify!($method), "` route.")]
            pub fn $name<H: Handler>(self, pattern: &str, handler: H) -> Self {
                self.route(Method::$method, pattern, handler)
            }
        )*
    };
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            proxies: Vec::new(),
            protocols: Vec::new(),
            events: EventSink::new(),
        }
    }

    /// Register `handler` for `method` requests whose path matches `pattern`.
    pub fn route<H: Handler>(mut self, method: Method, pattern: &str, handler: H) -> Self {
        self.routes.push((method, pattern.to_string(), Arc::new(handler)));
        self
    }

    method_shorthand! {
        get => GET,
        post => POST,
        put => PUT,
        patch => PATCH,
        delete => DELETE,
        head => HEAD,
        options => OPTIONS,
        connect => CONNECT,
        trace => TRACE,
    }

    /// Forward both streams and upgrades on matching paths to `destination`.
    pub fn proxy(mut self, pattern: &str, destination: Destination, options: ProxyOptions) -> Self {
        self.proxies.push((pattern.to_string(), destination, options));
        self
    }

    /// Hand upgrade requests on matching paths to `protocol`.
    pub fn upgrade(mut self, pattern: &str, protocol: Arc<dyn Protocol>) -> Self {
        self.protocols.push((pattern.to_string(), protocol));
        self
    }

    /// Compile every pattern and freeze the tables.
    pub fn build(self) -> Result<Router, RouteError> {
        let mut routes: HashMap<Method, PatternResolver<Arc<dyn Handler>>> = HashMap::new();
        for (method, pattern, handler) in self.routes {
            routes.entry(method).or_default().add(&pattern, handler)?;
        }

        let mut proxies = PatternResolver::new();
        for (pattern, destination, options) in self.proxies {
            let proxy = Proxy::new(destination, options, self.events.clone());
            proxies.add(&pattern, Arc::new(proxy))?;
        }

        let mut protocols = PatternResolver::new();
        for (pattern, protocol) in self.protocols {
            protocols.add(&pattern, protocol)?;
        }

        tracing::debug!(
            methods = routes.len(),
            proxies = proxies.len(),
            protocols = protocols.len(),
            "Router built"
        );

        Ok(Router {
            routes,
            proxies,
            protocols,
            events: self.events,
        })
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable routing table.
pub struct Router {
    routes: HashMap<Method, PatternResolver<Arc<dyn Handler>>>,
    proxies: PatternResolver<Arc<Proxy>>,
    protocols: PatternResolver<Arc<dyn Protocol>>,
    events: EventSink,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Receive dispatch failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Route an HTTP/2 stream. `None` means nothing matched.
    pub async fn dispatch_stream(&self, request: Request<Body>) -> Option<Response<Body>> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if let Some(RouteMatch { captures, value, pattern }) = self.proxies.find(&path) {
            let proxy = Arc::clone(value);
            let failure = Failure::new(EventSource::Proxy, method.as_str(), &path, pattern);
            tracing::debug!(method = %method, path = %path, upstream = %proxy.describe(), "Proxying stream");
            let response = self
                .contain(async move { proxy.forward_stream(request, captures).await }, failure)
                .await;
            metrics::record_request("proxy", response.status().as_u16());
            return Some(response);
        }

        let RouteMatch { captures, value, pattern } = self.routes.get(&method)?.find(&path)?;
        let handler = Arc::clone(value);
        let failure = Failure::new(EventSource::Handler, method.as_str(), &path, pattern);
        tracing::debug!(method = %method, path = %path, pattern = %pattern, "Dispatching to handler");
        let response = self
            .contain(async move { handler.call(request, captures).await }, failure)
            .await;
        metrics::record_request("handler", response.status().as_u16());
        Some(response)
    }

    /// Route a sniffed upgrade request. Runs the matched target to completion.
    pub async fn dispatch_upgrade(&self, request: UpgradeRequest, socket: RawSocket) -> UpgradeOutcome {
        let route_path = request.route_path().to_string();

        if let Some(RouteMatch { captures, value, pattern }) = self.proxies.find(&route_path) {
            let proxy = Arc::clone(value);
            let failure = Failure::new(EventSource::Proxy, &request.method, &route_path, pattern);
            tracing::debug!(path = %request.path, upstream = %proxy.describe(), "Tunneling upgrade");
            metrics::record_upgrade("proxy");
            self.contain(async move { proxy.forward_upgrade(request, socket, captures).await }, failure)
                .await;
            return UpgradeOutcome::Handled;
        }

        if let Some(RouteMatch { captures, value, pattern }) = self.protocols.find(&route_path) {
            let protocol = Arc::clone(value);
            let source = EventSource::Protocol(protocol.name().to_string());
            let failure = Failure::new(source, &request.method, &route_path, pattern);
            tracing::debug!(path = %request.path, protocol = %protocol.name(), "Upgrading connection");
            metrics::record_upgrade(protocol.name());
            self.contain(protocol.upgrade(request, socket, captures), failure).await;
            return UpgradeOutcome::Handled;
        }

        UpgradeOutcome::Unhandled(request, socket)
    }

    /// Run `fut`, turning a panic into an event and a fallback value.
    async fn contain<F, T>(&self, fut: F, failure: Failure) -> T
    where
        F: Future<Output = T>,
        T: Contained,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(value) => value,
            Err(panic) => {
                self.events.emit(failure.into_event(panic_message(panic.as_ref())));
                T::fallback()
            }
        }
    }
}

/// Value produced when a dispatched future panics.
trait Contained {
    fn fallback() -> Self;
}

impl Contained for Response<Body> {
    fn fallback() -> Self {
        response::internal_error()
    }
}

impl Contained for () {
    fn fallback() -> Self {}
}

/// Event details captured before a dispatched future runs.
struct Failure {
    source: EventSource,
    method: String,
    path: String,
    target: String,
}

impl Failure {
    fn new(source: EventSource, method: &str, path: &str, target: &str) -> Self {
        Self {
            source,
            method: method.to_string(),
            path: path.to_string(),
            target: target.to_string(),
        }
    }

    fn into_event(self, error: String) -> RouterEvent {
        RouterEvent {
            method: self.method,
            path: self.path,
            source: self.source,
            target: self.target,
            error,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
