//! Forwarding of HTTP/2 streams.

use axum::body::Body;
use axum::http::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};

use super::headers::HeaderBlock;
use super::upstream::{self, Alpn};
use super::{Proxy, ProxyError};
use crate::http::response;
use crate::routing::Captures;

impl Proxy {
    /// Forward `request` upstream and relay the answer.
    ///
    /// Any failure before the upstream response head arrives becomes a
    /// `502` with an empty `text/plain` body.
    pub async fn forward_stream(&self, request: Request<Body>, captures: Captures) -> Response<Body> {
        let method = request.method().to_string();
        let path = request.uri().path().to_string();

        match self.exchange(request, &captures).await {
            Ok(response) => response,
            Err(err) => {
                self.report("stream", &method, &path, &err);
                response::bad_gateway()
            }
        }
    }

    async fn exchange(&self, request: Request<Body>, captures: &Captures) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = request.into_parts();
        let upstream = self.resolve(HeaderBlock::from_parts(&parts), captures)?;
        let outbound = upstream.h2_request(&parts.method, body)?;

        let io = upstream::connect(&upstream.url, &upstream.options, Alpn::H2).await?;
        let (mut sender, connection) =
            hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(io)).await?;

        let url = upstream.url.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(upstream = %url, error = %err, "Upstream connection ended with error");
            }
        });

        tracing::debug!(upstream = %upstream.url, path = %upstream.path(), "Forwarding stream");
        let response = sender.send_request(outbound).await?;

        // The connection task exits once `sender` is gone and the body is drained.
        let (mut parts, body) = response.into_parts();
        response::strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
