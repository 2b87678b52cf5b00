//! Where a proxied request goes.
//!
//! # Responsibilities
//! - Model literal and computed destinations
//! - Resolve a destination per request into an [`Upstream`]
//! - Rebuild the outbound request from the resolved header block
//!
//! # Design Decisions
//! - Resolution happens on every request so captures can pick host and port
//! - The outbound path is the resolved `:path`, falling back to the URL's path
//! - HTTP/2 requests drop hop-by-hop headers and `host`; HTTP/1 upgrade
//!   requests keep them because `Connection`/`Upgrade` carry the upgrade

use axum::http::{Method, Request, Uri, Version};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use url::{Position, Url};

use super::headers::{self, HeaderBlock};
use super::upstream;
use super::ProxyError;
use crate::http::response::is_hop_by_hop;
use crate::routing::Captures;

/// Connection options for the upstream leg.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Extra PEM trust anchors on top of the bundled web roots.
    pub ca_file: Option<PathBuf>,
    /// Skip certificate verification entirely.
    pub insecure: bool,
}

/// A resolver's answer.
#[derive(Debug, Clone)]
pub enum Target {
    /// Only the URL changes; headers and options pass through.
    Url(String),
    Resolved(ResolvedTarget),
}

#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub url: String,
    /// Replaces the inbound headers when set.
    pub headers: Option<HeaderBlock>,
    /// Replaces the proxy's options when set.
    pub options: Option<ProxyOptions>,
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Target::Url(url)
    }
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Target::Url(url.to_string())
    }
}

impl From<ResolvedTarget> for Target {
    fn from(target: ResolvedTarget) -> Self {
        Target::Resolved(target)
    }
}

pub type ResolverFn = dyn Fn(&HeaderBlock, &Captures) -> Target + Send + Sync;

#[derive(Clone)]
pub enum Destination {
    Literal(Url),
    Resolver(Arc<ResolverFn>),
}

impl Destination {
    pub fn literal(url: &str) -> Result<Self, ProxyError> {
        parse_url(url).map(Destination::Literal)
    }

    pub fn resolver<F>(resolve: F) -> Self
    where
        F: Fn(&HeaderBlock, &Captures) -> Target + Send + Sync + 'static,
    {
        Destination::Resolver(Arc::new(resolve))
    }

    /// A URL with `$1`..`$9` capture placeholders.
    ///
    /// Without placeholders this is a literal destination. With them, the
    /// substituted URL's path and query also replace `:path`.
    pub fn template(template: &str) -> Result<Self, ProxyError> {
        if !has_placeholders(template) {
            return Self::literal(template);
        }
        // Validate the shape up front with every placeholder filled in.
        parse_url(&substitute(template, &Captures::default(), "0"))?;

        let template = template.to_string();
        Ok(Self::resolver(move |headers, captures| {
            let url = substitute(&template, captures, "");
            let mut headers = headers.clone();
            if let Ok(parsed) = Url::parse(&url) {
                headers.set(headers::PATH, &parsed[Position::BeforePath..Position::AfterQuery]);
                rewrite_authority(&mut headers, &parsed);
            }
            Target::Resolved(ResolvedTarget {
                url,
                headers: Some(headers),
                options: None,
            })
        }))
    }

    /// Resolve against one request.
    pub fn resolve(
        &self,
        inbound: HeaderBlock,
        captures: &Captures,
        options: &ProxyOptions,
    ) -> Result<Upstream, ProxyError> {
        match self {
            Destination::Literal(url) => {
                let mut headers = inbound;
                rewrite_authority(&mut headers, url);
                Ok(Upstream {
                    url: url.clone(),
                    headers,
                    options: options.clone(),
                })
            }
            Destination::Resolver(resolve) => match resolve(&inbound, captures) {
                Target::Url(url) => Ok(Upstream {
                    url: parse_url(&url)?,
                    headers: inbound,
                    options: options.clone(),
                }),
                Target::Resolved(target) => Ok(Upstream {
                    url: parse_url(&target.url)?,
                    headers: target.headers.unwrap_or(inbound),
                    options: target.options.unwrap_or_else(|| options.clone()),
                }),
            },
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Literal(url) => f.debug_tuple("Literal").field(&url.as_str()).finish(),
            Destination::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Literal(url) => f.write_str(url.as_str()),
            Destination::Resolver(_) => f.write_str("<resolver>"),
        }
    }
}

/// A fully resolved upstream for one request.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub url: Url,
    pub headers: HeaderBlock,
    pub options: ProxyOptions,
}

impl Upstream {
    /// `host[:port]` of the URL.
    pub fn authority(&self) -> &str {
        &self.url[Position::BeforeHost..Position::AfterPort]
    }

    /// Path and query to request.
    pub fn path(&self) -> &str {
        match self.headers.get(headers::PATH) {
            Some(path) if !path.is_empty() => path,
            _ => &self.url[Position::BeforePath..Position::AfterQuery],
        }
    }

    fn method(&self, fallback: &str) -> Result<Method, ProxyError> {
        let method = self.headers.get(headers::METHOD).unwrap_or(fallback);
        Method::from_bytes(method.as_bytes())
            .map_err(|e| ProxyError::Request(axum::http::Error::from(e)))
    }

    /// HTTP/2 request in absolute form.
    pub fn h2_request<B>(&self, fallback_method: &Method, body: B) -> Result<Request<B>, ProxyError> {
        let scheme = if upstream::uses_tls(&self.url) { "https" } else { "http" };
        let authority = self
            .headers
            .get(headers::AUTHORITY)
            .unwrap_or_else(|| self.authority());
        let uri: Uri = format!("{scheme}://{authority}{}", self.path())
            .parse()
            .map_err(|e| ProxyError::Request(axum::http::Error::from(e)))?;

        let mut builder = Request::builder()
            .method(self.method(fallback_method.as_str())?)
            .uri(uri)
            .version(Version::HTTP_2);
        for (name, value) in self.headers.regular() {
            if name == headers::HOST || is_hop_by_hop(name) {
                continue;
            }
            builder = builder.header(name, value);
        }
        Ok(builder.body(body)?)
    }

    /// HTTP/1.1 request in origin form, with a `host` header.
    pub fn http1_request<B>(&self, fallback_method: &str, body: B) -> Result<Request<B>, ProxyError> {
        let mut builder = Request::builder()
            .method(self.method(fallback_method)?)
            .uri(self.path())
            .version(Version::HTTP_11);
        if !self.headers.contains(headers::HOST) {
            builder = builder.header(headers::HOST, self.authority());
        }
        for (name, value) in self.headers.regular() {
            builder = builder.header(name, value);
        }
        Ok(builder.body(body)?)
    }
}

fn parse_url(url: &str) -> Result<Url, ProxyError> {
    Url::parse(url).map_err(|source| ProxyError::InvalidDestination {
        url: url.to_string(),
        source,
    })
}

/// Point `host` and `:authority` at `url` when the request carries them.
fn rewrite_authority(headers: &mut HeaderBlock, url: &Url) {
    let authority = &url[Position::BeforeHost..Position::AfterPort];
    for name in [headers::HOST, headers::AUTHORITY] {
        if headers.contains(name) {
            headers.set(name, authority);
        }
    }
}

fn has_placeholders(template: &str) -> bool {
    template
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'$' && w[1].is_ascii_digit())
}

/// Replace `$N` with capture `N`; missing captures become `missing`.
fn substitute(template: &str, captures: &Captures, missing: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek().and_then(|d| d.to_digit(10))) {
            ('$', Some(index)) => {
                chars.next();
                out.push_str(captures.get(index as usize).unwrap_or(missing));
            }
            _ => out.push(c),
        }
    }
    out
}
