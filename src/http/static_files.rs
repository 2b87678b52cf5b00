//! Static file serving under a route pattern.
//!
//! # Responsibilities
//! - Map a request path (or the pattern's first capture) onto a base directory
//! - Answer GET, HEAD and OPTIONS
//! - Pick a content type from the file extension
//!
//! # Design Decisions
//! - Only regular files are served; directories and missing files are 404
//! - Paths containing `..` never leave the base directory, they are 404

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::io::ReaderStream;

use super::response;
use crate::routing::{Captures, RouterBuilder};

const ALLOWED_METHODS: &str = "OPTIONS, HEAD, GET";

#[derive(Debug, Error)]
pub enum StaticError {
    #[error("static path {0:?} must be a directory")]
    NotADirectory(PathBuf),
}

/// A directory served read-only.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    base: PathBuf,
}

impl StaticFiles {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, StaticError> {
        let base = base.into();
        if !base.is_dir() {
            return Err(StaticError::NotADirectory(base));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Register GET, HEAD and OPTIONS routes for `pattern` on `router`.
    pub fn mount(self, router: RouterBuilder, pattern: &str) -> RouterBuilder {
        let files = Arc::new(self);
        let handler = move |request: Request<Body>, captures: Captures| {
            let files = Arc::clone(&files);
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            async move { files.serve(&method, &path, &captures).await }
        };
        router
            .get(pattern, handler.clone())
            .head(pattern, handler.clone())
            .options(pattern, handler)
    }

    /// Answer one request. `path` is used when the pattern has no capture group.
    pub async fn serve(&self, method: &Method, path: &str, captures: &Captures) -> Response<Body> {
        let relative = captures.get(1).unwrap_or(path);
        let Some(file) = self.locate(relative) else {
            return response::not_found();
        };

        let len = match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return response::not_found(),
        };

        match *method {
            Method::OPTIONS => {
                let mut response = Response::new(Body::empty());
                response
                    .headers_mut()
                    .insert("accept", HeaderValue::from_static(ALLOWED_METHODS));
                response
            }
            Method::HEAD => with_type(Response::new(Body::empty()), &file),
            Method::GET => match tokio::fs::File::open(&file).await {
                Ok(handle) => {
                    let body = Body::from_stream(ReaderStream::new(handle));
                    let mut response = with_type(Response::new(body), &file);
                    response
                        .headers_mut()
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
                    response
                }
                Err(err) => {
                    tracing::warn!(file = ?file, error = %err, "Static file read failed");
                    response::not_found()
                }
            },
            _ => response::text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        }
    }

    fn locate(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.base.join(relative))
    }
}

fn with_type(mut response: Response<Body>, file: &Path) -> Response<Body> {
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(file)));
    response
}

/// Content type for `file` by extension, `text/plain` when unknown.
pub fn content_type(file: &Path) -> &'static str {
    match file.extension().and_then(|e| e.to_str()) {
        Some("js" | "mjs") => "text/javascript",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("apng") => "image/apng",
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        Some("ico" | "cur") => "image/x-icon",
        Some("jpeg" | "jpg" | "jfif" | "pjpeg" | "pjp") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("tif" | "tiff") => "image/tiff",
        Some("webp") => "image/webp",
        _ => "text/plain",
    }
}
