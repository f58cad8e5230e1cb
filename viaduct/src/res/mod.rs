//! The outgoing-response half of the fixed context fields.
//!
//! A fluent builder (`.status(..).json(...)`, `.ok().text(...)`), with no
//! cookies, compression, or streaming support: streaming/SSE are out of
//! scope for this core, and cookies are a collaborator concern it doesn't
//! pin down.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{HeaderMap, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The body payload carried by an [`HttpResponse`] before finalization.
#[derive(Debug, Clone)]
pub(crate) enum Body {
    Empty,
    Text(String),
    Html(String),
    Json(Value),
    Binary(Bytes),
}

/// A response under construction. Handlers and middleware build one of
/// these fluently; the [`crate::response`] finalizer is the only thing
/// that turns it into bytes on the wire.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    headers_sent: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    /// A fresh response: status 200, empty body, no headers set.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Body::Empty,
            headers_sent: false,
        }
    }

    /// Sets an arbitrary numeric status code.
    pub fn status(mut self, code: u16) -> Self {
        self.status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
        self
    }

    /// 200 OK.
    pub fn ok(self) -> Self {
        self.status(200)
    }

    /// 201 Created.
    pub fn created(self) -> Self {
        self.status(201)
    }

    /// 204 No Content.
    pub fn no_content(self) -> Self {
        self.status(204)
    }

    /// 400 Bad Request.
    pub fn bad_request(self) -> Self {
        self.status(400)
    }

    /// 401 Unauthorized.
    pub fn unauthorized(self) -> Self {
        self.status(401)
    }

    /// 404 Not Found.
    pub fn not_found(self) -> Self {
        self.status(404)
    }

    /// 408 Request Timeout.
    pub fn request_timeout(self) -> Self {
        self.status(408)
    }

    /// 413 Payload Too Large.
    pub fn payload_too_large(self) -> Self {
        self.status(413)
    }

    /// 500 Internal Server Error.
    pub fn internal_server_error(self) -> Self {
        self.status(500)
    }

    /// 501 Not Implemented.
    pub fn not_implemented(self) -> Self {
        self.status(501)
    }

    /// Sets a response header, overwriting any prior value of the same name.
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::from_bytes(name.as_bytes()),
            hyper::header::HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Plain-text body (`text/plain; charset=utf-8`).
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Body::Text(text.into());
        self
    }

    /// HTML body (`text/html; charset=utf-8`).
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.body = Body::Html(html.into());
        self
    }

    /// JSON body (`application/json`), serialized from any `Serialize` value.
    pub fn json<T: serde::Serialize>(mut self, value: T) -> Self {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.body = Body::Json(v);
        self
    }

    /// Raw binary body (`application/octet-stream`).
    pub fn binary(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = Body::Binary(bytes.into());
        self
    }

    /// Whether this response has already been flushed to the wire. The
    /// finalizer sets this via [`HttpResponse::mark_sent`]; it is the
    /// "headers already sent" gate spec §4.6/§7 requires.
    pub fn is_sent(&self) -> bool {
        self.headers_sent
    }

    /// Marks the response as sent. Idempotent; called exactly once by the
    /// finalizer.
    pub fn mark_sent(&mut self) {
        self.headers_sent = true;
    }

    /// Renders this response into a Hyper response ready to write to the
    /// wire. Does not itself check `is_sent` — callers (the finalizer) own
    /// that invariant.
    pub fn into_hyper_response(self) -> Response<Full<Bytes>> {
        let (content_type, bytes): (&str, Bytes) = match self.body {
            Body::Empty => ("text/plain; charset=utf-8", Bytes::new()),
            Body::Text(t) => ("text/plain; charset=utf-8", Bytes::from(t)),
            Body::Html(h) => ("text/html; charset=utf-8", Bytes::from(h)),
            Body::Json(v) => (
                "application/json",
                Bytes::from(serde_json::to_vec(&v).unwrap_or_default()),
            ),
            Body::Binary(b) => ("application/octet-stream", b),
        };

        let mut builder = Response::builder().status(self.status);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
            if !headers.contains_key(hyper::header::CONTENT_TYPE) {
                headers.insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(content_type),
                );
            }
        }
        builder.body(Full::from(bytes)).unwrap_or_else(|_| {
            Response::new(Full::from(Bytes::from_static(b"response build failure")))
        })
    }

    /// Renders this response's status and body into a wire-transferable,
    /// serializable shape (spec §4.8/§4.9: the cross-process cache
    /// coordinator exchanges cached response payloads over a message
    /// channel, which cannot carry a live [`hyper::HeaderMap`]).
    /// Headers are not carried across the channel — a cached hit served
    /// from a worker's [`crate::cluster::WorkerCacheClient`] reconstructs
    /// status and body only, which is all the route cache's contract
    /// (spec §4.8: "serialized response payload") requires.
    pub fn to_cached(&self) -> CachedResponse {
        let (content_type, body): (&str, Vec<u8>) = match &self.body {
            Body::Empty => ("text/plain; charset=utf-8", Vec::new()),
            Body::Text(t) => ("text/plain; charset=utf-8", t.clone().into_bytes()),
            Body::Html(h) => ("text/html; charset=utf-8", h.clone().into_bytes()),
            Body::Json(v) => (
                "application/json",
                serde_json::to_vec(v).unwrap_or_default(),
            ),
            Body::Binary(b) => ("application/octet-stream", b.to_vec()),
        };
        CachedResponse {
            status: self.status.as_u16(),
            content_type: content_type.to_string(),
            body,
        }
    }

    /// Rebuilds an [`HttpResponse`] from a [`CachedResponse`] previously
    /// produced by [`HttpResponse::to_cached`].
    pub fn from_cached(cached: CachedResponse) -> Self {
        let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
        let mut response = Self::new().status(status.as_u16());
        response.body = Body::Binary(Bytes::from(cached.body));
        response = response.set_header("content-type", &cached.content_type);
        response
    }
}

/// The serializable projection of an [`HttpResponse`] exchanged across the
/// worker-pool envelope's cache IPC channel (spec §4.8/§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// The content type the finalizer would otherwise have derived.
    pub content_type: String,
    /// The serialized response body.
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_200() {
        let res = HttpResponse::new();
        assert_eq!(res.status, StatusCode::OK);
    }

    #[test]
    fn builder_chains() {
        let res = HttpResponse::new().created().text("hi");
        assert_eq!(res.status, StatusCode::CREATED);
        assert!(matches!(res.body, Body::Text(ref s) if s == "hi"));
    }
}
