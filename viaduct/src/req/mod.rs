//! The incoming-request half of the fixed context fields: method, path,
//! raw query, headers, and the raw body bytes a body-parser middleware
//! consumes. Cookies, form-data, multipart parsing, and XHR sniffing are
//! all collaborator concerns and live outside this core.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{HeaderMap, Request, Uri};

use crate::error::ViaductError;
use crate::types::HttpMethods;

/// The inbound request, captured once per connection accept.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: HttpMethods,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl HttpRequest {
    /// Converts a live Hyper request into an [`HttpRequest`], collecting the
    /// full body into memory. Body-size enforcement is a body-parser
    /// collaborator's job (spec §1); the core only carries the bytes.
    pub async fn from_hyper_request(
        req: Request<Incoming>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Self, ViaductError> {
        let (parts, body) = req.into_parts();
        let collected = body
            .collect()
            .await
            .map_err(|e| ViaductError::application(format!("failed to read body: {e}")))?;
        Ok(Self {
            method: HttpMethods::from(&parts.method),
            uri: parts.uri,
            headers: parts.headers,
            body: collected.to_bytes(),
            remote_addr,
        })
    }

    /// Builds a request for unit tests without going through Hyper.
    pub fn for_test(method: HttpMethods, path: &str, query: &str) -> Self {
        let full = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        Self {
            method,
            uri: full.parse().unwrap_or_else(|_| Uri::from_static("/")),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    /// The canonical upper-case HTTP method.
    pub fn method(&self) -> HttpMethods {
        self.method
    }

    /// The request path, query stripped.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The raw (still percent-encoded) query string, empty if absent.
    pub fn raw_query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// A single header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw request body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// The peer address, if known (absent in unit tests).
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Content-Length as reported by the body collected so far.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

/// Parses a `Content-Type: application/x-www-form-urlencoded` or JSON body
/// into a flat string map — a minimal stand-in for the body-parser
/// collaborator plugins (spec §1), used only by the bundled smoke tests.
pub fn parse_urlencoded(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body)
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_split() {
        let req = HttpRequest::for_test(HttpMethods::GET, "/users/42?a=1", "");
        assert_eq!(req.path(), "/users/42");
        assert_eq!(req.raw_query(), "a=1");
    }
}
