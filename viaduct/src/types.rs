//! Shared small types used across the crate: the HTTP method enum and the
//! tagged response-value union handlers/middleware return.

use std::fmt::Display;

use crate::error::ViaductError;

/// The HTTP methods the router dispatches on.
#[derive(Eq, Hash, PartialEq, Clone, Copy, Debug)]
pub enum HttpMethods {
    /// `GET`
    GET,
    /// `POST`
    POST,
    /// `PUT`
    PUT,
    /// `HEAD`
    HEAD,
    /// `DELETE`
    DELETE,
    /// `PATCH`
    PATCH,
    /// `OPTIONS`
    OPTIONS,
}

impl HttpMethods {
    /// Mirrors a path parameter is mirrored into the free-form context map
    /// for this method (spec §4.3: `GET`/`DELETE` mirror params; other
    /// methods mirror the body instead).
    pub fn mirrors_params(self) -> bool {
        matches!(self, HttpMethods::GET | HttpMethods::DELETE)
    }
}

impl From<&hyper::Method> for HttpMethods {
    fn from(method: &hyper::Method) -> Self {
        match *method {
            hyper::Method::GET => HttpMethods::GET,
            hyper::Method::POST => HttpMethods::POST,
            hyper::Method::PUT => HttpMethods::PUT,
            hyper::Method::DELETE => HttpMethods::DELETE,
            hyper::Method::PATCH => HttpMethods::PATCH,
            hyper::Method::HEAD => HttpMethods::HEAD,
            hyper::Method::OPTIONS => HttpMethods::OPTIONS,
            _ => HttpMethods::GET,
        }
    }
}

impl Display for HttpMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let method = match self {
            HttpMethods::GET => "GET",
            HttpMethods::PUT => "PUT",
            HttpMethods::POST => "POST",
            HttpMethods::DELETE => "DELETE",
            HttpMethods::PATCH => "PATCH",
            HttpMethods::HEAD => "HEAD",
            HttpMethods::OPTIONS => "OPTIONS",
        };
        write!(f, "{}", method)
    }
}

/// The tagged union a handler or middleware may return (spec §9 Design
/// Notes: "callable variadic return shapes").
#[derive(Debug, Clone)]
pub enum ResponseValue {
    /// Merge these keys into the context's free-form map; no response sent.
    ContextPatch(serde_json::Map<String, serde_json::Value>),
    /// `Content-Type: text/html; charset=utf-8`.
    Html(String),
    /// `Content-Type: text/plain; charset=utf-8`.
    Text(String),
    /// Delegated to the static-serving collaborator; 501 if none registered.
    File(std::path::PathBuf),
    /// Serialized as `application/json`.
    Json(serde_json::Value),
    /// A failure raised by a handler or middleware (spec §4.4/§7): stops
    /// the chain it was returned from immediately and propagates to the
    /// dispatcher's error boundary, which runs the `onError` hook instead
    /// of merging or finalizing this value.
    Error(ViaductError),
    /// No-op: the handler already wrote the response directly.
    None,
}

impl ResponseValue {
    /// Builds a [`ResponseValue::Json`] from any `Serialize` value.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(ResponseValue::Json(serde_json::to_value(value)?))
    }
}

impl From<serde_json::Value> for ResponseValue {
    fn from(value: serde_json::Value) -> Self {
        // A bare JSON object is the common case of a middleware/handler
        // return value that should be merged as a context patch when it
        // arrives through the middleware runner; handlers route through
        // `ResponseValue::Json` explicitly via `into_response`, so this
        // conversion is only used by the merge-policy call sites.
        match value {
            serde_json::Value::Object(map) => ResponseValue::ContextPatch(map),
            other => ResponseValue::Json(other),
        }
    }
}
