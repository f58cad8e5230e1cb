//! The per-request [`Context`]: the free-form name→value map plus the fixed
//! request/response/path/params/query/body/ended fields, and the merge
//! policy that governs how middleware return values flow into it (spec §3).

use std::collections::HashMap;

use ahash::AHashMap;
use serde_json::{Map, Value};

use crate::req::HttpRequest;
use crate::res::HttpResponse;
use crate::types::{HttpMethods, ResponseValue};

/// Names middleware may never write into the free-form map (spec §3).
pub const RESERVED_NAMES: [&str; 6] =
    ["request", "response", "params", "query", "body", "ended"];

/// True if `name` is one of the reserved context keys.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// The per-request context, exclusively owned by the dispatcher for the
/// lifetime of one request.
///
/// Fixed fields never rebind after [`Context::build`]; once [`Context::ended`]
/// is `true`, no further response writes are permitted (enforced by callers,
/// since the finalizer is the only place that writes — see `response.rs`).
pub struct Context {
    /// The underlying request.
    pub request: HttpRequest,
    /// The underlying response writer, mutated in place as middleware and
    /// the handler run.
    pub response: HttpResponse,
    /// The request path with the query string stripped.
    pub pathname: String,
    /// The parsed query string; duplicate keys collapse to last-seen.
    pub query: HashMap<String, String>,
    /// Path parameters, filled in by the dispatcher after route resolution.
    pub params: HashMap<String, String>,
    /// The parsed request body, if a body-parser middleware populated it.
    pub body: Option<Value>,
    ended: bool,
    map: AHashMap<String, Value>,
    pending_response: Option<ResponseValue>,
}

impl Context {
    /// Derives a fresh context from an incoming request (spec §4.3).
    pub fn build(request: HttpRequest) -> Self {
        let pathname = request.path().to_string();
        let query = parse_query(request.raw_query());
        Self {
            request,
            response: HttpResponse::new(),
            pathname,
            query,
            params: HashMap::new(),
            body: None,
            ended: false,
            map: AHashMap::new(),
            pending_response: None,
        }
    }

    /// Whether the response has been finalized. Once `true`, no further
    /// writes to `response` should occur.
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Marks the context ended. Idempotent.
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// The handler's raw return value, if the dispatcher has stashed one —
    /// lets an `onResponse` hook (which only receives the context) observe
    /// "the would-be response payload" before the default finalizer runs
    /// (spec §3, §4.6 steps 10-11).
    pub fn pending_response(&self) -> Option<&ResponseValue> {
        self.pending_response.as_ref()
    }

    /// Stashes the handler's raw return value for `onResponse` hooks to
    /// inspect. Dispatcher-internal; never called by user code.
    pub(crate) fn set_pending_response(&mut self, value: ResponseValue) {
        self.pending_response = Some(value);
    }

    /// Reads a value directly out of the free-form map (no fixed-field
    /// fallback). Used by tests and by the handful of framework-internal
    /// call sites that know exactly where a value lives.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    /// Inserts `name -> value` unconditionally, bypassing the merge policy.
    /// Used by the dispatcher itself (e.g. the GET/DELETE param mirror),
    /// never by user middleware.
    pub(crate) fn set_raw(&mut self, name: impl Into<String>, value: Value) {
        self.map.insert(name.into(), value);
    }

    /// Resolves `name` the way the argument binder does: free-form map
    /// first, then the fixed fields named `params`, `query`, `body`,
    /// `pathname` (spec §4.2). `request`/`response` are not representable
    /// as plain JSON and are handled by the single-parameter `ctx`/`context`
    /// special case instead (spec §4.2).
    pub fn resolve(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.map.get(name) {
            return Some(v.clone());
        }
        match name {
            "params" => Some(map_to_value(&self.params)),
            "query" => Some(map_to_value(&self.query)),
            "body" => self.body.clone(),
            "pathname" => Some(Value::String(self.pathname.clone())),
            _ => None,
        }
    }

    /// Applies the merge policy (spec §3) for one middleware's returned
    /// patch: each key is written unless reserved, or already present with
    /// a defined value (first writer wins).
    pub fn merge_patch(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            if is_reserved(&key) {
                continue;
            }
            self.map.entry(key).or_insert(value);
        }
    }

    /// Mirrors path parameters / body keys into the free-form map per spec
    /// §4.3, after route resolution has filled in `self.params`.
    pub fn mirror_after_route_match(&mut self, method: HttpMethods) {
        if method.mirrors_params() {
            let params = self.params.clone();
            for (key, value) in params {
                if is_reserved(&key) {
                    continue;
                }
                self.map
                    .entry(key)
                    .or_insert_with(|| Value::String(value));
            }
        } else if let Some(Value::Object(body_map)) = self.body.clone() {
            for (key, value) in body_map {
                if is_reserved(&key) {
                    continue;
                }
                self.map.entry(key).or_insert(value);
            }
        }
    }
}

fn map_to_value(map: &HashMap<String, String>) -> Value {
    let mut out = Map::with_capacity(map.len());
    for (k, v) in map {
        out.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(out)
}

/// Parses a raw query string into a mapping, collapsing duplicate keys to
/// last-seen (spec §4.3).
fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if raw.is_empty() {
        return out;
    }
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut it = pair.splitn(2, '=');
        let k = it.next().unwrap_or("");
        let v = it.next().unwrap_or("");
        let k = urlencoding::decode(k).map(|c| c.into_owned()).unwrap_or_else(|_| k.to_string());
        let v = urlencoding::decode(v).map(|c| c.into_owned()).unwrap_or_else(|_| v.to_string());
        out.insert(k, v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::build(HttpRequest::for_test(
            HttpMethods::GET,
            "/users/42",
            "a=1&a=2",
        ))
    }

    #[test]
    fn query_duplicates_collapse_to_last_seen() {
        let c = ctx();
        assert_eq!(c.query.get("a"), Some(&"2".to_string()));
    }

    #[test]
    fn reserved_keys_never_overwritten() {
        let mut c = ctx();
        let mut patch = Map::new();
        patch.insert("params".to_string(), Value::String("hijack".to_string()));
        c.merge_patch(patch);
        assert!(c.get("params").is_none());
    }

    #[test]
    fn first_writer_wins() {
        let mut c = ctx();
        let mut p1 = Map::new();
        p1.insert("step".to_string(), Value::Bool(true));
        c.merge_patch(p1);
        let mut p2 = Map::new();
        p2.insert("step".to_string(), Value::Bool(false));
        c.merge_patch(p2);
        assert_eq!(c.get("step"), Some(&Value::Bool(true)));
    }

    #[test]
    fn get_delete_mirrors_params() {
        let mut c = ctx();
        c.params.insert("id".to_string(), "42".to_string());
        c.mirror_after_route_match(HttpMethods::GET);
        assert_eq!(c.resolve("id"), Some(Value::String("42".to_string())));
    }

    #[test]
    fn post_mirrors_body_not_params() {
        let mut c = ctx();
        c.params.insert("id".to_string(), "42".to_string());
        c.body = Some(serde_json::json!({"name": "X"}));
        c.mirror_after_route_match(HttpMethods::POST);
        assert_eq!(c.resolve("id"), None);
        assert_eq!(c.resolve("name"), Some(Value::String("X".to_string())));
    }
}
