//! The end-to-end request dispatch choreography (spec §4.6).
//!
//! Ties together route resolution, the global and route-local middleware
//! chains, the argument-bound handler, the response finalizer, the hook
//! lists, the concurrency gate, and the route cache into the single
//! `dispatch` entry point the connection-serving layer (`app/handler.rs`)
//! calls per request.
//!
//! Order of operations (spec §4.6, §2): acquire the concurrency gate, run
//! `onRequest` hooks, run global middleware, resolve the route, mirror
//! params/body, run route middleware, resolve the cache-or-compute step,
//! run `onResponse` hooks against the handler's raw return value, then
//! finalize. A failure raised anywhere before the handler returns (an
//! `onRequest`/middleware/handler `ResponseValue::Error`, or no matching
//! route) short-circuits straight to the `onError` hook and skips
//! `onResponse` entirely — that hook only ever observes a successful
//! handler return (spec §3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;

use crate::cache::{canonical_key, ComputeSlot, ResponseCache};
use crate::cluster::WorkerCacheClient;
use crate::concurrency::ConcurrencyGate;
use crate::context::Context;
use crate::error::{ViaductError, ViaductErrorKind};
use crate::hooks::Hooks;
use crate::middleware::{self, MiddlewareEntry};
use crate::registry::RouteRegistry;
use crate::req::HttpRequest;
use crate::response;
use crate::route::Route;
use crate::types::{HttpMethods, ResponseValue};

/// How long a compute-slot follower waits on one `notified()` poll before
/// re-checking the cache itself. Bounds the lost-wakeup window rather than
/// eliminating it: a missed `notify_waiters()` costs at most this long
/// instead of hanging the follower forever.
const FOLLOWER_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The immutable collaborators a dispatcher needs; built once by
/// [`crate::app::App::build_dispatcher`] and shared (via `Arc`) across every
/// connection.
pub struct Dispatcher {
    registry: RouteRegistry,
    global_middleware: Vec<MiddlewareEntry>,
    hooks: Hooks,
    gate: ConcurrencyGate,
    request_timeout: Option<Duration>,
    route_caches: HashMap<String, Arc<ResponseCache>>,
    /// Set only on a cluster worker (spec §4.9); when present, a cache
    /// miss consults the primary's authoritative cache over the IPC
    /// protocol before this worker computes its own value, and a computed
    /// value is mirrored to the primary the same way (spec §4.8).
    worker_cache: Option<Arc<WorkerCacheClient>>,
}

/// An error raised anywhere before the handler's return value is in hand,
/// carrying the context it failed with back to the error boundary.
type Failure = (Context, ViaductError);

/// Rebuilds a raw query string from the parsed map. Key order is not the
/// original wire order, which only matters to the one caller that uses this
/// (reconstructing a context after a timed-out handler call dropped the
/// original request).
fn requery(query: &HashMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

impl Dispatcher {
    /// Assembles a dispatcher from its parts. `route_caches` maps a route's
    /// registration key (`"METHOD pattern"`, see
    /// [`crate::app::route_cache_key`]) to its cache, for routes that
    /// declared a `cache_ttl`.
    pub fn new(
        registry: RouteRegistry,
        global_middleware: Vec<MiddlewareEntry>,
        hooks: Hooks,
        concurrency_limit: usize,
        request_timeout: Option<Duration>,
        route_caches: HashMap<String, Arc<ResponseCache>>,
    ) -> Self {
        Self {
            registry,
            global_middleware,
            hooks,
            gate: ConcurrencyGate::new(concurrency_limit.max(1)),
            request_timeout,
            route_caches,
            worker_cache: None,
        }
    }

    /// Wires a cross-process cache client into this dispatcher (spec
    /// §4.8/§4.9). Called by the worker-pool envelope (`cluster.rs`) when
    /// this process is a cluster worker; a single-process `App::start`
    /// never calls this, so its route caches stay purely in-process.
    pub fn with_worker_cache(mut self, client: Arc<WorkerCacheClient>) -> Self {
        self.worker_cache = Some(client);
        self
    }

    /// The current in-flight request count (spec §5 observability).
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Dispatches one request end to end, producing the final Hyper
    /// response. The concurrency permit is acquired before anything else
    /// runs and held for the rest of this method's stack frame (spec §5:
    /// "acquired before dispatch begins, released in a finally clause").
    pub async fn dispatch(&self, request: HttpRequest) -> hyper::Response<Full<Bytes>> {
        let _permit = self.gate.acquire().await;
        let method = request.method();
        let ctx = Context::build(request);

        let ctx = match self.hooks.run_on_request(ctx).await {
            Ok(ctx) => ctx,
            Err((ctx, err)) => return self.fail(err, ctx).await,
        };
        if ctx.ended() {
            return self.finish(ctx, None).await;
        }

        let ctx = match middleware::run_chain(&self.global_middleware, ctx).await {
            Ok(ctx) => ctx,
            Err((ctx, err)) => return self.fail(err, ctx).await,
        };
        if ctx.ended() {
            return self.finish(ctx, None).await;
        }

        let mut ctx = ctx;
        let (route, params) = match self.registry.resolve(method, &ctx.pathname) {
            Some(r) => (r.route.clone(), r.params),
            None => {
                let err = if method == HttpMethods::OPTIONS
                    && self.registry.path_exists_for_any_method(&ctx.pathname)
                {
                    ViaductError::new(ViaductErrorKind::MethodOnlyOptions, "no handler for OPTIONS")
                } else {
                    ViaductError::not_found(format!("Route {method} {} not found", ctx.pathname))
                };
                return self.fail(err, ctx).await;
            }
        };

        ctx.params = params;
        ctx.mirror_after_route_match(method);

        let ctx = match middleware::run_chain(route.middleware(), ctx).await {
            Ok(ctx) => ctx,
            Err((ctx, err)) => return self.fail(err, ctx).await,
        };
        if ctx.ended() {
            return self.finish(ctx, None).await;
        }

        // Keyed on the route's *registered pattern* (e.g. `"GET /users/:id"`),
        // matching how `App::build_dispatcher` populates `route_caches` —
        // using the concrete request path here would miss every
        // parameterized route entirely, and a literal route whenever the
        // request path carried a trailing slash the pattern didn't.
        let route_key = self.cache_route_key(method, route.pattern());
        let cache_key = route.config().cache_ttl.map(|_| canonical_key(&ctx.pathname, &ctx.query));
        let cache = cache_key.as_ref().and_then(|_| self.route_caches.get(&route_key));

        let outcome = match (method, cache, cache_key) {
            (HttpMethods::GET, Some(cache), Some(key)) => {
                self.serve_cached(&route_key, cache, key, &route, ctx).await
            }
            _ => self.invoke_handler(&route, ctx).await,
        };

        match outcome {
            Ok((ctx, value)) => self.finish(ctx, value).await,
            Err((ctx, err)) => self.fail(err, ctx).await,
        }
    }

    /// Resolves the cache-or-compute step (spec §4.8) for a `GET` route
    /// with a cache TTL. A live entry serves its bytes directly. On a
    /// miss, this worker first asks the primary's authoritative cache (if
    /// running as a cluster worker — spec §4.8/§4.9) before contending
    /// locally for the per-key compute slot: the leader invokes the
    /// handler, finalizes its value into bytes, installs them in the
    /// local cache (and mirrors them to the primary), and wakes
    /// followers; followers await the leader and re-check the cache
    /// rather than invoking the handler themselves (spec §4.8/§5: "ensure
    /// at-most-one in-flight computation").
    async fn serve_cached(
        &self,
        route_key: &str,
        cache: &Arc<ResponseCache>,
        key: String,
        route: &Route,
        mut ctx: Context,
    ) -> Result<(Context, Option<ResponseValue>), Failure> {
        loop {
            if let Some(cached) = cache.get(&key) {
                ctx.response = cached;
                ctx.end();
                return Ok((ctx, None));
            }
            if let Some(client) = &self.worker_cache {
                if let Some(cached) = client.get(route_key, &key).await {
                    cache.put(key.clone(), cached.clone());
                    ctx.response = cached;
                    ctx.end();
                    return Ok((ctx, None));
                }
            }
            match cache.begin_compute(&key) {
                ComputeSlot::Leader => {
                    let (mut ctx, value) = self.invoke_handler(route, ctx).await?;
                    if let Some(v) = &value {
                        response::finalize(&mut ctx, v.clone());
                    }
                    cache.put(key.clone(), ctx.response.clone());
                    if let Some(client) = &self.worker_cache {
                        client.set(route_key, &key, ctx.response.clone()).await;
                    }
                    cache.finish_compute(&key);
                    return Ok((ctx, value));
                }
                ComputeSlot::Follower(notify) => {
                    // `notify_waiters` wakes only tasks already polling
                    // `notified()`; if the leader finishes between our
                    // `begin_compute` and this await, the wakeup is gone
                    // and nothing would otherwise resume us. Bound the
                    // wait and re-loop on expiry so we re-check the cache
                    // (now populated) instead of hanging forever.
                    let _ = tokio::time::timeout(FOLLOWER_POLL_INTERVAL, notify.notified()).await;
                    continue;
                }
            }
        }
    }

    /// Invokes the route's handler through its compiled binder, honoring
    /// the per-request deadline. Returns the raw [`ResponseValue`]
    /// un-finalized — `onResponse` hooks must see the handler's return
    /// value before the finalizer runs (spec §4.6 steps 9-11) — unless the
    /// handler itself signals a failure, in which case that propagates to
    /// the dispatcher's error boundary exactly like a failing middleware
    /// (spec §4.4, §7).
    async fn invoke_handler(
        &self,
        route: &Route,
        ctx: Context,
    ) -> Result<(Context, Option<ResponseValue>), Failure> {
        let handler = route.handler().clone();
        let method = ctx.request.method();
        let pathname = ctx.pathname.clone();
        let query_string = requery(&ctx.query);
        let call = handler(ctx);
        match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok((ctx, value)) => Self::split_handler_value(ctx, value),
                Err(_) => {
                    // The timed-out call owns (and dropped, along with) the
                    // original context; rebuild one carrying the same
                    // method/path/query so the `onResponse` hooks and the
                    // caller see a context consistent with the request that
                    // actually timed out.
                    let mut ctx =
                        Context::build(HttpRequest::for_test(method, &pathname, &query_string));
                    // The message is the literal wire body (spec §6: 408
                    // body `{"error":"Request timeout"}`), not an internal
                    // description — unlike most other `ViaductError`
                    // messages, this one is directly observable.
                    let err = ViaductError::new(ViaductErrorKind::Timeout, "Request timeout");
                    ctx.response = ctx
                        .response
                        .request_timeout()
                        .json(serde_json::json!({ "error": err.message }));
                    ctx.end();
                    Ok((ctx, None))
                }
            },
            None => {
                let (ctx, value) = call.await;
                Self::split_handler_value(ctx, value)
            }
        }
    }

    fn split_handler_value(
        ctx: Context,
        value: ResponseValue,
    ) -> Result<(Context, Option<ResponseValue>), Failure> {
        match value {
            ResponseValue::Error(err) => Err((ctx, err)),
            other => Ok((ctx, Some(other))),
        }
    }

    /// Runs the `onError` hook for `err`, then finalizes. `onResponse`
    /// hooks do not run on this path — they only observe a handler's
    /// successful return value (spec §3).
    async fn fail(&self, err: ViaductError, ctx: Context) -> hyper::Response<Full<Bytes>> {
        let mut ctx = self.hooks.run_on_error(err, ctx).await;
        if !ctx.ended() {
            ctx.end();
        }
        ctx.response.into_hyper_response()
    }

    /// Runs `onResponse` hooks (which can observe `value` via
    /// [`Context::pending_response`] and may end the response themselves to
    /// skip the default finalizer — spec §4.6 steps 10-11), then finalizes
    /// if nothing has ended the response yet.
    async fn finish(
        &self,
        mut ctx: Context,
        value: Option<ResponseValue>,
    ) -> hyper::Response<Full<Bytes>> {
        if let Some(value) = value.clone() {
            ctx.set_pending_response(value);
        }
        let mut ctx = self.hooks.run_on_response(ctx).await;
        if !ctx.ended() {
            response::finalize(&mut ctx, value.unwrap_or(ResponseValue::None));
        }
        ctx.response.into_hyper_response()
    }

    fn cache_route_key(&self, method: HttpMethods, pathname: &str) -> String {
        format!("{method} {pathname}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::from_context_fn;
    use crate::route::{Route, RouteConfig};
    use crate::types::ResponseValue;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    fn registry_with_ping() -> RouteRegistry {
        let mut registry = RouteRegistry::new();
        let handler = from_context_fn(|mut c: Context| async move {
            let value = ResponseValue::Json(serde_json::json!({"message": "pong"}));
            (c, value)
        });
        registry
            .register(HttpMethods::GET, "/ping", Route::new(handler))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let dispatcher = Dispatcher::new(
            registry_with_ping(),
            Vec::new(),
            Hooks::default(),
            8,
            None,
            HashMap::new(),
        );
        let req = HttpRequest::for_test(HttpMethods::GET, "/ping", "");
        let res = dispatcher.dispatch(req).await;
        assert_eq!(res.status(), hyper::StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let dispatcher = Dispatcher::new(
            RouteRegistry::new(),
            Vec::new(),
            Hooks::default(),
            8,
            None,
            HashMap::new(),
        );
        let req = HttpRequest::for_test(HttpMethods::GET, "/nope", "");
        let res = dispatcher.dispatch(req).await;
        assert_eq!(res.status(), hyper::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn global_middleware_runs_even_when_route_is_not_found() {
        let seen = Arc::new(AtomicBool::new(false));
        let seen_handle = Arc::clone(&seen);
        let global = vec![MiddlewareEntry::new(
            "/",
            from_context_fn(move |c: Context| {
                let seen = Arc::clone(&seen_handle);
                async move {
                    seen.store(true, Ordering::SeqCst);
                    (c, ResponseValue::None)
                }
            }),
        )];
        let dispatcher = Dispatcher::new(
            RouteRegistry::new(),
            global,
            Hooks::default(),
            8,
            None,
            HashMap::new(),
        );
        let req = HttpRequest::for_test(HttpMethods::GET, "/missing", "");
        let res = dispatcher.dispatch(req).await;
        assert_eq!(res.status(), hyper::StatusCode::NOT_FOUND);
        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn throwing_middleware_stops_the_chain_and_skips_the_handler() {
        let global = vec![MiddlewareEntry::new(
            "/",
            from_context_fn(|c: Context| async move {
                (c, ResponseValue::Error(ViaductError::application("boom")))
            }),
        )];
        let mut registry = RouteRegistry::new();
        let handler = from_context_fn(|_: Context| async move {
            panic!("handler must not run after a middleware error");
        });
        registry
            .register(HttpMethods::GET, "/guarded", Route::new(handler))
            .unwrap();
        let dispatcher =
            Dispatcher::new(registry, global, Hooks::default(), 8, None, HashMap::new());
        let res = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/guarded", ""))
            .await;
        assert_eq!(res.status(), hyper::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_timeout_yields_408() {
        let mut registry = RouteRegistry::new();
        let handler = from_context_fn(|c: Context| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            (c, ResponseValue::None)
        });
        registry
            .register(HttpMethods::GET, "/slow", Route::new(handler))
            .unwrap();
        let dispatcher = Dispatcher::new(
            registry,
            Vec::new(),
            Hooks::default(),
            8,
            Some(Duration::from_millis(5)),
            HashMap::new(),
        );
        let req = HttpRequest::for_test(HttpMethods::GET, "/slow", "");
        let res = dispatcher.dispatch(req).await;
        assert_eq!(res.status(), hyper::StatusCode::REQUEST_TIMEOUT);
        let body = http_body_util::BodyExt::collect(res.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(body.as_ref(), br#"{"error":"Request timeout"}"#);
    }

    #[tokio::test]
    async fn cached_route_serves_second_hit_without_recompute() {
        let mut registry = RouteRegistry::new();
        let counter = Arc::new(AtomicU64::new(0));
        let c2 = Arc::clone(&counter);
        let handler = from_context_fn(move |c: Context| {
            let counter = Arc::clone(&c2);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (c, ResponseValue::Json(serde_json::json!({"n": 1})))
            }
        });
        registry
            .register(
                HttpMethods::GET,
                "/cached",
                Route::new(handler).with_config(RouteConfig {
                    cache_ttl: Some(Duration::from_secs(60)),
                    schema: None,
                }),
            )
            .unwrap();
        let mut caches = HashMap::new();
        caches.insert(
            "GET /cached".to_string(),
            Arc::new(ResponseCache::new(Duration::from_secs(60), 16)),
        );
        let dispatcher = Dispatcher::new(registry, Vec::new(), Hooks::default(), 8, None, caches);

        let _ = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/cached", ""))
            .await;
        let _ = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/cached", ""))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_parameterized_route_serves_repeat_requests_without_recompute() {
        let mut registry = RouteRegistry::new();
        let counter = Arc::new(AtomicU64::new(0));
        let c2 = Arc::clone(&counter);
        let handler = from_context_fn(move |c: Context| {
            let counter = Arc::clone(&c2);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (c, ResponseValue::Json(serde_json::json!({"n": 1})))
            }
        });
        registry
            .register(
                HttpMethods::GET,
                "/users/:id",
                Route::new(handler).with_config(RouteConfig {
                    cache_ttl: Some(Duration::from_secs(60)),
                    schema: None,
                }),
            )
            .unwrap();
        // Keyed by the registered pattern, the same shape `App::build_dispatcher`
        // uses — not by any concrete request path.
        let mut caches = HashMap::new();
        caches.insert(
            "GET /users/:id".to_string(),
            Arc::new(ResponseCache::new(Duration::from_secs(60), 16)),
        );
        let dispatcher = Dispatcher::new(registry, Vec::new(), Hooks::default(), 8, None, caches);

        let _ = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/users/42", ""))
            .await;
        let _ = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/users/42", ""))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // A distinct concrete path under the same pattern still selects the
        // cache (and gets its own entry within it, keyed on the concrete path).
        let _ = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/users/7", ""))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let _ = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/users/7", ""))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_on_same_key_compute_only_once() {
        let mut registry = RouteRegistry::new();
        let counter = Arc::new(AtomicU64::new(0));
        let c2 = Arc::clone(&counter);
        let handler = from_context_fn(move |c: Context| {
            let counter = Arc::clone(&c2);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                (c, ResponseValue::Json(serde_json::json!({"n": 1})))
            }
        });
        registry
            .register(
                HttpMethods::GET,
                "/racy",
                Route::new(handler).with_config(RouteConfig {
                    cache_ttl: Some(Duration::from_secs(60)),
                    schema: None,
                }),
            )
            .unwrap();
        let mut caches = HashMap::new();
        caches.insert(
            "GET /racy".to_string(),
            Arc::new(ResponseCache::new(Duration::from_secs(60), 16)),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            Vec::new(),
            Hooks::default(),
            8,
            None,
            caches,
        ));

        let d1 = Arc::clone(&dispatcher);
        let d2 = Arc::clone(&dispatcher);
        let (r1, r2) = tokio::join!(
            d1.dispatch(HttpRequest::for_test(HttpMethods::GET, "/racy", "")),
            d2.dispatch(HttpRequest::for_test(HttpMethods::GET, "/racy", ""))
        );
        assert_eq!(r1.status(), hyper::StatusCode::OK);
        assert_eq!(r2.status(), hyper::StatusCode::OK);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
