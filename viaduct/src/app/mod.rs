//! The `App` builder surface: the public entry point for registering
//! routes, middleware, plugins, decorations, and lifecycle hooks, then
//! starting the server.
//!
//! A struct accumulating registrations via `&mut self` builder methods,
//! with `start` as the terminal call that hands everything to the
//! connection-serving layer (`handler.rs`), which routes every request
//! through a single [`crate::dispatcher::Dispatcher`].

#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::callable::{from_context_fn, Compiled};
use crate::context::{is_reserved, Context};
use crate::dispatcher::Dispatcher;
use crate::error::{ViaductError, ViaductErrorKind};
use crate::hooks::{ErrorHook, Hooks};
use crate::middleware::MiddlewareEntry;
use crate::plugin::Plugin;
use crate::registry::RouteRegistry;
use crate::route::{Route, RouteConfig};
use crate::types::{HttpMethods, ResponseValue};

pub mod handler;

fn route_cache_key(method: HttpMethods, pattern: &str) -> String {
    format!("{method} {pattern}")
}

/// The application under construction. Not `Clone`; build it once, then
/// call [`App::start`].
pub struct App {
    registry: RouteRegistry,
    registered_paths: Vec<(HttpMethods, String)>,
    global_middleware: Vec<MiddlewareEntry>,
    hooks: Hooks,
    decorations: AHashMap<String, Value>,
    route_configs: Vec<(HttpMethods, String, RouteConfig)>,
    concurrency_limit: usize,
    request_timeout: Option<Duration>,
    host: String,
    graceful_shutdown: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// An app with no routes, middleware, or hooks, and the defaults spec
    /// §5's concurrency model documents (concurrency limit 100, no
    /// request timeout, host `0.0.0.0`).
    pub fn new() -> Self {
        Self {
            registry: RouteRegistry::new(),
            registered_paths: Vec::new(),
            global_middleware: Vec::new(),
            hooks: Hooks::default(),
            decorations: AHashMap::new(),
            route_configs: Vec::new(),
            concurrency_limit: 100,
            request_timeout: None,
            host: "0.0.0.0".to_string(),
            graceful_shutdown: true,
        }
    }

    /// Overrides the concurrency limit (spec §5). Default 100.
    pub fn concurrency_limit(&mut self, limit: usize) -> &mut Self {
        self.concurrency_limit = limit;
        self
    }

    /// Sets the per-request deadline (spec §5). Absent by default (no
    /// timeout enforced).
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the bind host. Default `0.0.0.0`.
    pub fn host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = host.into();
        self
    }

    /// The configured bind host, for the worker-pool envelope (`cluster`
    /// module) which is not a submodule of `app` and so can't reach the
    /// private field directly.
    pub(crate) fn bind_host(&self) -> &str {
        &self.host
    }

    /// `(route key, ttl, capacity)` for every route that declared a
    /// `cache_ttl`, for the worker-pool envelope's primary-side
    /// `CacheCoordinator` (spec §4.8: "the cache is owned by the primary
    /// process"). Capacity mirrors the fixed bound [`App::build_dispatcher`]
    /// uses for an in-process route cache.
    pub(crate) fn route_cache_configs(&self) -> Vec<(String, Duration, usize)> {
        self.route_configs
            .iter()
            .filter_map(|(method, pattern, config)| {
                config
                    .cache_ttl
                    .map(|ttl| (route_cache_key(*method, pattern), ttl, 1024))
            })
            .collect()
    }

    /// Enables or disables the graceful-shutdown signal listener. Enabled
    /// by default.
    pub fn with_graceful_shutdown(&mut self, enabled: bool) -> &mut Self {
        self.graceful_shutdown = enabled;
        self
    }

    /// Registers a route with no route-local middleware or cache policy.
    pub fn route(
        &mut self,
        method: HttpMethods,
        pattern: &str,
        handler: Compiled,
    ) -> Result<&mut Self, ViaductError> {
        self.registry
            .register(method, pattern, Route::new(handler))?;
        self.registered_paths.push((method, pattern.to_string()));
        Ok(self)
    }

    /// Registers a route with route-local middleware and/or a cache/schema
    /// configuration (spec §4.5/§6).
    pub fn route_with(
        &mut self,
        method: HttpMethods,
        pattern: &str,
        middleware: Vec<MiddlewareEntry>,
        handler: Compiled,
        config: RouteConfig,
    ) -> Result<&mut Self, ViaductError> {
        let mut route = Route::new(handler).with_config(config.clone());
        for entry in middleware {
            route = route.with_middleware(entry);
        }
        self.registry.register(method, pattern, route)?;
        self.registered_paths.push((method, pattern.to_string()));
        if config.cache_ttl.is_some() {
            self.route_configs.push((method, pattern.to_string(), config));
        }
        Ok(self)
    }

    /// Whether a route is registered for `(method, pattern)` — a coarse
    /// introspection helper for plugins and tests, not a path-matching
    /// query (use the running dispatcher for that).
    pub fn has_route(&self, method: HttpMethods, pattern: &str) -> bool {
        self.registered_paths
            .iter()
            .any(|(m, p)| *m == method && p == pattern)
    }

    /// Registers global middleware applied under `path_prefix` (`"/"` for
    /// every route), in registration order (spec §4.4).
    pub fn middleware(&mut self, path_prefix: impl Into<String>, compiled: Compiled) -> &mut Self {
        self.global_middleware
            .push(MiddlewareEntry::new(path_prefix, compiled));
        self
    }

    /// Registers an `onRequest` hook.
    pub fn on_request(&mut self, compiled: Compiled) -> &mut Self {
        self.hooks.on_request(compiled);
        self
    }

    /// Registers an `onResponse` hook.
    pub fn on_response(&mut self, compiled: Compiled) -> &mut Self {
        self.hooks.on_response(compiled);
        self
    }

    /// Registers the `onError` hook, replacing any previous one.
    pub fn on_error(&mut self, hook: ErrorHook) -> &mut Self {
        self.hooks.set_on_error(hook);
        self
    }

    /// Decorates the context with a fixed `name -> value` pair present on
    /// every request before any middleware runs. Errors if `name` is
    /// reserved or already decorated (spec: `AlreadyDecorated`).
    pub fn decorate(&mut self, name: &str, value: Value) -> Result<&mut Self, ViaductError> {
        if is_reserved(name) {
            return Err(ViaductError::invalid_route(format!(
                "cannot decorate reserved name {:?}",
                name
            )));
        }
        if self.decorations.contains_key(name) {
            return Err(ViaductError::new(
                ViaductErrorKind::AlreadyDecorated,
                format!("{:?} is already decorated", name),
            ));
        }
        self.decorations.insert(name.to_string(), value);
        Ok(self)
    }

    /// Absorbs a plugin's registrations, passing `options` through (spec
    /// §6: `plugin(plugin, options?)`). Registration may be asynchronous;
    /// this awaits it before returning, so the plugin's setup has fully
    /// landed by the time the call completes — no route/middleware/hook it
    /// registers can be missing when `start` later begins serving.
    pub async fn plugin(&mut self, plugin: &dyn Plugin, options: Value) -> &mut Self {
        plugin.register(self, options).await;
        self
    }

    fn decoration_middleware(&self) -> Option<MiddlewareEntry> {
        if self.decorations.is_empty() {
            return None;
        }
        let decorations = self.decorations.clone();
        let compiled = from_context_fn(move |mut ctx: Context| {
            let decorations = decorations.clone();
            async move {
                for (key, value) in decorations {
                    ctx.set_raw(key, value);
                }
                (ctx, ResponseValue::None)
            }
        });
        Some(MiddlewareEntry::new("/", compiled))
    }

    /// Builds the immutable [`Dispatcher`] this app's registrations
    /// describe. Consumes nothing (the app can still be introspected
    /// afterward); called by [`App::start`] and by tests that want to
    /// dispatch requests directly without binding a socket.
    pub fn build_dispatcher(&self) -> Dispatcher {
        let mut global_middleware = Vec::new();
        if let Some(entry) = self.decoration_middleware() {
            global_middleware.push(entry);
        }
        global_middleware.extend(self.global_middleware.iter().cloned());

        let mut route_caches: HashMap<String, Arc<ResponseCache>> = HashMap::new();
        for (method, pattern, config) in &self.route_configs {
            if let Some(ttl) = config.cache_ttl {
                route_caches.insert(
                    route_cache_key(*method, pattern),
                    Arc::new(ResponseCache::new(ttl, 1024)),
                );
            }
        }

        Dispatcher::new(
            self.registry.clone(),
            global_middleware,
            self.hooks.clone(),
            self.concurrency_limit,
            self.request_timeout,
            route_caches,
        )
    }

    /// Binds `port` on the configured host and serves requests until a
    /// shutdown signal arrives (if graceful shutdown is enabled) or
    /// forever otherwise.
    pub async fn start(self, port: u16) -> Result<(), ViaductError> {
        handler::serve(self, port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::req::HttpRequest;

    #[test]
    fn decorate_rejects_reserved_names() {
        let mut app = App::new();
        assert!(app.decorate("body", Value::Null).is_err());
    }

    #[test]
    fn decorate_rejects_duplicates() {
        let mut app = App::new();
        app.decorate("tenant", Value::String("a".into())).unwrap();
        assert!(app.decorate("tenant", Value::String("b".into())).is_err());
    }

    #[test]
    fn has_route_reflects_registration() {
        let mut app = App::new();
        let handler = from_context_fn(|c: Context| async move { (c, ResponseValue::None) });
        app.route(HttpMethods::GET, "/x", handler).unwrap();
        assert!(app.has_route(HttpMethods::GET, "/x"));
        assert!(!app.has_route(HttpMethods::POST, "/x"));
    }

    #[tokio::test]
    async fn decorated_value_visible_to_handler() {
        let mut app = App::new();
        app.decorate("tenant", Value::String("acme".into())).unwrap();
        let handler = from_context_fn(|c: Context| async move {
            assert_eq!(c.get("tenant"), Some(&Value::String("acme".into())));
            (c, ResponseValue::None)
        });
        app.route(HttpMethods::GET, "/x", handler).unwrap();
        let dispatcher = app.build_dispatcher();
        let _ = dispatcher
            .dispatch(HttpRequest::for_test(HttpMethods::GET, "/x", ""))
            .await;
    }
}
