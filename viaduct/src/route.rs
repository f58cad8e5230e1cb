//! A registered route: its compiled handler, route-local middleware, and
//! the optional per-route configuration (response cache TTL, a
//! validation schema). A [`Route`] bundles its own middleware chain and
//! cache policy rather than relying purely on global, app-wide
//! middleware, since the cache ties to a specific route rather than the
//! whole app.

use std::time::Duration;

use crate::callable::Compiled;
use crate::middleware::MiddlewareEntry;

/// Per-route configuration (spec §4.5/§6): an optional cache TTL and an
/// optional schema name a body-parser/validator collaborator can key off
/// of. The core does not interpret `schema` itself (validation is a
/// collaborator concern per spec §1); it is carried through so a
/// validator middleware registered against the route can look it up.
#[derive(Clone, Default)]
pub struct RouteConfig {
    /// How long a cached response for this route remains valid. `None`
    /// disables caching for the route.
    pub cache_ttl: Option<Duration>,
    /// An opaque schema identifier a validator collaborator may consult.
    pub schema: Option<String>,
}

/// One compiled route: the handler plus any route-local middleware that
/// runs after the app-wide chain and before the handler itself.
#[derive(Clone)]
pub struct Route {
    handler: Compiled,
    middleware: Vec<MiddlewareEntry>,
    config: RouteConfig,
    /// The pattern this route was registered under (e.g. `"/users/:id"`),
    /// filled in by [`crate::registry::RouteRegistry::register`]. Used to
    /// key the route-level response cache on the route's *registered
    /// shape* rather than the concrete request path — two requests to
    /// `/users/42` and `/users/7` must address the same cache, and hence
    /// the same `"METHOD pattern"` key, not two different ones.
    pattern: String,
}

impl Route {
    /// Builds a route with no route-local middleware and default config.
    /// `pattern` is empty until [`RouteRegistry::register`] fills it in.
    pub fn new(handler: Compiled) -> Self {
        Self {
            handler,
            middleware: Vec::new(),
            config: RouteConfig::default(),
            pattern: String::new(),
        }
    }

    /// Appends a route-local middleware entry, run after the app-wide
    /// chain for requests matching this route.
    pub fn with_middleware(mut self, entry: MiddlewareEntry) -> Self {
        self.middleware.push(entry);
        self
    }

    /// Sets the route's cache/schema configuration.
    pub fn with_config(mut self, config: RouteConfig) -> Self {
        self.config = config;
        self
    }

    /// The route-local middleware chain.
    pub fn middleware(&self) -> &[MiddlewareEntry] {
        &self.middleware
    }

    /// The compiled handler.
    pub fn handler(&self) -> &Compiled {
        &self.handler
    }

    /// The route's configuration.
    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// Sets the registered pattern. Called once by
    /// [`crate::registry::RouteRegistry::register`]; not part of the
    /// public builder surface since a route's pattern is a property of
    /// where it was registered, not something a caller sets directly.
    pub(crate) fn set_pattern(&mut self, pattern: &str) {
        self.pattern = pattern.to_string();
    }

    /// The pattern this route was registered under.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
