//! Wraps the method-partitioned [`PathMatcher`] with [`Route`] as the
//! stored value, giving the dispatcher one `register`/`resolve` surface.

use std::collections::HashMap;

use crate::error::ViaductError;
use crate::path::PathMatcher;
use crate::route::Route;
use crate::types::HttpMethods;

/// Wraps the method-partitioned [`PathMatcher`] with [`Route`] as the
/// stored value.
#[derive(Default, Clone)]
pub struct RouteRegistry {
    matcher: PathMatcher<Route>,
}

/// A successfully resolved route, with its path parameters extracted.
pub struct Resolved<'a> {
    /// The matched route.
    pub route: &'a Route,
    /// Path parameters extracted from the concrete path, URL-decoded.
    pub params: HashMap<String, String>,
}

impl RouteRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `route` for `method` under `pattern`. Last registration
    /// for an identical `(method, pattern)` wins (spec §4.1).
    pub fn register(
        &mut self,
        method: HttpMethods,
        pattern: &str,
        mut route: Route,
    ) -> Result<(), ViaductError> {
        route.set_pattern(pattern);
        self.matcher.register(method, pattern, route)
    }

    /// Resolves `(method, path)` against the registered routes.
    pub fn resolve(&self, method: HttpMethods, path: &str) -> Option<Resolved<'_>> {
        let (route, params) = self.matcher.find(&method, path)?;
        Some(Resolved { route, params })
    }

    /// Whether any method has a route registered for `path` — used to
    /// distinguish "no route at all" (404) from "path exists, method
    /// doesn't" (spec §7: bare `OPTIONS` against such a path is 204).
    pub fn path_exists_for_any_method(&self, path: &str) -> bool {
        self.matcher.any_method_matches(path)
    }
}
