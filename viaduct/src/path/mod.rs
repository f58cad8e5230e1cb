//! Method-partitioned radix matcher: one trie per HTTP method, with
//! literal and single-param-per-node branching. Hand-rolled rather than
//! built on a third-party router crate, since the exact matching and
//! param-extraction semantics (trailing-slash handling,
//! last-registration-wins, URL-decoded params) are this crate's own
//! contract to keep.

use std::collections::HashMap;

use crate::error::ViaductError;
use crate::types::HttpMethods;

/// One segment of a compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_pattern(pattern: &str) -> Result<Vec<Segment>, ViaductError> {
    let trimmed = pattern.trim_start_matches('/').trim_end_matches('/');
    if pattern.is_empty() {
        return Err(ViaductError::invalid_route("route pattern cannot be empty"));
    }
    if trimmed.is_empty() {
        // the root path "/"
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for raw in trimmed.split('/') {
        if raw.is_empty() {
            return Err(ViaductError::invalid_route(format!(
                "route pattern {:?} contains an empty segment",
                pattern
            )));
        }
        if let Some(name) = raw.strip_prefix(':') {
            if !is_identifier(name) {
                return Err(ViaductError::invalid_route(format!(
                    "illegal parameter name {:?} in pattern {:?}",
                    name, pattern
                )));
            }
            out.push(Segment::Param(name.to_string()));
        } else {
            out.push(Segment::Literal(raw.to_string()));
        }
    }
    Ok(out)
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// A single radix node. Branches on literal segments via a hash map; holds
/// at most one parameter branch, since two sibling `:name` segments would be
/// ambiguous (spec §4.1: "parameters never match `/`", one param branch per
/// node).
#[derive(Clone)]
struct Node<T> {
    literal_children: HashMap<String, Node<T>>,
    param_child: Option<(String, Box<Node<T>>)>,
    store: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            literal_children: HashMap::new(),
            param_child: None,
            store: None,
        }
    }
}

impl<T> Node<T> {
    fn insert(&mut self, segments: &[Segment], store: T) {
        match segments.split_first() {
            None => self.store = Some(store),
            Some((Segment::Literal(lit), rest)) => self
                .literal_children
                .entry(lit.clone())
                .or_default()
                .insert(rest, store),
            Some((Segment::Param(name), rest)) => {
                let child = match &mut self.param_child {
                    Some((existing_name, child)) => {
                        *existing_name = name.clone();
                        child
                    }
                    None => {
                        self.param_child = Some((name.clone(), Box::new(Node::default())));
                        &mut self.param_child.as_mut().unwrap().1
                    }
                };
                child.insert(rest, store);
            }
        }
    }

    fn matches<'p>(&self, parts: &[&'p str], params: &mut Vec<(String, &'p str)>) -> Option<&T> {
        match parts.split_first() {
            None => self.store.as_ref(),
            Some((head, rest)) => {
                if let Some(child) = self.literal_children.get(*head) {
                    if let Some(found) = child.matches(rest, params) {
                        return Some(found);
                    }
                }
                if let Some((name, child)) = &self.param_child {
                    params.push((name.clone(), head));
                    if let Some(found) = child.matches(rest, params) {
                        return Some(found);
                    }
                    params.pop();
                }
                None
            }
        }
    }
}

/// A method-partitioned radix tree: one root [`Node`] per HTTP method.
///
/// `register` installs a pattern; `find` resolves `(method, path)` to the
/// stored value plus the URL-decoded path-parameter map. Last registration
/// under a `(method, pattern-shape)` wins (spec §4.1).
#[derive(Clone)]
pub struct PathMatcher<T> {
    roots: HashMap<HttpMethods, Node<T>>,
}

impl<T> Default for PathMatcher<T> {
    fn default() -> Self {
        Self {
            roots: HashMap::new(),
        }
    }
}

impl<T> PathMatcher<T> {
    /// Creates an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `pattern` under `method`, replacing any previous
    /// registration with the identical literal/parameter shape.
    pub fn register(
        &mut self,
        method: HttpMethods,
        pattern: &str,
        store: T,
    ) -> Result<(), ViaductError> {
        let segments = split_pattern(pattern)?;
        self.roots
            .entry(method)
            .or_default()
            .insert(&segments, store);
        Ok(())
    }

    /// Resolves `(method, path)`. `path` must already have its query string
    /// stripped. Trailing slashes are insignificant unless both pattern and
    /// request path end in one — since registration segments a trailing
    /// slash away entirely, this falls out for free here.
    pub fn find<'p>(&self, method: &HttpMethods, path: &'p str) -> Option<(&T, HashMap<String, String>)> {
        let root = self.roots.get(method)?;
        let parts = split_path(path);
        let mut raw_params = Vec::new();
        let found = root.matches(&parts, &mut raw_params)?;
        let params = raw_params
            .into_iter()
            .map(|(name, value)| {
                let decoded = urlencoding::decode(value)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                (name, decoded)
            })
            .collect();
        Some((found, params))
    }

    /// True if `method` has at least one route registered for `path`,
    /// regardless of method — used to distinguish a bare 404 from the
    /// `OPTIONS`-without-handler sentinel the dispatcher maps to 204.
    pub fn any_method_matches(&self, path: &str) -> bool {
        let parts = split_path(path);
        self.roots.values().any(|root| {
            let mut params = Vec::new();
            root.matches(&parts, &mut params).is_some()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        let mut m = PathMatcher::new();
        m.register(HttpMethods::GET, "/ping", 1u32).unwrap();
        let (store, params) = m.find(&HttpMethods::GET, "/ping").unwrap();
        assert_eq!(*store, 1);
        assert!(params.is_empty());
    }

    #[test]
    fn param_match_and_decoding() {
        let mut m = PathMatcher::new();
        m.register(HttpMethods::GET, "/users/:id", 1u32).unwrap();
        let (_, params) = m.find(&HttpMethods::GET, "/users/john%20doe").unwrap();
        assert_eq!(params.get("id"), Some(&"john doe".to_string()));
    }

    #[test]
    fn trailing_slash_insignificant_unless_both() {
        let mut m = PathMatcher::new();
        m.register(HttpMethods::GET, "/a/b", 1u32).unwrap();
        assert!(m.find(&HttpMethods::GET, "/a/b/").is_some());
        assert!(m.find(&HttpMethods::GET, "/a/b").is_some());
    }

    #[test]
    fn missing_method_is_no_match() {
        let mut m = PathMatcher::new();
        m.register(HttpMethods::GET, "/ping", 1u32).unwrap();
        assert!(m.find(&HttpMethods::POST, "/ping").is_none());
    }

    #[test]
    fn param_never_matches_slash() {
        let mut m = PathMatcher::new();
        m.register(HttpMethods::GET, "/a/:id", 1u32).unwrap();
        assert!(m.find(&HttpMethods::GET, "/a/b/c").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let mut m = PathMatcher::new();
        m.register(HttpMethods::GET, "/x/:id", 1u32).unwrap();
        m.register(HttpMethods::GET, "/x/:name", 2u32).unwrap();
        let (store, params) = m.find(&HttpMethods::GET, "/x/42").unwrap();
        assert_eq!(*store, 2);
        assert_eq!(params.get("name"), Some(&"42".to_string()));
    }

    #[test]
    fn empty_pattern_is_invalid_route() {
        let mut m: PathMatcher<u32> = PathMatcher::new();
        assert!(m.register(HttpMethods::GET, "", 1).is_err());
    }

    #[test]
    fn illegal_param_name_is_invalid_route() {
        let mut m: PathMatcher<u32> = PathMatcher::new();
        assert!(m.register(HttpMethods::GET, "/x/:1bad", 1).is_err());
    }
}
