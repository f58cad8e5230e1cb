//! The argument binder (spec §4.2).
//!
//! Rust has no runtime reflection over a closure's parameter names, so the
//! name list a callable declares has to be explicit rather than discovered.
//! This crate offers the typed-struct form Design Notes §9 calls out:
//! `#[derive(FromContext)]` on a struct whose field names are the
//! parameter names. The derive (in `viaduct-derive`) expands to an impl of
//! [`FromContext`] below; it validates each field name against the
//! identifier grammar and the reserved words at *compile* time (the derive
//! macro itself rejects bad names), and the generated `from_context` body
//! performs exactly the map-then-fixed-fields lookup spec §4.2 specifies.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::Context;

/// Context keys a parameter name may not take, because
/// [`Context::resolve`] has no fixed-field fallback for them: `request`
/// and `response` aren't JSON-representable (the single `ctx`/`context`
/// parameter special case is the only way to reach them), and `ended` is
/// dispatcher-internal bookkeeping, not request data.
///
/// This is a narrower set than [`crate::context::RESERVED_NAMES`], which
/// also includes `params`, `query`, and `body` — those three *are* valid
/// parameter names (spec scenario 3: a handler may declare `(params,
/// body)`), since `Context::resolve` explicitly falls back to them. The
/// merge-policy reserved set (`is_reserved`, used to gate what middleware
/// may write into the free-form map) and the binder's valid-parameter-name
/// set answer different questions: the former is about protecting fixed
/// fields from being shadowed by middleware return values, the latter is
/// about which names can be looked up for injection at all.
const UNRESOLVABLE_AS_PARAM: &[&str] = &["request", "response", "ended"];

/// Rust keywords a parameter name may never collide with — rejecting these
/// up front keeps the derive from ever generating a field named `fn`,
/// `type`, etc. (spec §4.2: "rejects the reserved words of the target
/// language").
pub const RESERVED_IDENTIFIERS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for",
    "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use",
    "where", "while", "async", "await", "dyn",
];

/// Validates a candidate parameter name against the identifier grammar
/// `[A-Za-z_][A-Za-z0-9_]*`, the language's reserved words, and the
/// reserved context keys. A name failing this check should cause the whole
/// callable to fall back to a single-argument context binder (spec §4.2);
/// the derive macro instead treats it as a hard compile error, since there
/// is no dynamic fallback path for a statically-typed field.
pub fn is_valid_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    starts_ok
        && rest_ok
        && !RESERVED_IDENTIFIERS.contains(&name)
        && !UNRESOLVABLE_AS_PARAM.contains(&name)
}

/// Failure extracting a value from the context under its declared name.
#[derive(Debug, Clone)]
pub struct BindError {
    /// The parameter name that failed to resolve.
    pub name: String,
    /// A human-readable reason.
    pub reason: String,
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to bind parameter {:?}: {}", self.name, self.reason)
    }
}

impl std::error::Error for BindError {}

/// Implemented by a typed struct whose field names are, by convention, the
/// parameter names a handler or middleware declares. Generated by
/// `#[derive(FromContext)]`; see `viaduct-derive`.
pub trait FromContext: Sized {
    /// The declared parameter names, in struct-field order. Used for
    /// registration-time validation and the route's binder introspection;
    /// not consulted at dispatch time (the generated `from_context` body
    /// already knows which names to look up).
    fn param_names() -> &'static [&'static str];

    /// Extracts and constructs `Self` from the context, following the
    /// lookup order of spec §4.2: free-form map, then fixed fields.
    fn from_context(ctx: &Context) -> Result<Self, BindError>;
}

/// Helper the generated `from_context` bodies call per required field:
/// resolves `name`, then deserializes it into `T`.
pub fn bind_required<T: DeserializeOwned>(ctx: &Context, name: &str) -> Result<T, BindError> {
    match ctx.resolve(name) {
        Some(value) => from_value(name, value),
        None => Err(BindError {
            name: name.to_string(),
            reason: "no value present in context or fixed fields".to_string(),
        }),
    }
}

/// Helper for `Option<T>` fields: absent resolves to `None` rather than an
/// error (spec §4.2: "or absent if unresolved").
pub fn bind_optional<T: DeserializeOwned>(
    ctx: &Context,
    name: &str,
) -> Result<Option<T>, BindError> {
    match ctx.resolve(name) {
        Some(value) => from_value(name, value).map(Some),
        None => Ok(None),
    }
}

fn from_value<T: DeserializeOwned>(name: &str, value: Value) -> Result<T, BindError> {
    serde_json::from_value(value).map_err(|e| BindError {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// A dynamic, non-derive-macro binder for the "ordered name list" form
/// Design Notes §9 also allows: validated once at registration, then
/// resolved into a `Vec<Value>` (missing entries become `Value::Null`) in
/// declaration order, handed to a closure that destructures it itself.
/// Used by `NamedMiddleware` for ad hoc middleware that doesn't warrant a
/// dedicated struct.
#[derive(Clone)]
pub struct NameList {
    names: Vec<&'static str>,
}

impl NameList {
    /// Validates and stores `names`. Returns an error if any name is not a
    /// valid parameter identifier.
    pub fn new(names: &[&'static str]) -> Result<Self, crate::error::ViaductError> {
        for name in names {
            if !is_valid_parameter_name(name) {
                return Err(crate::error::ViaductError::invalid_route(format!(
                    "invalid parameter name {:?}",
                    name
                )));
            }
        }
        Ok(Self {
            names: names.to_vec(),
        })
    }

    /// Resolves every declared name against the context, in order.
    pub fn resolve_all(&self, ctx: &Context) -> Vec<Value> {
        self.names
            .iter()
            .map(|n| ctx.resolve(n).unwrap_or(Value::Null))
            .collect()
    }

    /// The declared names, in order.
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_names_with_no_fixed_field_fallback() {
        assert!(!is_valid_parameter_name("request"));
        assert!(!is_valid_parameter_name("response"));
        assert!(!is_valid_parameter_name("ended"));
    }

    #[test]
    fn accepts_fixed_field_names_resolve_supports() {
        // spec scenario 3: a handler may declare `(params, body)`.
        assert!(is_valid_parameter_name("params"));
        assert!(is_valid_parameter_name("body"));
        assert!(is_valid_parameter_name("query"));
        assert!(is_valid_parameter_name("pathname"));
    }

    #[test]
    fn rejects_language_keywords() {
        assert!(!is_valid_parameter_name("fn"));
        assert!(!is_valid_parameter_name("type"));
    }

    #[test]
    fn rejects_non_identifiers() {
        assert!(!is_valid_parameter_name("1bad"));
        assert!(!is_valid_parameter_name("has-dash"));
        assert!(!is_valid_parameter_name(""));
    }

    #[test]
    fn accepts_normal_names() {
        assert!(is_valid_parameter_name("id"));
        assert!(is_valid_parameter_name("user_id"));
        assert!(is_valid_parameter_name("_private"));
    }
}
