//! The middleware chain and its runner.
//!
//! A middleware entry pairs a path prefix (applies to every route whose
//! path starts with the declared prefix) with a [`Compiled`] callable.
//! The runner invokes each matching entry in registration order, checking
//! `ctx.ended()` after every call so a middleware that writes the
//! response directly short-circuits the rest of the chain.

use crate::callable::Compiled;
use crate::context::Context;
use crate::error::ViaductError;
use crate::types::ResponseValue;

/// One registered middleware: a path prefix and the compiled callable.
#[derive(Clone)]
pub struct MiddlewareEntry {
    path_prefix: String,
    compiled: Compiled,
}

impl MiddlewareEntry {
    /// Registers `compiled` under `path_prefix` ("/" matches every path).
    pub fn new(path_prefix: impl Into<String>, compiled: Compiled) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            compiled,
        }
    }

    /// Whether this middleware applies to `pathname`.
    pub fn applies_to(&self, pathname: &str) -> bool {
        if self.path_prefix == "/" {
            return true;
        }
        pathname == self.path_prefix || pathname.starts_with(&format!("{}/", self.path_prefix))
    }
}

/// Runs `entries` against `ctx` in order, stopping early if a middleware
/// ends the response or raises an error.
///
/// Each entry's returned [`ResponseValue`] is applied as a context patch
/// when it's a mapping (`ContextPatch`); any other shape returned by a
/// non-terminal middleware call is not merged, since middleware only
/// communicates forward via the context (spec §3: "a mapping ... applies
/// the merge policy") — except `Error`, which stops the chain immediately
/// and is handed back to the caller so the dispatcher can route it to the
/// `onError` hook instead of running any later middleware (spec §4.4, §8:
/// "subsequent middleware and the handler do not run; onError hooks run").
pub async fn run_chain(
    entries: &[MiddlewareEntry],
    mut ctx: Context,
) -> Result<Context, (Context, ViaductError)> {
    for entry in entries {
        if ctx.ended() {
            break;
        }
        if !entry.applies_to(&ctx.pathname) {
            continue;
        }
        let (next_ctx, value) = (entry.compiled)(ctx).await;
        ctx = next_ctx;
        if ctx.ended() {
            break;
        }
        match value {
            ResponseValue::ContextPatch(map) => ctx.merge_patch(map),
            ResponseValue::Error(err) => return Err((ctx, err)),
            _ => {}
        }
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::from_context_fn;
    use crate::req::HttpRequest;
    use crate::types::HttpMethods;
    use serde_json::json;

    fn ctx(path: &str) -> Context {
        Context::build(HttpRequest::for_test(HttpMethods::GET, path, ""))
    }

    #[tokio::test]
    async fn later_middleware_sees_earlier_patch() {
        let first = MiddlewareEntry::new(
            "/",
            from_context_fn(|mut c: Context| async move {
                c.set_raw("step", json!(1));
                (c, ResponseValue::None)
            }),
        );
        let second = MiddlewareEntry::new(
            "/",
            from_context_fn(|c: Context| async move {
                let v = c.get("step").cloned();
                assert_eq!(v, Some(json!(1)));
                (c, ResponseValue::None)
            }),
        );
        let ctx = run_chain(&[first, second], ctx("/anything")).await.unwrap();
        assert!(!ctx.ended());
    }

    #[tokio::test]
    async fn prefix_mismatch_is_skipped() {
        let mw = MiddlewareEntry::new(
            "/admin",
            from_context_fn(|mut c: Context| async move {
                c.end();
                (c, ResponseValue::None)
            }),
        );
        let ctx = run_chain(&[mw], ctx("/public")).await.unwrap();
        assert!(!ctx.ended());
    }

    #[tokio::test]
    async fn short_circuit_stops_chain() {
        let first = MiddlewareEntry::new(
            "/",
            from_context_fn(|mut c: Context| async move {
                c.end();
                (c, ResponseValue::None)
            }),
        );
        let second = MiddlewareEntry::new(
            "/",
            from_context_fn(|mut c: Context| async move {
                c.set_raw("reached", json!(true));
                (c, ResponseValue::None)
            }),
        );
        let ctx = run_chain(&[first, second], ctx("/x")).await.unwrap();
        assert!(ctx.get("reached").is_none());
    }

    #[tokio::test]
    async fn error_short_circuits_and_is_returned_to_caller() {
        let first = MiddlewareEntry::new(
            "/",
            from_context_fn(|c: Context| async move {
                (c, ResponseValue::Error(ViaductError::application("boom")))
            }),
        );
        let second = MiddlewareEntry::new(
            "/",
            from_context_fn(|mut c: Context| async move {
                c.set_raw("reached", json!(true));
                (c, ResponseValue::None)
            }),
        );
        match run_chain(&[first, second], ctx("/x")).await {
            Err((ctx, err)) => {
                assert!(ctx.get("reached").is_none());
                assert_eq!(err.message, "boom");
            }
            Ok(_) => panic!("expected an error"),
        }
    }
}
