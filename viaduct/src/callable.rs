//! The uniform shape every compiled handler and middleware entry reduces
//! to, regardless of which binder form (typed-struct extraction or raw
//! context) it was registered with.
//!
//! This crate's defining feature is a tagged union of *return* values
//! (`ContextPatch`/`Html`/`Text`/`File`/`Json`/`None`) rather than an
//! imperative response builder passed into the handler, so handlers and
//! extraction-form middleware return a [`ResponseValue`] rather than
//! mutate a response object directly. The one place an imperative style
//! survives is the raw `ctx`/`context` form (the single-parameter special
//! case), where a callable may mutate `ctx.response` directly and call
//! `ctx.end()` to short-circuit the rest of the chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::binder::{BindError, FromContext};
use crate::context::Context;
use crate::error::{ViaductError, ViaductErrorKind};
use crate::types::ResponseValue;

/// A pinned, boxed future yielding the context back (possibly mutated) plus
/// the value it produced.
pub type CallableFuture = Pin<Box<dyn Future<Output = (Context, ResponseValue)> + Send>>;

/// The type every compiled handler/middleware entry is stored as on a
/// [`crate::route::Route`] (spec §4.2: "binder is compiled once per
/// callable, memoized on the Route").
pub type Compiled = Arc<dyn Fn(Context) -> CallableFuture + Send + Sync>;

/// Wraps a handler of the form `Fn(P) -> Fut<Output = ResponseValue>` — the
/// common case (spec scenarios 1-4): the handler declares exactly the
/// names it needs as struct fields and returns a tagged value.
///
/// On extraction failure the real handler body never runs; a descriptive
/// failure is surfaced instead as a `BadRequest`-flavored JSON error
/// value, which the dispatcher's error boundary turns into status 400.
pub fn from_extractor<P, F, Fut>(handler: F) -> Compiled
where
    P: FromContext + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResponseValue> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |ctx: Context| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            match P::from_context(&ctx) {
                Ok(extracted) => {
                    let value = handler(extracted).await;
                    (ctx, value)
                }
                Err(e) => (ctx, bind_failure_value(&e)),
            }
        })
    })
}

/// Wraps a handler/middleware of the form `Fn(Context) -> Fut<Output =
/// (Context, ResponseValue)>` — the raw form used for the single
/// `ctx`/`context` parameter special case (spec §4.2) and for middleware
/// that needs to short-circuit by writing the response and calling
/// `ctx.end()` directly.
pub fn from_context_fn<F, Fut>(f: F) -> Compiled
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (Context, ResponseValue)> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx: Context| {
        let f = Arc::clone(&f);
        Box::pin(async move { f(ctx).await })
    })
}

/// Wraps a middleware of the form `Fn(P) -> Fut<Output = ResponseValue>`
/// where `P: FromContext` — the common middleware shape: it reads named
/// values and returns a context patch (or `ResponseValue::None`) without
/// ever touching the response directly. Identical in shape to
/// [`from_extractor`]; kept as a distinct name at call sites so route
/// registration code reads as "this is a middleware" vs "this is the
/// handler".
pub fn middleware_from_extractor<P, F, Fut>(f: F) -> Compiled
where
    P: FromContext + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResponseValue> + Send + 'static,
{
    from_extractor(f)
}

/// Wraps a handler/middleware of the form `Fn(Context) -> Fut<Output =
/// (Context, Result<ResponseValue, ViaductError>)>` — the raw-context form
/// that can signal failure. An `Err` becomes `ResponseValue::Error`, which
/// `run_chain`/`dispatch` intercept and route to the `onError` hook instead
/// of merging or finalizing it (spec §4.4: "If the middleware
/// raises/returns a failure, propagates it to the dispatcher immediately").
pub fn from_fallible_context_fn<F, Fut>(f: F) -> Compiled
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (Context, Result<ResponseValue, ViaductError>)> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx: Context| {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let (ctx, result) = f(ctx).await;
            match result {
                Ok(value) => (ctx, value),
                Err(err) => (ctx, ResponseValue::Error(err)),
            }
        })
    })
}

/// The fallible counterpart to [`from_extractor`]: the handler body returns
/// `Result<ResponseValue, ViaductError>` instead of a bare `ResponseValue`,
/// so it can raise an application error without writing to `ctx.response`
/// itself.
pub fn from_fallible_extractor<P, F, Fut>(handler: F) -> Compiled
where
    P: FromContext + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseValue, ViaductError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |ctx: Context| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            match P::from_context(&ctx) {
                Ok(extracted) => {
                    let value = match handler(extracted).await {
                        Ok(value) => value,
                        Err(err) => ResponseValue::Error(err),
                    };
                    (ctx, value)
                }
                Err(e) => (ctx, bind_failure_value(&e)),
            }
        })
    })
}

/// A failed name-directed extraction is a client-shaped error — the caller
/// asked for a parameter that wasn't there — so it is surfaced as
/// `BadRequest` through the same error channel a handler's own `Err` would
/// use, rather than as a bare 200 JSON body.
fn bind_failure_value(e: &BindError) -> ResponseValue {
    ResponseValue::Error(ViaductError::new(
        ViaductErrorKind::BadRequest,
        format!("Extraction failed: {e}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_failure_shape() {
        let e = BindError {
            name: "id".into(),
            reason: "missing".into(),
        };
        let v = bind_failure_value(&e);
        match v {
            ResponseValue::Error(err) => {
                assert_eq!(err.kind, ViaductErrorKind::BadRequest);
                assert_eq!(
                    err.message,
                    "Extraction failed: failed to bind parameter \"id\": missing"
                );
            }
            _ => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn fallible_context_fn_turns_err_into_error_value() {
        let compiled = from_fallible_context_fn(|c: Context| async move {
            (c, Err(ViaductError::application("boom")))
        });
        let ctx = Context::build(crate::req::HttpRequest::for_test(
            crate::types::HttpMethods::GET,
            "/",
            "",
        ));
        let (_, value) = compiled(ctx).await;
        match value {
            ResponseValue::Error(err) => assert_eq!(err.message, "boom"),
            _ => panic!("expected error"),
        }
    }
}
