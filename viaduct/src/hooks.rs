//! Ordered `onRequest`/`onResponse`/`onError` hook lists.
//!
//! Request/response hooks share the uniform [`Compiled`] shape used
//! everywhere else, so they can read and patch the context the same way
//! middleware does. The error hook is distinct: it receives the
//! [`ViaductError`] that triggered the error boundary and decides the
//! final response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::callable::Compiled;
use crate::context::Context;
use crate::error::ViaductError;
use crate::types::ResponseValue;

/// A pinned, boxed future yielding the context an error hook produced.
pub type ErrorHookFuture = Pin<Box<dyn Future<Output = Context> + Send>>;

/// An `onError` hook: given the error and the context at the point of
/// failure, produces the final context (with `ctx.response` set and
/// `ctx.end()` called).
pub type ErrorHook = Arc<dyn Fn(ViaductError, Context) -> ErrorHookFuture + Send + Sync>;

/// The three hook lists an [`crate::app::App`] accumulates.
#[derive(Clone, Default)]
pub struct Hooks {
    on_request: Vec<Compiled>,
    on_response: Vec<Compiled>,
    on_error: Option<ErrorHook>,
}

impl Hooks {
    /// Registers an `onRequest` hook, run before route resolution.
    pub fn on_request(&mut self, hook: Compiled) {
        self.on_request.push(hook);
    }

    /// Registers an `onResponse` hook, run after the response is finalized
    /// but before it is written to the wire.
    pub fn on_response(&mut self, hook: Compiled) {
        self.on_response.push(hook);
    }

    /// Registers the single `onError` hook, replacing any previous one.
    pub fn set_on_error(&mut self, hook: ErrorHook) {
        self.on_error = Some(hook);
    }

    /// Runs the `onRequest` hooks in registration order, stopping early if
    /// one ends the response or raises an error (in which case it is
    /// handed back to the caller to route to the `onError` hook, same as a
    /// failing middleware — spec §4.4).
    pub async fn run_on_request(&self, mut ctx: Context) -> Result<Context, (Context, ViaductError)> {
        for hook in &self.on_request {
            if ctx.ended() {
                break;
            }
            let (next, value) = hook(ctx).await;
            ctx = next;
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

    /// Runs the `onResponse` hooks in registration order. These run after
    /// the handler has returned but before the default finalizer does
    /// (spec §4.6 steps 10-11): the handler's raw return value is visible
    /// via [`Context::pending_response`], and a hook may end the response
    /// itself to skip the default finalization that follows.
    pub async fn run_on_response(&self, mut ctx: Context) -> Context {
        for hook in &self.on_response {
            let (next, value) = hook(ctx).await;
            ctx = next;
            if let ResponseValue::ContextPatch(map) = value {
                ctx.merge_patch(map);
            }
        }
        ctx
    }

    /// Invokes the `onError` hook if one is registered; otherwise applies
    /// the error kind's default status code with a generic JSON body
    /// (spec §7's fallback behavior).
    pub async fn run_on_error(&self, err: ViaductError, mut ctx: Context) -> Context {
        if let Some(hook) = &self.on_error {
            return hook(err, ctx).await;
        }
        ctx.response = std::mem::take(&mut ctx.response)
            .status(err.status_code())
            .json(serde_json::json!({ "error": err.message }));
        ctx.end();
        ctx
    }

    /// Whether an `onError` hook is registered.
    pub fn has_error_hook(&self) -> bool {
        self.on_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::from_context_fn;
    use crate::req::HttpRequest;
    use crate::types::HttpMethods;

    fn ctx() -> Context {
        Context::build(HttpRequest::for_test(HttpMethods::GET, "/", ""))
    }

    #[tokio::test]
    async fn default_error_fallback_sets_status() {
        let hooks = Hooks::default();
        let err = ViaductError::not_found("no route");
        let ctx = hooks.run_on_error(err, ctx()).await;
        assert_eq!(ctx.response.status, hyper::StatusCode::NOT_FOUND);
        assert!(ctx.ended());
    }

    #[tokio::test]
    async fn on_request_hooks_run_in_order() {
        let mut hooks = Hooks::default();
        hooks.on_request(from_context_fn(|mut c: Context| async move {
            c.set_raw("trace", serde_json::json!(["a"]));
            (c, ResponseValue::None)
        }));
        let ctx = hooks.run_on_request(ctx()).await.unwrap();
        assert_eq!(ctx.get("trace"), Some(&serde_json::json!(["a"])));
    }

    #[tokio::test]
    async fn on_request_error_is_returned_to_caller() {
        let mut hooks = Hooks::default();
        hooks.on_request(from_context_fn(|c: Context| async move {
            (c, ResponseValue::Error(ViaductError::application("boom")))
        }));
        match hooks.run_on_request(ctx()).await {
            Err((_, err)) => assert_eq!(err.message, "boom"),
            Ok(_) => panic!("expected an error"),
        }
    }
}
