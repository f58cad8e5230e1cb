//! The response finalizer (spec §4.7): turns a handler's terminal
//! [`ResponseValue`] into bytes on `ctx.response`, applying the "must set
//! status to 200 if not already set" rule and the single-send guarantee.
//!
//! This is the one place a [`ResponseValue`] other than `ContextPatch`
//! crosses back into an [`HttpResponse`]. Everywhere else in the pipeline
//! (the middleware runner) a non-`ContextPatch` return from middleware is
//! simply not merged — only the dispatcher's terminal handler call routes
//! through here.

use crate::context::Context;
use crate::error::{ViaductError, ViaductErrorKind};
use crate::types::ResponseValue;

/// Applies `value` onto `ctx.response` and marks the response sent.
///
/// A no-op if `ctx.ended()` is already `true` — the handler wrote the
/// response directly (spec §8: "the return value is ignored").
pub fn finalize(ctx: &mut Context, value: ResponseValue) {
    if ctx.ended() {
        mark_sent_once(ctx);
        return;
    }

    match value {
        ResponseValue::None => {}
        ResponseValue::Html(html) => {
            ctx.response = std::mem::take(&mut ctx.response).html(html);
        }
        ResponseValue::Text(text) => {
            ctx.response = std::mem::take(&mut ctx.response).text(text);
        }
        ResponseValue::Json(value) => {
            apply_json(ctx, value);
        }
        ResponseValue::File(path) => {
            apply_file(ctx, path);
        }
        ResponseValue::ContextPatch(map) => {
            // A handler returning a bare mapping is, per spec §4.7, "any
            // other mapping/value" and renders as JSON — unlike the same
            // shape returned by middleware, where it is a context patch
            // (see `middleware.rs`). The dispatcher only calls `finalize`
            // for the terminal handler value, so this arm is reachable
            // only for a handler that literally builds a `ContextPatch`
            // itself, which is treated the same as `Json`.
            apply_json(ctx, serde_json::Value::Object(map));
        }
        ResponseValue::Error(err) => {
            // Not reachable in normal operation: the dispatcher inspects a
            // handler/middleware's return value for `Error` before it ever
            // reaches `finalize` and routes it to the `onError` hook
            // instead. Kept as a defensive fallback with the same default
            // shape that hook falls back to when none is registered.
            ctx.response = std::mem::take(&mut ctx.response)
                .status(err.status_code())
                .json(serde_json::json!({ "error": err.message }));
        }
    }

    mark_sent_once(ctx);
}

fn apply_json(ctx: &mut Context, value: serde_json::Value) {
    match serde_json::to_vec(&value) {
        Ok(_) => {
            ctx.response = std::mem::take(&mut ctx.response).json(value);
        }
        Err(_) => {
            let err = ViaductError::new(
                ViaductErrorKind::SerializationFailure,
                "failed to serialize response value",
            );
            ctx.response = std::mem::take(&mut ctx.response)
                .status(err.status_code())
                .json(serde_json::json!({ "error": "serialization failed" }));
        }
    }
}

fn apply_file(ctx: &mut Context, path: std::path::PathBuf) {
    // No static-file collaborator is registered by the core (spec §1
    // Non-goals); absent one, a `File` return is a 501.
    let _ = path;
    ctx.response = std::mem::take(&mut ctx.response)
        .not_implemented()
        .json(serde_json::json!({ "error": "no static file handler registered" }));
}

fn mark_sent_once(ctx: &mut Context) {
    if !ctx.response.is_sent() {
        ctx.response.mark_sent();
    }
    ctx.end();
}
