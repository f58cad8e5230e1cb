//! An HTTP application framework built around name-directed parameter
//! injection: handlers and middleware declare the named values they need —
//! a path parameter, a query key, a body field, a decorated value — and the
//! framework resolves them from the per-request [`context::Context`] before
//! the callable body ever runs.
//!
//! ```no_run
//! use viaduct::app::App;
//! use viaduct::callable::from_context_fn;
//! use viaduct::context::Context;
//! use viaduct::types::{HttpMethods, ResponseValue};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut app = App::new();
//!     app.route(
//!         HttpMethods::GET,
//!         "/ping",
//!         from_context_fn(|ctx: Context| async move {
//!             (ctx, ResponseValue::Json(serde_json::json!({"message": "pong"})))
//!         }),
//!     )
//!     .unwrap();
//!     app.start(3000).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod app;
pub mod binder;
pub mod cache;
pub mod callable;
pub mod cluster;
pub mod concurrency;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod middleware;
pub mod path;
pub mod plugin;
pub mod registry;
pub mod req;
pub mod res;
pub mod response;
pub mod route;
pub mod types;

#[cfg(test)]
mod tests;

/// Environment-driven application configuration (spec §6): re-exported at
/// the crate root since most applications only ever need
/// [`config::AppConfig::from_env`].
pub mod config;

/// Re-exports of the small set of names most applications need, so
/// `use viaduct::prelude::*;` is enough for typical route/middleware code.
pub mod prelude {
    pub use crate::app::App;
    pub use crate::binder::FromContext;
    pub use crate::callable::{
        from_context_fn, from_extractor, from_fallible_context_fn, from_fallible_extractor,
        middleware_from_extractor,
    };
    pub use crate::context::Context;
    pub use crate::error::{ViaductError, ViaductErrorKind};
    pub use crate::plugin::Plugin;
    pub use crate::res::HttpResponse;
    pub use crate::types::{HttpMethods, ResponseValue};
}

pub use viaduct_derive::FromContext;
