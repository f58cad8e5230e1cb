//! The plugin surface: a unit of packaged registration logic an
//! [`crate::app::App`] can absorb, bundling routes, middleware, and hooks
//! behind a single `register` call — a trait rather than a fixed
//! function so third-party crates can ship plugins without the core
//! needing to know about them ahead of time.
//!
//! Registration takes an `options` value (spec §6: `plugin(plugin,
//! options?)`) and may be asynchronous — a plugin might need to read a
//! config file or ping a downstream service before it knows what to
//! register. [`App::plugin`] awaits it immediately, so by the time that
//! call returns the plugin's setup has already landed; nothing starts
//! serving requests before every registered plugin has finished.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::app::App;

/// A pinned, boxed future produced by [`Plugin::register`].
pub type PluginFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A self-contained unit of app configuration. Implementors typically
/// register one or more routes/middleware/hooks onto `app` from `register`.
pub trait Plugin: Send + Sync {
    /// A short name, used only for diagnostics (e.g. double-registration
    /// warnings a logging collaborator might emit).
    fn name(&self) -> &'static str;

    /// Applies this plugin's registrations onto `app`, configured by
    /// `options`. May perform async setup; the returned future resolves
    /// before [`App::start`] begins serving requests.
    fn register<'a>(&'a self, app: &'a mut App, options: Value) -> PluginFuture<'a>;
}
