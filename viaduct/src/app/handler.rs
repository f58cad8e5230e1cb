//! Connection-serving logic: binds the listener, accepts connections, and
//! drives each one through Hyper.
//!
//! Builds a `hyper_util::server::conn::auto::Builder` and serves a
//! `hyper::service::service_fn` closure per connection that calls
//! `Dispatcher::dispatch` directly, so HTTP/1 vs HTTP/2 negotiation is
//! just the auto builder's default behavior — finer HTTP/2 tuning is a
//! collaborator concern the core doesn't pin down.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;

use crate::app::App;
use crate::cluster::WorkerCacheClient;
use crate::dispatcher::Dispatcher;
use crate::error::ViaductError;
use crate::req::HttpRequest;
use crate::shutdown;

/// Binds `app`'s host on `port` and serves requests until a shutdown
/// signal arrives (if graceful shutdown is enabled).
pub async fn serve(app: App, port: u16) -> Result<(), ViaductError> {
    let addr: SocketAddr = format!("{}:{}", app.host, port)
        .parse()
        .map_err(|e| ViaductError::application(format!("invalid bind address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ViaductError::application(format!("failed to bind {addr}: {e}")))?;

    serve_on_listener(app, listener).await
}

/// Serves `app` on an already-bound listener — the worker-pool envelope
/// (`cluster.rs`) uses this to hand in a `SO_REUSEPORT` listener it built
/// itself rather than letting [`serve`] bind a fresh one.
pub async fn serve_on_listener(app: App, listener: TcpListener) -> Result<(), ViaductError> {
    serve_on_listener_with_worker_cache(app, listener, None).await
}

/// Same as [`serve_on_listener`], but additionally wires `worker_cache`
/// into the built [`Dispatcher`] when running as a cluster worker (spec
/// §4.8/§4.9) so cache lookups/puts route through the primary's
/// authoritative cache instead of staying purely in-process.
pub async fn serve_on_listener_with_worker_cache(
    app: App,
    listener: TcpListener,
    worker_cache: Option<Arc<WorkerCacheClient>>,
) -> Result<(), ViaductError> {
    let mut dispatcher = app.build_dispatcher();
    if let Some(client) = worker_cache {
        dispatcher = dispatcher.with_worker_cache(client);
    }
    let dispatcher = Arc::new(dispatcher);

    let mut shutdown_signal = if app.graceful_shutdown {
        Some(Box::pin(shutdown::signal()))
    } else {
        None
    };

    loop {
        let accepted = if let Some(sig) = &mut shutdown_signal {
            tokio::select! {
                result = listener.accept() => Some(result),
                _ = sig.as_mut() => None,
            }
        } else {
            Some(listener.accept().await)
        };

        match accepted {
            Some(Ok((stream, remote))) => {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    handle_connection(stream, dispatcher, remote).await;
                });
            }
            Some(Err(e)) => log_error(&format!("error accepting connection: {e}")),
            None => break,
        }
    }

    if app.graceful_shutdown {
        shutdown::drain(&dispatcher, Duration::from_secs(30)).await;
    }

    Ok(())
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    dispatcher: Arc<Dispatcher>,
    remote: SocketAddr,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let response = match HttpRequest::from_hyper_request(req, Some(remote)).await {
                Ok(our_req) => dispatcher.dispatch(our_req).await,
                Err(e) => hyper::Response::builder()
                    .status(hyper::StatusCode::BAD_REQUEST)
                    .body(Full::from(Bytes::from(e.to_string())))
                    .unwrap_or_else(|_| hyper::Response::new(Full::from(Bytes::new()))),
            };
            Ok::<_, Infallible>(response)
        }
    });

    let builder = Builder::new(TokioExecutor::new());
    if let Err(e) = builder.serve_connection_with_upgrades(io, service).await {
        log_error(&format!("error serving connection: {e}"));
    }
}

#[cfg(feature = "logger")]
fn log_error(message: &str) {
    tracing::error!("{message}");
}

#[cfg(not(feature = "logger"))]
fn log_error(message: &str) {
    eprintln!("{message}");
}
