//! Graceful shutdown: SIGTERM/SIGINT triggers a drain rather than an
//! abrupt exit.
//!
//! Watches both `Ctrl-C` and, on Unix, `SIGTERM` (relevant once a process
//! is managed by an orchestrator that sends that signal rather than
//! Ctrl-C), then waits out in-flight requests up to a deadline rather
//! than stopping accept and returning immediately.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::dispatcher::Dispatcher;

/// Listens for `SIGINT` or (on Unix) `SIGTERM`, resolving once either
/// fires. Idempotent to call more than once (each call installs its own
/// listeners).
pub fn signal() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    #[cfg(unix)]
    {
        Box::pin(async {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        })
    }
    #[cfg(not(unix))]
    {
        Box::pin(async {
            let _ = tokio::signal::ctrl_c().await;
        })
    }
}

/// Waits for `dispatcher`'s in-flight count to reach zero, or for
/// `deadline` to elapse, whichever comes first. Returns `true` if drained
/// cleanly.
pub async fn drain(dispatcher: &Dispatcher, deadline: Duration) -> bool {
    let poll_interval = Duration::from_millis(20);
    let start = tokio::time::Instant::now();
    loop {
        if dispatcher.in_flight() == 0 {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Hooks;
    use crate::registry::RouteRegistry;
    use std::collections::HashMap;

    #[tokio::test]
    async fn drain_with_no_in_flight_work_returns_immediately() {
        let dispatcher = Dispatcher::new(
            RouteRegistry::new(),
            Vec::new(),
            Hooks::default(),
            4,
            None,
            HashMap::new(),
        );
        let drained = drain(&dispatcher, Duration::from_millis(50)).await;
        assert!(drained);
    }
}
