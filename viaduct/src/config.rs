//! Environment-driven application configuration: the handful of
//! process-wide settings the worker-pool envelope and the dispatcher need,
//! centralized into one struct and read once at startup rather than read
//! ad hoc at each call site.

use std::time::Duration;

/// Process-wide configuration read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// The port to bind, from `PORT`. Defaults to `3000`.
    pub port: u16,
    /// Whether to run the worker-pool envelope (spec §9's cluster
    /// discussion), from `VIADUCT_CLUSTER`. Defaults to `false`.
    pub cluster: bool,
    /// The per-request deadline, from `VIADUCT_REQUEST_TIMEOUT_MS`.
    /// Absent (`None`) by default — no deadline enforced.
    pub request_timeout: Option<Duration>,
    /// Disables automatic worker respawn-on-crash, from
    /// `VIADUCT_BENCHMARK_MODE`. Defaults to `false`; benchmarking
    /// harnesses that intentionally kill workers set this so the pool
    /// doesn't fight back.
    pub benchmark_mode: bool,
    /// The port a spawned worker process should bind to in cluster mode,
    /// from `VIADUCT_WORKER_PORT`. Set by the primary process when
    /// spawning children; absent in the primary itself.
    pub worker_port: Option<u16>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            cluster: false,
            request_timeout: None,
            benchmark_mode: false,
            worker_port: None,
        }
    }
}

impl AppConfig {
    /// Reads configuration from the process environment, falling back to
    /// defaults for anything absent or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            cluster: env_bool("VIADUCT_CLUSTER", defaults.cluster),
            request_timeout: std::env::var("VIADUCT_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis),
            benchmark_mode: env_bool("VIADUCT_BENCHMARK_MODE", defaults.benchmark_mode),
            worker_port: std::env::var("VIADUCT_WORKER_PORT")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "True"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_absent() {
        std::env::remove_var("PORT");
        std::env::remove_var("VIADUCT_CLUSTER");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.port, 3000);
        assert!(!cfg.cluster);
    }

    #[test]
    fn parses_port_from_env() {
        std::env::set_var("PORT", "8080");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.port, 8080);
        std::env::remove_var("PORT");
    }
}
