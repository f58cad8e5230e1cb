//! The worker-pool envelope (spec §4.9): primary/child process fan-out over
//! a shared listening socket, with crash restart and a cross-process cache
//! coordinator.
//!
//! A single-process `App::start` has no multi-process mode of its own, so
//! this module builds one: a primary that forks `num_cpus::get()` copies
//! of the current executable (re-invoked with [`WORKER_PORT_ENV`] set)
//! which all `bind` the same port via `SO_REUSEPORT` ([`socket2`]) so the
//! kernel load-balances accepted connections across them — the same
//! arrangement Node's `cluster` module gives for free via
//! `SO_REUSEPORT`/fd-passing, reached for here with this crate's own
//! process/socket primitives instead of a borrowed one.
//!
//! Cross-process cache coordination (spec §4.8, §4.9) runs over each
//! child's inherited stdin/stdout pipe: the primary speaks
//! newline-delimited JSON [`CacheMessage`]s, tagged with a `uuid`
//! correlation id, and a worker that doesn't hear back within
//! [`CACHE_RPC_TIMEOUT`] falls back to its own local cache (best-effort
//! consistency, exactly as §4.8 allows).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use socket2::{Domain, Protocol, Socket, Type};

use crate::app::handler;
use crate::app::App;
use crate::cache::ResponseCache;
use crate::error::ViaductError;
use crate::res::{CachedResponse, HttpResponse};

/// Set by the primary on a spawned child so [`run`] knows it is a worker
/// rather than the process that should fork.
pub const WORKER_PORT_ENV: &str = "VIADUCT_WORKER_PORT";

/// Set by the primary (to its own pid) so a worker's diagnostics can name
/// the primary that spawned it. Not consulted for control flow.
pub const PRIMARY_PID_ENV: &str = "VIADUCT_PRIMARY_PID";

/// Disables crash-respawn when truthy (spec §4.9, §6: "benchmark-mode
/// flag: disables automatic worker respawn").
pub const BENCHMARK_MODE_ENV: &str = "VIADUCT_BENCHMARK_MODE";

/// How long a worker waits for a cache RPC reply before falling back to
/// its local cache (spec §4.8: "per-request timeout (≈1 second)").
pub const CACHE_RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// A request/reply envelope exchanged between a worker and the primary's
/// cache coordinator over the inherited stdio pipe.
#[derive(Debug, Serialize, Deserialize)]
struct CacheMessage {
    id: String,
    #[serde(flatten)]
    body: CacheMessageBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum CacheMessageBody {
    Get { route: String, key: String },
    Set { route: String, key: String, value: CachedResponse },
    Has { route: String, key: String },
    Delete { route: String, key: String },
    Reply { value: Option<CachedResponse> },
    ReplyBool { value: bool },
}

/// Runs the worker-pool envelope, if enabled, or serves `app` directly as
/// a single process otherwise.
///
/// When cluster mode is disabled, the process is both primary and
/// worker. Cluster mode is on when `enabled` is true *and* this process
/// hasn't already been spawned as a worker (i.e. [`WORKER_PORT_ENV`] is
/// unset).
pub async fn run(app: App, port: u16, enabled: bool) -> Result<(), ViaductError> {
    if !enabled {
        return handler::serve(app, port).await;
    }

    match std::env::var(WORKER_PORT_ENV).ok() {
        Some(port_str) => {
            let worker_port: u16 = port_str
                .parse()
                .map_err(|e| ViaductError::application(format!("invalid {WORKER_PORT_ENV}: {e}")))?;
            run_worker(app, worker_port).await
        }
        None => run_primary(app, port).await,
    }
}

/// Binds a `SO_REUSEPORT` listener on `addr` so every worker process can
/// bind the identical `(host, port)` and let the kernel distribute
/// accepted connections among them.
fn reuseport_listener(addr: std::net::SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    tokio::net::TcpListener::from_std(socket.into())
}

/// The primary's view of one spawned child process.
struct WorkerHandle {
    child: Child,
}

/// Spawns `count` copies of the current executable as workers, all bound
/// to `port` via `SO_REUSEPORT`, and runs the cross-process cache
/// coordinator until every worker has exited (or forever, across
/// restarts, until the process itself is killed).
async fn run_primary(app: App, port: u16) -> Result<(), ViaductError> {
    let exe = std::env::current_exe()
        .map_err(|e| ViaductError::application(format!("could not resolve current_exe: {e}")))?;
    let count = num_cpus::get().max(1);
    let benchmark_mode = std::env::var(BENCHMARK_MODE_ENV)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);

    let coordinator = Arc::new(CacheCoordinator::new(app.route_cache_configs()));

    let mut handles: Vec<WorkerHandle> = Vec::with_capacity(count);
    for _ in 0..count {
        handles.push(spawn_worker(&exe, port)?);
    }

    let mut pump_tasks = Vec::new();
    for handle in &mut handles {
        let stdout = handle.child.stdout.take().expect("worker stdout piped");
        let stdin = handle.child.stdin.take().expect("worker stdin piped");
        let coordinator = Arc::clone(&coordinator);
        pump_tasks.push(tokio::spawn(pump_cache_requests(stdout, stdin, coordinator)));
    }

    // Respawn any worker that exits unexpectedly, mirroring Node
    // `cluster`'s primary: a crashed worker doesn't bring the pool down.
    loop {
        let mut any_running = false;
        for slot in 0..handles.len() {
            match handles[slot].child.try_wait() {
                Ok(Some(_status)) => {
                    if !benchmark_mode {
                        handles[slot] = spawn_worker(&exe, port)?;
                        let stdout = handles[slot].child.stdout.take().expect("worker stdout piped");
                        let stdin = handles[slot].child.stdin.take().expect("worker stdin piped");
                        let coordinator = Arc::clone(&coordinator);
                        pump_tasks.push(tokio::spawn(pump_cache_requests(stdout, stdin, coordinator)));
                        any_running = true;
                    }
                }
                Ok(None) => any_running = true,
                Err(_) => {}
            }
        }
        if !any_running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Ok(())
}

fn spawn_worker(exe: &std::path::Path, port: u16) -> Result<WorkerHandle, ViaductError> {
    let child = Command::new(exe)
        .env(WORKER_PORT_ENV, port.to_string())
        .env(PRIMARY_PID_ENV, std::process::id().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| ViaductError::application(format!("failed to spawn worker: {e}")))?;
    Ok(WorkerHandle { child })
}

/// Reads [`CacheMessage`] requests a worker writes to its stdout pipe (the
/// primary's read end of the child's stdout), resolves them against the
/// shared [`CacheCoordinator`], and writes the `Reply` back on the
/// child's stdin.
async fn pump_cache_requests(
    stdout: tokio::process::ChildStdout,
    mut stdin: tokio::process::ChildStdin,
    coordinator: Arc<CacheCoordinator>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => break,
        };
        let Ok(msg) = serde_json::from_str::<CacheMessage>(&line) else {
            continue;
        };
        let reply = CacheMessage {
            id: msg.id,
            body: coordinator.apply(&msg.body),
        };
        let Ok(mut encoded) = serde_json::to_vec(&reply) else {
            continue;
        };
        encoded.push(b'\n');
        if stdin.write_all(&encoded).await.is_err() {
            break;
        }
    }
}

/// Runs `app` as a worker: serves the `SO_REUSEPORT` listener directly,
/// but routes any route-cache lookups through a [`WorkerCacheClient`]
/// (wired into the dispatcher via
/// [`handler::serve_on_listener_with_worker_cache`]) so a miss is checked
/// against the primary's authoritative cache before this worker computes
/// its own value.
async fn run_worker(app: App, port: u16) -> Result<(), ViaductError> {
    let addr: std::net::SocketAddr = format!("{}:{}", app.bind_host(), port)
        .parse()
        .map_err(|e| ViaductError::application(format!("invalid bind address: {e}")))?;
    let listener = reuseport_listener(addr)
        .map_err(|e| ViaductError::application(format!("failed to bind {addr}: {e}")))?;
    // One shared client speaks the cache RPC protocol for every cached
    // route in this worker; its own fallback cache is a single flat map
    // keyed the same way the per-route caches are (pathname + canonical
    // query), so this is a coarser fallback than the primary's per-route
    // TTLs but only ever consulted when the RPC itself is unreachable.
    let fallback = Arc::new(ResponseCache::new(Duration::from_secs(60), 4096));
    let worker_cache = WorkerCacheClient::new(fallback);
    handler::serve_on_listener_with_worker_cache(app, listener, Some(worker_cache)).await
}

/// Owns the authoritative route-level caches in the primary process
/// (spec §4.8: "the cache is owned by the primary process"). Keyed on the
/// same `"METHOD pattern"` route key [`crate::app::App`] uses.
struct CacheCoordinator {
    caches: HashMap<String, Arc<ResponseCache>>,
}

impl CacheCoordinator {
    fn new(configs: Vec<(String, Duration, usize)>) -> Self {
        let caches = configs
            .into_iter()
            .map(|(route, ttl, capacity)| (route, Arc::new(ResponseCache::new(ttl, capacity))))
            .collect();
        Self { caches }
    }

    fn apply(&self, body: &CacheMessageBody) -> CacheMessageBody {
        match body {
            CacheMessageBody::Get { route, key } => {
                let value = self
                    .caches
                    .get(route)
                    .and_then(|c| c.get(key))
                    .map(|r| r.to_cached());
                CacheMessageBody::Reply { value }
            }
            CacheMessageBody::Has { route, key } => {
                let present = self
                    .caches
                    .get(route)
                    .map(|c| c.get(key).is_some())
                    .unwrap_or(false);
                CacheMessageBody::ReplyBool { value: present }
            }
            CacheMessageBody::Set { route, key, value } => {
                if let Some(cache) = self.caches.get(route) {
                    cache.put(key.clone(), HttpResponse::from_cached(value.clone()));
                }
                CacheMessageBody::Reply { value: None }
            }
            CacheMessageBody::Delete { route, key } => {
                if let Some(cache) = self.caches.get(route) {
                    cache.remove(key);
                }
                CacheMessageBody::Reply { value: None }
            }
            CacheMessageBody::Reply { .. } | CacheMessageBody::ReplyBool { .. } => {
                CacheMessageBody::Reply { value: None }
            }
        }
    }
}

/// A worker-side handle that speaks the cache RPC protocol over this
/// process's own stdin/stdout (inherited from the primary) instead of
/// holding a local [`ResponseCache`] directly. Falls back to `local` on
/// timeout or transport failure (spec §4.8).
pub struct WorkerCacheClient {
    local: Arc<ResponseCache>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<CacheMessageBody>>>>,
    next_id: AtomicU64,
    stdin: Arc<Mutex<tokio::io::Stdin>>,
}

impl WorkerCacheClient {
    /// Builds a client backed by `local` as its best-effort fallback
    /// cache, and spawns the background task that reads replies from
    /// this process's inherited stdin.
    pub fn new(local: Arc<ResponseCache>) -> Arc<Self> {
        let client = Arc::new(Self {
            local,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            stdin: Arc::new(Mutex::new(tokio::io::stdin())),
        });
        let reader_client = Arc::clone(&client);
        tokio::spawn(async move { reader_client.read_replies().await });
        client
    }

    async fn read_replies(self: Arc<Self>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(msg) = serde_json::from_str::<CacheMessage>(&line) else {
                continue;
            };
            if let Some(tx) = self.pending.lock().await.remove(&msg.id) {
                let _ = tx.send(msg.body);
            }
        }
    }

    async fn roundtrip(&self, body: CacheMessageBody) -> Option<CacheMessageBody> {
        let id = format!(
            "{}-{}",
            std::process::id(),
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        let msg = CacheMessage { id: id.clone(), body };
        let Ok(mut encoded) = serde_json::to_vec(&msg) else {
            self.pending.lock().await.remove(&id);
            return None;
        };
        encoded.push(b'\n');
        {
            let mut stdin = self.stdin.lock().await;
            if stdin.write_all(&encoded).await.is_err() {
                self.pending.lock().await.remove(&id);
                return None;
            }
        }
        match tokio::time::timeout(CACHE_RPC_TIMEOUT, rx).await {
            Ok(Ok(value)) => Some(value),
            _ => {
                self.pending.lock().await.remove(&id);
                None
            }
        }
    }

    /// Gets `key` for `route`, consulting the primary's authoritative
    /// cache first and falling back to the local cache on timeout or
    /// transport failure (spec §4.8).
    pub async fn get(&self, route: &str, key: &str) -> Option<HttpResponse> {
        let reply = self
            .roundtrip(CacheMessageBody::Get {
                route: route.to_string(),
                key: key.to_string(),
            })
            .await;
        if let Some(CacheMessageBody::Reply { value: Some(cached) }) = reply {
            return Some(HttpResponse::from_cached(cached));
        }
        self.local.get(key)
    }

    /// Sets `key` for `route` on the primary's authoritative cache and
    /// mirrors the write into the local fallback cache unconditionally.
    pub async fn set(&self, route: &str, key: &str, response: HttpResponse) {
        let cached = response.to_cached();
        let _ = self
            .roundtrip(CacheMessageBody::Set {
                route: route.to_string(),
                key: key.to_string(),
                value: cached,
            })
            .await;
        self.local.put(key.to_string(), response);
    }
}
