//! Credential-scoped connection pooling.
//!
//! [`ConnPool`] owns a bounded set of connections for one `(user, password)`
//! pair; [`PoolRegistry`] maps user names to pools and replaces a pool
//! atomically when the password for a user changes.

mod registry;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::errors::PoolError;
use crate::network::{Connection, Database};

pub use registry::{PoolRegistry, PooledConnection};

/// Statement used to verify a connection is still live before re-pooling
/// it (when [`PoolOptions::test_on_return`] is enabled).
const LIVENESS_PROBE: &str = "select server_status()";

/// Per-pool configuration.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Upper bound on `using + idle` connections. Once reached, `get`
    /// fails immediately with [`PoolError::ResourceExhausted`].
    pub max_connect: usize,
    /// Upper bound on idle connections; a returned connection above this
    /// is closed, not pooled. Zero disables pooling of idle connections.
    pub max_idle: usize,
    /// Idle connections the background sweep leaves alone even when they
    /// are past `idle_timeout`.
    pub min_idle: usize,
    /// Idle connections older than this are eligible for eviction.
    pub idle_timeout: Duration,
    /// Deadline applied to every database round trip made through a
    /// pooled connection. `None` leaves round trips unbounded.
    pub request_timeout: Option<Duration>,
    /// Verify liveness with a trivial query before re-pooling a returned
    /// connection, discarding it on probe failure.
    pub test_on_return: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connect: 100,
            max_idle: 50,
            min_idle: 0,
            idle_timeout: Duration::from_secs(3600),
            request_timeout: None,
            test_on_return: false,
        }
    }
}

impl PoolOptions {
    /// Sets the total connection limit.
    pub fn max_connect(mut self, max_connect: usize) -> Self {
        self.max_connect = max_connect;
        self
    }

    /// Sets the idle connection limit.
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Sets the idle floor kept by the eviction sweep.
    pub fn min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Sets the idle timeout.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the per-round-trip deadline.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    /// Enables or disables the liveness probe on return.
    pub fn test_on_return(mut self, test_on_return: bool) -> Self {
        self.test_on_return = test_on_return;
        self
    }
}

struct IdleConn {
    conn: Connection,
    idle_since: Instant,
}

/// `using + idle.len() <= max_connect` and `idle.len() <= max_idle` hold
/// whenever the mutex is unlocked. The lock is never held across a network
/// round trip: `get` reserves capacity by bumping `using`, drops the lock,
/// opens the session, and rolls the reservation back on failure.
struct PoolInner {
    idle: VecDeque<IdleConn>,
    using: usize,
    retired: bool,
}

/// A bounded connection pool for one `(user, password)` pair.
///
/// `get`/`put` never block on capacity: exhaustion is a terminal error the
/// caller surfaces or retries, not a queueing point.
pub struct ConnPool {
    inner: Mutex<PoolInner>,
    database: Arc<dyn Database>,
    user: String,
    password: String,
    options: PoolOptions,
    _evictor: futures::future::RemoteHandle<()>,
}

impl ConnPool {
    /// Creates an empty pool. Connections are opened lazily by [`get`].
    ///
    /// Must be called from within a Tokio runtime: the pool spawns a
    /// background task that sweeps idle connections past their timeout.
    ///
    /// [`get`]: ConnPool::get
    pub fn new(
        database: Arc<dyn Database>,
        user: impl Into<String>,
        password: impl Into<String>,
        options: PoolOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ConnPool>| {
            let sweep_interval = (options.idle_timeout / 2).max(Duration::from_secs(1));
            let (evictor, evictor_handle) =
                Self::run_evictor(weak.clone(), sweep_interval).remote_handle();
            tokio::spawn(evictor);

            Self {
                inner: Mutex::new(PoolInner {
                    idle: VecDeque::new(),
                    using: 0,
                    retired: false,
                }),
                database,
                user: user.into(),
                password: password.into(),
                options,
                _evictor: evictor_handle,
            }
        })
    }

    /// Borrows a connection: the freshest idle one if available, a newly
    /// opened one if the pool has spare capacity, and an immediate
    /// [`PoolError::ResourceExhausted`] otherwise.
    pub async fn get(&self) -> Result<Connection, PoolError> {
        loop {
            let reused = {
                let mut inner = self.lock_inner();
                if inner.retired {
                    return Err(PoolError::Retired);
                }
                match inner.idle.pop_back() {
                    Some(entry) if entry.idle_since.elapsed() <= self.options.idle_timeout => {
                        inner.using += 1;
                        return Ok(entry.conn);
                    }
                    Some(expired) => Some(expired.conn),
                    None => {
                        if inner.using >= self.options.max_connect {
                            return Err(PoolError::ResourceExhausted {
                                max_connect: self.options.max_connect,
                            });
                        }
                        // Reserve the slot before the connect round trip.
                        inner.using += 1;
                        None
                    }
                }
            };

            if let Some(conn) = reused {
                trace!(user = %self.user, "closing idle connection past its timeout");
                conn.close().await;
                continue;
            }

            match self.database.connect(&self.user, &self.password).await {
                Ok(session) => {
                    debug!(user = %self.user, "opened new connection");
                    return Ok(Connection::new(session, self.options.request_timeout));
                }
                Err(err) => {
                    self.lock_inner().using -= 1;
                    return Err(err.into());
                }
            }
        }
    }

    /// Returns a borrowed connection. The connection is closed instead of
    /// pooled when the pool is retired, the connection is poisoned, idle
    /// capacity is full, or the optional liveness probe fails.
    pub async fn put(&self, mut conn: Connection) {
        let probe = {
            let mut inner = self.lock_inner();
            inner.using -= 1;
            if self.reject_idle(&inner, &conn) {
                false
            } else if self.options.test_on_return {
                // Keep the slot reserved while the probe runs.
                inner.using += 1;
                true
            } else {
                inner.idle.push_back(IdleConn {
                    conn,
                    idle_since: Instant::now(),
                });
                return;
            }
        };

        if probe {
            let healthy = conn.execute(LIVENESS_PROBE).await.is_ok();
            let mut inner = self.lock_inner();
            inner.using -= 1;
            if healthy && !self.reject_idle(&inner, &conn) {
                inner.idle.push_back(IdleConn {
                    conn,
                    idle_since: Instant::now(),
                });
                return;
            }
            if !healthy {
                warn!(user = %self.user, "liveness probe failed, discarding connection");
            }
        }

        debug!(user = %self.user, "closing returned connection");
        conn.close().await;
    }

    fn reject_idle(&self, inner: &PoolInner, conn: &Connection) -> bool {
        inner.retired
            || conn.is_poisoned()
            || self.options.max_idle == 0
            || inner.idle.len() >= self.options.max_idle
            || inner.idle.len() + inner.using >= self.options.max_connect
    }

    /// Retires the pool: closes every idle connection now and marks the
    /// pool so that outstanding borrows are closed as they come back
    /// through [`put`]. Used on credential rotation and shutdown.
    ///
    /// [`put`]: ConnPool::put
    pub async fn release(&self) {
        let drained = {
            let mut inner = self.lock_inner();
            inner.retired = true;
            std::mem::take(&mut inner.idle)
        };
        debug!(user = %self.user, idle = drained.len(), "pool retired");
        for entry in drained {
            entry.conn.close().await;
        }
    }

    /// Cheap equality check against the password the pool was built with;
    /// the registry uses it to detect credential rotation.
    pub fn verify_password(&self, password: &str) -> bool {
        password == self.password
    }

    /// The user this pool authenticates as.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Number of connections currently borrowed.
    pub fn using_count(&self) -> usize {
        self.lock_inner().using
    }

    /// Number of idle connections currently pooled.
    pub fn idle_count(&self) -> usize {
        self.lock_inner().idle.len()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // The mutex is only ever held for short, non-awaiting sections, so
        // a poisoned lock means a panic mid-bookkeeping; propagating it
        // would wedge every caller of the pool.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run_evictor(pool: Weak<ConnPool>, sweep_interval: Duration) {
        loop {
            tokio::time::sleep(sweep_interval).await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            let evicted = {
                let mut inner = pool.lock_inner();
                if inner.retired {
                    break;
                }
                let mut evicted = Vec::new();
                // Oldest entries sit at the front; never sweep below the
                // configured idle floor.
                while inner.idle.len() > pool.options.min_idle {
                    match inner.idle.front() {
                        Some(entry)
                            if entry.idle_since.elapsed() > pool.options.idle_timeout =>
                        {
                            // Unwrap is fine: front() just returned Some.
                            evicted.push(inner.idle.pop_front().expect("front exists").conn);
                        }
                        _ => break,
                    }
                }
                evicted
            };
            if !evicted.is_empty() {
                debug!(user = %pool.user, count = evicted.len(), "evicting idle connections");
            }
            for conn in evicted {
                conn.close().await;
            }
        }
    }
}

impl std::fmt::Debug for ConnPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("ConnPool")
            .field("user", &self.user)
            .field("using", &inner.using)
            .field("idle", &inner.idle.len())
            .field("retired", &inner.retired)
            .finish_non_exhaustive()
    }
}
