use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::errors::PoolError;
use crate::network::{Connection, Database};
use crate::pool::{ConnPool, PoolOptions};

/// Process-wide map from user name to that user's connection pool.
///
/// Pools are created lazily on first borrow and replaced atomically when a
/// user's password changes: a reader sees either the old pool or the new
/// one, never a partially replaced state. Pool construction opens a
/// connection over the network and therefore always happens outside any
/// map guard, so rotating one user's credentials never blocks lookups for
/// unrelated users.
pub struct PoolRegistry {
    database: Arc<dyn Database>,
    options: PoolOptions,
    pools: DashMap<String, Arc<ConnPool>>,
}

impl PoolRegistry {
    /// Creates a registry with no pools; pools appear as credentials are
    /// first used.
    pub fn new(database: Arc<dyn Database>, options: PoolOptions) -> Self {
        Self {
            database,
            options,
            pools: DashMap::new(),
        }
    }

    /// Borrows a connection authenticated as `(user, password)`.
    ///
    /// On the first borrow for a user (or after a password change) this
    /// builds a fresh pool and eagerly opens one connection through it
    /// before publishing it - invalid credentials fail here, fast, and the
    /// broken pool is never stored. A pool displaced by credential
    /// rotation is released; connections already borrowed from it remain
    /// valid and are closed when their holders return them.
    pub async fn get_connection(
        &self,
        user: &str,
        password: &str,
    ) -> Result<PooledConnection, PoolError> {
        if let Some(pool) = self.pools.get(user).map(|entry| Arc::clone(entry.value())) {
            if pool.verify_password(password) {
                let conn = pool.get().await?;
                return Ok(PooledConnection::new(conn, pool));
            }
            debug!(user, "password changed, building replacement pool");
        }

        let pool = ConnPool::new(
            Arc::clone(&self.database),
            user,
            password,
            self.options.clone(),
        );
        // Fail-fast credential and connectivity check; also the connection
        // this call ultimately hands out.
        let conn = pool.get().await?;

        let displaced = self.pools.insert(user.to_string(), Arc::clone(&pool));
        if let Some(old) = displaced {
            debug!(user, "releasing displaced pool");
            old.release().await;
        }

        Ok(PooledConnection::new(conn, pool))
    }

    /// The pool currently published for `user`, if any.
    pub fn pool(&self, user: &str) -> Option<Arc<ConnPool>> {
        self.pools.get(user).map(|entry| Arc::clone(entry.value()))
    }

    /// Releases every pool. Called on process shutdown.
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<ConnPool>> = self
            .pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.pools.clear();
        for pool in pools {
            pool.release().await;
        }
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.pools.len())
            .finish_non_exhaustive()
    }
}

/// A connection borrowed through the registry.
///
/// Captures the pool it came from at borrow time, so the connection always
/// returns to that pool even if the registry has since been repointed at a
/// replacement (the replacement must not inherit connections opened under
/// the old password).
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnPool>,
}

impl PooledConnection {
    pub(crate) fn new(conn: Connection, pool: Arc<ConnPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Returns the connection to its pool.
    pub async fn put(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put(conn).await;
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // The Option is only empty after `put`, which consumes self.
        self.conn.as_ref().expect("connection already returned")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Returning is async; on the normal path callers go through `put`.
        // This fallback keeps error/panic paths from leaking the pool slot.
        if let Some(conn) = self.conn.take() {
            let pool = Arc::clone(&self.pool);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { pool.put(conn).await });
                }
                Err(_) => {
                    // No runtime left (process teardown); the session is
                    // dropped without a graceful close.
                    warn!("pooled connection dropped outside a runtime");
                }
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("pool", &self.pool)
            .finish()
    }
}
