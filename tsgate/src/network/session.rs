//! Traits describing what this core needs from the database's native
//! session protocol: open a session with credentials, execute SQL text,
//! describe a table, close the session. Everything else (wire format,
//! transport, TLS) stays behind the implementation.

use async_trait::async_trait;

use crate::errors::{ConnectionError, ExecuteError};
use crate::point::ColumnDesc;

/// Factory for native database sessions.
///
/// One `Database` value represents a reachable server process; pools call
/// [`Database::connect`] whenever they need a fresh session.
#[async_trait]
pub trait Database: Send + Sync {
    /// Opens a new authenticated session.
    async fn connect(
        &self,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn Session>, ConnectionError>;
}

/// One authenticated session with the database.
///
/// Sessions are exclusively owned: at most one caller uses a session at a
/// time, so all methods take `&mut self` and implementations need no
/// internal synchronization.
#[async_trait]
pub trait Session: Send {
    /// Executes one SQL statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, ExecuteError>;

    /// Returns the column metadata of `table` (qualified as `db.table`),
    /// one [`ColumnDesc`] per `DESCRIBE` row.
    async fn describe(&mut self, table: &str) -> Result<Vec<ColumnDesc>, ExecuteError>;

    /// Closes the session. Called exactly once, when the owning pool
    /// discards the connection.
    async fn close(&mut self);
}
