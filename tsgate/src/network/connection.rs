use std::time::Duration;

use tracing::{trace, warn};

use crate::errors::ExecuteError;
use crate::network::session::Session;
use crate::point::ColumnDesc;

/// An open session plus the bookkeeping the pool needs around it.
///
/// A `Connection` is exclusively owned: by a caller while borrowed, by the
/// pool while idle. Round trips honor the pool-configured deadline; a
/// deadline miss (or a broken transport) poisons the connection, and the
/// pool closes a poisoned connection on return instead of re-pooling it -
/// after a timeout the session may still have the old response in flight,
/// so its protocol state is unknown.
pub struct Connection {
    session: Box<dyn Session>,
    request_timeout: Option<Duration>,
    poisoned: bool,
}

impl Connection {
    pub(crate) fn new(session: Box<dyn Session>, request_timeout: Option<Duration>) -> Self {
        Self {
            session,
            request_timeout,
            poisoned: false,
        }
    }

    /// Executes one SQL statement, returning the affected row count.
    pub async fn execute(&mut self, sql: &str) -> Result<u64, ExecuteError> {
        trace!(sql, "executing statement");
        let result = match self.request_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.session.execute(sql)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecuteError::Timeout),
                }
            }
            None => self.session.execute(sql).await,
        };
        self.note_outcome(&result);
        result
    }

    /// Fetches the live column metadata of `table` (qualified `db.table`).
    pub async fn describe(&mut self, table: &str) -> Result<Vec<ColumnDesc>, ExecuteError> {
        trace!(table, "describing table");
        let result = match self.request_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.session.describe(table)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecuteError::Timeout),
                }
            }
            None => self.session.describe(table).await,
        };
        self.note_outcome(&result);
        result
    }

    fn note_outcome<T>(&mut self, result: &Result<T, ExecuteError>) {
        match result {
            Err(ExecuteError::Timeout) | Err(ExecuteError::Broken(_)) => {
                warn!("connection poisoned, will be discarded on return");
                self.poisoned = true;
            }
            _ => {}
        }
    }

    /// Whether the connection's protocol state is unknown.
    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) async fn close(mut self) {
        self.session.close().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("request_timeout", &self.request_timeout)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}
