//! Error taxonomy of the write-admission core.
//!
//! Database-side failures carry the server's numeric error code as a typed
//! [`ErrorCode`]; the schemaless executor branches on those codes to decide
//! whether a failed insert is recoverable via schema reconciliation. All
//! other layers propagate errors verbatim.

use std::sync::Arc;

use thiserror::Error;

/// Server error codes this core recognizes.
///
/// The numeric values are a stable, external contract of the underlying
/// database; the set recognized here is deliberately closed. Codes outside
/// it are preserved in [`ErrorCode::Other`] and never trigger retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// `0x0200` - invalid operation; returned for an unknown tag or a tag
    /// value exceeding its declared BINARY width.
    InvalidOperation,
    /// `0x021A` - new tag length not larger than the current one.
    InvalidTagLength,
    /// `0x0362` - table (here: super table) does not exist.
    InvalidTableName,
    /// `0x0363` - table already exists.
    TableAlreadyExist,
    /// `0x0380` - database does not exist / not selected.
    DbNotSelected,
    /// Any code this core does not branch on.
    Other(u32),
}

impl ErrorCode {
    /// Maps a raw server code to its typed form.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x0200 => ErrorCode::InvalidOperation,
            0x021A => ErrorCode::InvalidTagLength,
            0x0362 => ErrorCode::InvalidTableName,
            0x0363 => ErrorCode::TableAlreadyExist,
            0x0380 => ErrorCode::DbNotSelected,
            other => ErrorCode::Other(other),
        }
    }

    /// The raw numeric code as the server reported it.
    pub fn as_raw(self) -> u32 {
        match self {
            ErrorCode::InvalidOperation => 0x0200,
            ErrorCode::InvalidTagLength => 0x021A,
            ErrorCode::InvalidTableName => 0x0362,
            ErrorCode::TableAlreadyExist => 0x0363,
            ErrorCode::DbNotSelected => 0x0380,
            ErrorCode::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.as_raw())
    }
}

/// An error response from the database, with the server's code and message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("database returned an error: {code}, message: {message}")]
pub struct DbError {
    /// Typed server error code.
    pub code: ErrorCode,
    /// Server-provided error message.
    pub message: String,
}

impl DbError {
    /// Convenience constructor.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error that occurred while opening a native session.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Credentials rejected by the server; surfaced immediately, never
    /// retried or reconciled.
    #[error("authentication failed for user {user}")]
    Authentication {
        /// User whose credentials were rejected.
        user: String,
    },

    /// The server responded with a non-authentication error.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The session could not be opened in time.
    #[error("connect timed out")]
    Timeout,

    /// Transport-level failure, connection refused etc.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

/// Error that occurred while executing a statement on an open session.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The server rejected the statement.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The round trip missed its deadline. The connection that produced
    /// this is in an unknown protocol state and is discarded by the pool
    /// rather than re-pooled.
    #[error("request timed out")]
    Timeout,

    /// The session is no longer usable.
    #[error("connection is broken: {0}")]
    Broken(String),
}

impl ExecuteError {
    /// Returns the typed server code, if this is a database error.
    pub fn db_code(&self) -> Option<ErrorCode> {
        match self {
            ExecuteError::Db(err) => Some(err.code),
            _ => None,
        }
    }
}

/// Error returned by pool and registry operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool is at `max_connect` with nothing idle. Never retried
    /// internally: callers under the wire-protocol listeners must fail
    /// fast rather than stack up tasks.
    #[error("too many connections (limit: {max_connect})")]
    ResourceExhausted {
        /// The pool's connection limit.
        max_connect: usize,
    },

    /// The pool has been released (credential rotation or shutdown).
    #[error("pool has been retired")]
    Retired,

    /// Opening a new connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Which reconciliation step a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    /// `CREATE DATABASE IF NOT EXISTS ...`
    CreateDatabase,
    /// `CREATE STABLE IF NOT EXISTS ...`
    CreateStable,
    /// `DESCRIBE` of the live super table.
    DescribeStable,
    /// `ALTER STABLE ... ADD TAG ...`
    AddTag,
    /// `ALTER STABLE ... MODIFY TAG ...`
    ModifyTag,
}

impl std::fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReconcileStep::CreateDatabase => "create database",
            ReconcileStep::CreateStable => "create stable",
            ReconcileStep::DescribeStable => "describe stable",
            ReconcileStep::AddTag => "add tag",
            ReconcileStep::ModifyTag => "modify tag",
        };
        f.write_str(name)
    }
}

/// Error returned by the schemaless insert executor.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum InsertError {
    /// The point violated a shape invariant; detected before any
    /// network round trip.
    #[error("invalid insert point: {0}")]
    InvalidPoint(&'static str),

    /// The insert (first attempt or the single retry) failed with an
    /// error reconciliation does not recover from; propagated verbatim.
    #[error(transparent)]
    Exec(#[from] ExecuteError),

    /// Reconciliation itself failed; surfaced as the failure of the
    /// original insert, annotated with the failing step.
    #[error("schema reconciliation failed during {step}: {source}")]
    Reconcile {
        /// The DDL step that failed.
        step: ReconcileStep,
        /// The underlying failure.
        #[source]
        source: ExecuteError,
    },
}
