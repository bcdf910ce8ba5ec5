//! Write-path core for a schemaless time-series gateway.
//!
//! Protocol adapters (InfluxDB line protocol, OpenTSDB JSON/telnet,
//! collectd, statsd, ...) parse wire input into a normalized
//! [`InsertPoint`], borrow a connection from the [`PoolRegistry`], and hand
//! both to the [`SchemalessExecutor`], which writes the row into a
//! TDengine-style database - creating the database, super table and tags
//! on demand, idempotently, under concurrent writers.
//!
//! Two subsystems make that work:
//!
//! * **Credential-scoped pooling** ([`pool`]): one bounded [`ConnPool`] per
//!   `(user, password)` pair, multiplexing requests over native sessions
//!   with idle eviction and atomic pool replacement on password change.
//!   `get` never queues: a pool at capacity fails fast with
//!   [`errors::PoolError::ResourceExhausted`].
//! * **Schemaless insert execution** ([`schemaless`]): one INSERT attempt,
//!   server-code classification on failure, targeted DDL reconciliation,
//!   and a single retry.
//!
//! The database itself stays behind the [`Database`] / [`Session`] traits:
//! open a session with credentials, execute SQL text, describe a table,
//! close the session.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsgate::{Database, InsertPoint, PoolOptions, PoolRegistry, SchemalessExecutor};
//!
//! # async fn example(
//! #     database: Arc<dyn Database>,
//! #     point: InsertPoint,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PoolRegistry::new(database, PoolOptions::default().max_connect(50));
//!
//! let mut conn = registry.get_connection("root", "taosdata").await?;
//! let sql = SchemalessExecutor::new(&mut conn).insert(&point).await?;
//! conn.put().await;
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod network;
pub mod point;
pub mod pool;
pub mod schemaless;

pub use errors::{DbError, ErrorCode, InsertError, PoolError};
pub use network::{Connection, Database, Session};
pub use point::{ColumnDesc, ColumnType, FieldSpec, InsertPoint, TableSchema, Value};
pub use pool::{ConnPool, PoolOptions, PoolRegistry, PooledConnection};
pub use schemaless::{sanitize_identifier, SchemalessExecutor};
