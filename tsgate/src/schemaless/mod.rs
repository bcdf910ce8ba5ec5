//! The schemaless insert executor.
//!
//! Given a borrowed connection and a normalized point, ensures the row is
//! written, creating or adjusting schema on demand:
//!
//! ```text
//! Attempt -> Done
//!         -> Reconcile (classify the server code) -> Retry -> Done
//!                                                          -> Failed
//! ```
//!
//! Reconciliation relies on the database's own DDL semantics for
//! correctness under concurrent writers: every DDL statement is idempotent
//! or its "already done" error is tolerated, and no client-side lock is
//! held. The common case (schema already correct) costs one round trip.

mod sql;

pub use sql::sanitize_identifier;

use tracing::{debug, warn};

use crate::errors::{DbError, ErrorCode, ExecuteError, InsertError, ReconcileStep};
use crate::network::Connection;
use crate::point::{ColumnType, FieldSpec, InsertPoint, TableSchema};

/// What a classified server error tells us to rebuild before retrying.
///
/// The mapping from [`ErrorCode`] is the closed contract driving the state
/// machine:
///
/// | code                | meaning                   | action            |
/// |---------------------|---------------------------|-------------------|
/// | `InvalidTableName`  | super table missing       | `CreateStable`    |
/// | `InvalidOperation`  | tag missing or undersized | `ReconcileTags`   |
/// | `DbNotSelected`     | database missing          | `CreateDatabase`  |
/// | anything else       | not recoverable           | propagate         |
///
/// Each action implies the ones below it in the bootstrap chain:
/// creating a database also creates the super table and reconciles tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileAction {
    CreateStable,
    ReconcileTags,
    CreateDatabase,
}

impl ReconcileAction {
    fn classify(err: &DbError) -> Option<Self> {
        match err.code {
            ErrorCode::InvalidTableName => Some(ReconcileAction::CreateStable),
            ErrorCode::InvalidOperation => Some(ReconcileAction::ReconcileTags),
            ErrorCode::DbNotSelected => Some(ReconcileAction::CreateDatabase),
            _ => None,
        }
    }
}

/// Executes schemaless inserts over one borrowed connection.
pub struct SchemalessExecutor<'c> {
    conn: &'c mut Connection,
}

impl<'c> SchemalessExecutor<'c> {
    /// Wraps a borrowed connection.
    pub fn new(conn: &'c mut Connection) -> Self {
        Self { conn }
    }

    /// Writes `point`, reconciling missing or undersized schema elements
    /// on the way. Returns the generated INSERT text on success so
    /// adapters can log what was written.
    ///
    /// On a classified schema error the insert is retried exactly once
    /// after reconciliation; the retry's outcome is final.
    pub async fn insert(&mut self, point: &InsertPoint) -> Result<String, InsertError> {
        validate(point)?;
        let sql = sql::insert_statement(point);

        match self.conn.execute(&sql).await {
            Ok(_) => return Ok(sql),
            Err(ExecuteError::Db(err)) => {
                let Some(action) = ReconcileAction::classify(&err) else {
                    return Err(ExecuteError::Db(err).into());
                };
                debug!(code = %err.code, ?action, "insert rejected, reconciling schema");
                match action {
                    ReconcileAction::CreateStable => {
                        self.create_stable(point).await?;
                        self.reconcile_tags(point).await?;
                    }
                    ReconcileAction::ReconcileTags => {
                        self.reconcile_tags(point).await?;
                    }
                    ReconcileAction::CreateDatabase => {
                        self.create_database(&point.db).await?;
                        self.create_stable(point).await?;
                        self.reconcile_tags(point).await?;
                    }
                }
            }
            Err(other) => return Err(other.into()),
        }

        match self.conn.execute(&sql).await {
            Ok(_) => Ok(sql),
            Err(err) => {
                warn!(%err, "insert retry after reconciliation failed");
                Err(err.into())
            }
        }
    }

    async fn create_database(&mut self, db: &str) -> Result<(), InsertError> {
        self.conn
            .execute(&sql::create_database(db))
            .await
            .map_err(|source| InsertError::Reconcile {
                step: ReconcileStep::CreateDatabase,
                source,
            })?;
        Ok(())
    }

    /// Creates the super table with columns inferred from the point's
    /// non-null fields. Losing the creation race to a concurrent writer
    /// is success.
    async fn create_stable(&mut self, point: &InsertPoint) -> Result<(), InsertError> {
        let fields: Vec<FieldSpec> = point
            .fields
            .iter()
            .filter_map(|(name, value)| {
                value
                    .column_type()
                    .map(|ty| FieldSpec::new(sanitize_identifier(name), ty))
            })
            .collect();
        if fields.is_empty() {
            return Err(InsertError::InvalidPoint(
                "no non-null field to infer a column from",
            ));
        }
        let tags: Vec<FieldSpec> = point
            .tags()
            .map(|(name, value)| {
                FieldSpec::new(sanitize_identifier(name), ColumnType::Binary(value.len()))
            })
            .collect();

        let stmt = sql::create_stable(&point.db, &point.stable, &fields, &tags);
        match self.conn.execute(&stmt).await {
            Ok(_) => Ok(()),
            Err(err) if err.db_code() == Some(ErrorCode::TableAlreadyExist) => Ok(()),
            Err(source) => Err(InsertError::Reconcile {
                step: ReconcileStep::CreateStable,
                source,
            }),
        }
    }

    /// Brings the super table's tag set up to the point's shape: adds
    /// missing tags and widens undersized BINARY tags, reading the live
    /// schema first because concurrent writers may have changed it.
    async fn reconcile_tags(&mut self, point: &InsertPoint) -> Result<(), InsertError> {
        let schema = self.describe_stable(&point.db, &point.stable).await?;

        let mut wanted: Vec<(String, &str)> = point
            .tags()
            .map(|(name, value)| (sanitize_identifier(name), value))
            .collect();
        let mut widen: Vec<FieldSpec> = Vec::new();

        for tag in &schema.tags {
            if let Some(pos) = wanted.iter().position(|(name, _)| name == &tag.name) {
                let (name, value) = wanted.swap_remove(pos);
                if let ColumnType::Binary(width) = tag.ty {
                    if width < value.len() {
                        widen.push(FieldSpec::new(name, ColumnType::Binary(value.len())));
                    }
                }
            }
        }

        for (name, value) in wanted {
            let tag = FieldSpec::new(name, ColumnType::Binary(value.len()));
            let stmt = sql::add_tag(&point.db, &point.stable, &tag);
            match self.conn.execute(&stmt).await {
                Ok(_) => {}
                // Another writer added the tag first.
                Err(err) if err.db_code() == Some(ErrorCode::InvalidOperation) => {}
                Err(source) => {
                    return Err(InsertError::Reconcile {
                        step: ReconcileStep::AddTag,
                        source,
                    })
                }
            }
        }

        for tag in widen {
            let stmt = sql::modify_tag(&point.db, &point.stable, &tag);
            match self.conn.execute(&stmt).await {
                Ok(_) => {}
                // Another writer already widened it at least this far.
                Err(err) if err.db_code() == Some(ErrorCode::InvalidTagLength) => {}
                Err(source) => {
                    return Err(InsertError::Reconcile {
                        step: ReconcileStep::ModifyTag,
                        source,
                    })
                }
            }
        }

        Ok(())
    }

    async fn describe_stable(&mut self, db: &str, stable: &str) -> Result<TableSchema, InsertError> {
        let columns = self
            .conn
            .describe(&sql::qualified(db, stable))
            .await
            .map_err(|source| InsertError::Reconcile {
                step: ReconcileStep::DescribeStable,
                source,
            })?;
        Ok(TableSchema::from_columns(&columns))
    }
}

fn validate(point: &InsertPoint) -> Result<(), InsertError> {
    if point.db.is_empty() {
        return Err(InsertError::InvalidPoint("database name is empty"));
    }
    if point.table.is_empty() {
        return Err(InsertError::InvalidPoint("table name is empty"));
    }
    if point.stable.is_empty() {
        return Err(InsertError::InvalidPoint("super table name is empty"));
    }
    if point.fields.is_empty() {
        return Err(InsertError::InvalidPoint("point has no fields"));
    }
    if point.tag_names.is_empty() {
        return Err(InsertError::InvalidPoint("point has no tags"));
    }
    if point.tag_names.len() != point.tag_values.len() {
        return Err(InsertError::InvalidPoint(
            "tag names and tag values differ in length",
        ));
    }
    Ok(())
}
