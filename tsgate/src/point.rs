//! Data model crossing the core boundary: normalized insert points and
//! the database-side view of a super table's schema.
//!
//! Protocol adapters (line protocol, OpenTSDB, collectd, ...) parse their
//! wire formats into [`InsertPoint`] values; the schemaless executor consumes
//! them. [`TableSchema`] describes what the database currently knows about a
//! super table and is re-read via `DESCRIBE` whenever reconciliation needs
//! it - other writers may mutate it concurrently, so it is never cached.

use chrono::{DateTime, Utc};

/// A single typed field value carried by an [`InsertPoint`].
///
/// Exactly the kinds the target database can infer a column for. Adapters
/// must reject or coerce anything else at their own boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit floating point, mapped to a `DOUBLE` column.
    Double(f64),
    /// Signed 64-bit integer, mapped to a `BIGINT` column.
    BigInt(i64),
    /// Unsigned 64-bit integer, mapped to a `BIGINT UNSIGNED` column.
    UBigInt(u64),
    /// Boolean, mapped to a `BOOL` column.
    Bool(bool),
    /// String, mapped to a `BINARY(n)` column sized to the value.
    Binary(String),
    /// Absent value; contributes no column during schema inference and
    /// renders as the bare `null` keyword in DML.
    Null,
}

impl Value {
    /// The column type this value infers during super-table creation,
    /// or `None` for [`Value::Null`].
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Double(_) => Some(ColumnType::Double),
            Value::BigInt(_) => Some(ColumnType::BigInt),
            Value::UBigInt(_) => Some(ColumnType::UBigInt),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Binary(s) => Some(ColumnType::Binary(s.len())),
            Value::Null => None,
        }
    }
}

/// A column type as declared in DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// The mandatory leading `ts` column.
    Timestamp,
    /// `DOUBLE`.
    Double,
    /// `BIGINT`.
    BigInt,
    /// `BIGINT UNSIGNED`.
    UBigInt,
    /// `BINARY(n)`; the width is in bytes.
    Binary(usize),
    /// `BOOL`.
    Bool,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::UBigInt => write!(f, "BIGINT UNSIGNED"),
            ColumnType::Binary(len) => write!(f, "BINARY({})", len),
            ColumnType::Bool => write!(f, "BOOL"),
        }
    }
}

/// One column or tag of a super table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Sanitized column/tag name.
    pub name: String,
    /// Declared type, including BINARY width where applicable.
    pub ty: ColumnType,
}

impl FieldSpec {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// One row of `DESCRIBE` output, as reported by the native session.
///
/// Mirrors the four columns the database returns: `Field`, `Type`,
/// `Length` and `Note` (`"TAG"` marks tag columns).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    /// Column or tag name.
    pub field: String,
    /// Type name as the server spells it, e.g. `"BIGINT UNSIGNED"`.
    pub type_name: String,
    /// Declared length; meaningful for `BINARY`/`NCHAR` only.
    pub length: usize,
    /// `"TAG"` for tag columns, empty otherwise.
    pub note: String,
}

/// The database-side reality of a super table at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    /// Time-series columns, in declaration order (including `ts`).
    pub fields: Vec<FieldSpec>,
    /// Tags, in declaration order.
    pub tags: Vec<FieldSpec>,
}

impl TableSchema {
    /// Builds a schema from raw `DESCRIBE` rows.
    pub fn from_columns(columns: &[ColumnDesc]) -> Self {
        let mut schema = TableSchema::default();
        for col in columns {
            let ty = match col.type_name.as_str() {
                "TIMESTAMP" => ColumnType::Timestamp,
                "DOUBLE" => ColumnType::Double,
                "BIGINT" => ColumnType::BigInt,
                "BIGINT UNSIGNED" => ColumnType::UBigInt,
                "BOOL" => ColumnType::Bool,
                // BINARY and NCHAR both carry a width; reconciliation only
                // ever widens, so treating NCHAR as BINARY here is safe.
                _ => ColumnType::Binary(col.length),
            };
            let spec = FieldSpec::new(col.field.clone(), ty);
            if col.note == "TAG" {
                schema.tags.push(spec);
            } else {
                schema.fields.push(spec);
            }
        }
        schema
    }

    /// Looks up a tag by its (already sanitized) name.
    pub fn tag(&self, name: &str) -> Option<&FieldSpec> {
        self.tags.iter().find(|t| t.name == name)
    }
}

/// The normalized unit of work handed to the schemaless executor.
///
/// Invariants checked by the executor before any network round trip:
/// `db`, `table`, `stable` are non-empty, `fields` is non-empty, and
/// `tag_names` / `tag_values` are parallel and non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPoint {
    /// Target database name.
    pub db: String,
    /// Point timestamp; rendered with nanosecond precision.
    pub ts: DateTime<Utc>,
    /// Concrete (sub-)table the row lands in.
    pub table: String,
    /// Super table the concrete table is created `USING`.
    pub stable: String,
    /// Field name/value pairs, in the order the adapter produced them.
    pub fields: Vec<(String, Value)>,
    /// Tag names, parallel to `tag_values`.
    pub tag_names: Vec<String>,
    /// Tag values; tags are string-typed in this data model.
    pub tag_values: Vec<String>,
}

impl InsertPoint {
    /// Iterates over `(name, value)` tag pairs.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tag_names
            .iter()
            .map(String::as_str)
            .zip(self.tag_values.iter().map(String::as_str))
    }
}
