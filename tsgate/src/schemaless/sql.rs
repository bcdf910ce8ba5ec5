//! Pure SQL text generation: identifier repair, literal quoting and the
//! statement builders the executor issues.
//!
//! Sanitization is deterministic and applied identically in DDL and DML,
//! so the same logical field always maps to the same physical column.

use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;

use crate::point::{FieldSpec, InsertPoint, Value};

/// Rewrites `name` into a valid identifier of the target dialect.
///
/// Every byte outside `[a-z0-9_]` becomes `_`; if the first byte is not in
/// `[a-z_]` a leading `_` is inserted; identifiers colliding with a
/// reserved word get a `_` prefix.
pub fn sanitize_identifier(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = String::with_capacity(bytes.len() + 1);
    match bytes.first() {
        Some(b'a'..=b'z') | Some(b'_') | None => {}
        Some(_) => out.push('_'),
    }
    for &b in bytes {
        match b {
            b'a'..=b'z' | b'0'..=b'9' | b'_' => out.push(b as char),
            _ => out.push('_'),
        }
    }
    if is_reserved(&out) {
        out.insert(0, '_');
    }
    out
}

fn is_reserved(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    RESERVED_WORDS.binary_search(&upper.as_str()).is_ok()
}

/// Single-quotes `value`, escaping embedded quotes and backslashes.
pub(crate) fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Double(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::UBigInt(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Binary(v) => quote_literal(v),
        Value::Null => "null".to_string(),
    }
}

fn field_def(spec: &FieldSpec) -> String {
    format!("{} {}", spec.name, spec.ty)
}

/// `insert into db.table using db.stable (tags) tags(values) (ts,cols) values(...)`
pub(crate) fn insert_statement(point: &InsertPoint) -> String {
    let tag_names = point
        .tag_names
        .iter()
        .map(|name| sanitize_identifier(name))
        .join(",");
    let tag_values = point
        .tag_values
        .iter()
        .map(|value| quote_literal(value))
        .join(",");
    let columns = point
        .fields
        .iter()
        .map(|(name, _)| sanitize_identifier(name))
        .join(",");
    let values = point
        .fields
        .iter()
        .map(|(_, value)| format_value(value))
        .join(",");

    format!(
        "insert into {db}.{table} using {db}.{stable} ({tag_names}) tags({tag_values}) \
         (ts,{columns}) values({ts},{values})",
        db = point.db,
        table = point.table,
        stable = point.stable,
        ts = quote_literal(&format_timestamp(&point.ts)),
    )
}

/// Idempotent database creation with nanosecond precision and update mode.
pub(crate) fn create_database(db: &str) -> String {
    format!("create database if not exists {db} precision 'ns' update 2")
}

/// `create stable if not exists` with the inferred columns and tags.
pub(crate) fn create_stable(db: &str, stable: &str, fields: &[FieldSpec], tags: &[FieldSpec]) -> String {
    let columns = std::iter::once("ts timestamp".to_string())
        .chain(fields.iter().map(field_def))
        .join(",");
    let tag_defs = tags.iter().map(field_def).join(",");
    format!("create stable if not exists {db}.{stable} ({columns}) tags ({tag_defs})")
}

pub(crate) fn add_tag(db: &str, stable: &str, tag: &FieldSpec) -> String {
    format!("alter stable {db}.{stable} add tag {}", field_def(tag))
}

pub(crate) fn modify_tag(db: &str, stable: &str, tag: &FieldSpec) -> String {
    format!("alter stable {db}.{stable} modify tag {}", field_def(tag))
}

pub(crate) fn qualified(db: &str, table: &str) -> String {
    format!("{db}.{table}")
}

/// Reserved words of the target dialect, sorted for binary search.
/// An external contract of the database; extend only when the server does.
static RESERVED_WORDS: &[&str] = &[
    "ABORT", "ACCOUNT", "ACCOUNTS", "ADD", "AFTER", "ALL", "ALTER", "AND", "AS", "ASC",
    "ATTACH", "BEFORE", "BEGIN", "BETWEEN", "BIGINT", "BINARY", "BITAND", "BITNOT", "BITOR",
    "BLOCKS", "BOOL", "BY", "CACHE", "CACHELAST", "CASCADE", "CHANGE", "CLUSTER", "COLON",
    "COLUMN", "COMMA", "COMP", "COMPACT", "CONCAT", "CONFLICT", "CONNECTION", "CONNECTIONS",
    "CONNS", "COPY", "CREATE", "CTIME", "DATABASE", "DATABASES", "DAYS", "DBS", "DEFERRED",
    "DELIMITERS", "DESC", "DESCRIBE", "DETACH", "DISTINCT", "DIVIDE", "DNODE", "DNODES",
    "DOT", "DOUBLE", "DROP", "EACH", "END", "EQ", "EXISTS", "EXPLAIN", "FAIL", "FILE",
    "FILL", "FLOAT", "FOR", "FROM", "FSYNC", "GE", "GLOB", "GRANTS", "GROUP", "GT",
    "HAVING", "ID", "IF", "IGNORE", "IMMEDIATE", "IMPORT", "IN", "INITIALLY", "INSERT",
    "INSTEAD", "INT", "INTEGER", "INTERVAL", "INTO", "IS", "ISNULL", "JOIN", "KEEP", "KEY",
    "KILL", "LE", "LIKE", "LIMIT", "LINEAR", "LOCAL", "LP", "LSHIFT", "LT", "MATCH",
    "MAXROWS", "MINROWS", "MINUS", "MNODES", "MODIFY", "MODULES", "NCHAR", "NE", "NONE",
    "NOT", "NOTNULL", "NOW", "NULL", "OF", "OFFSET", "OR", "ORDER", "PARTITIONS", "PASS",
    "PLUS", "PPS", "PRAGMA", "PRECISION", "PREV", "PRIVILEGE", "QTIME", "QUERIES", "QUERY",
    "QUORUM", "RAISE", "REM", "REPLACE", "REPLICA", "RESET", "RESTRICT", "ROW", "RP",
    "RSHIFT", "SCORES", "SELECT", "SEMI", "SESSION", "SET", "SHOW", "SLASH", "SLIDING",
    "SLIMIT", "SMALLINT", "SOFFSET", "STABLE", "STABLES", "STAR", "STATE", "STATEMENT",
    "STATE_WINDOW", "STORAGE", "STREAM", "STREAMS", "STRING", "SYNCDB", "TABLE", "TABLES",
    "TAG", "TAGS", "TBNAME", "TIMES", "TIMESTAMP", "TINYINT", "TOPIC", "TOPICS", "TRIGGER",
    "TSERIES", "UMINUS", "UNION", "UNSIGNED", "UPDATE", "UPLUS", "USE", "USER", "USERS",
    "USING", "VALUES", "VARIABLE", "VARIABLES", "VGROUPS", "VIEW", "VNODES", "WAL", "WHERE",
    "WILDCARD",
];
