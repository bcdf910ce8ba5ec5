//! An in-process mock of the database's native session protocol.
//!
//! Tracks databases, super tables and tag widths, answers with the same
//! error codes the real server would, and logs every statement so tests
//! can assert on round-trip counts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tsgate::errors::{ConnectionError, DbError, ErrorCode, ExecuteError};
use tsgate::{ColumnDesc, Database, Session};

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Default)]
pub struct StableState {
    /// `(name, type_name, length)` per time-series column, `ts` included.
    pub columns: Vec<(String, String, usize)>,
    /// `(name, binary_width)` per tag.
    pub tags: Vec<(String, usize)>,
}

impl StableState {
    fn tag_width(&self, name: &str) -> Option<usize> {
        self.tags
            .iter()
            .find(|(tag, _)| tag == name)
            .map(|(_, width)| *width)
    }
}

#[derive(Debug, Clone)]
pub struct InsertRow {
    pub table: String,
    /// `(tag_name, unquoted_value)` pairs.
    pub tags: Vec<(String, String)>,
    /// `(column_name, literal_text)` pairs, timestamp excluded.
    pub fields: Vec<(String, String)>,
    pub ts: String,
}

#[derive(Debug, Default)]
struct DbState {
    precision: String,
    stables: HashMap<String, StableState>,
    rows: Vec<InsertRow>,
}

#[derive(Debug, Default)]
struct ServerState {
    accounts: HashMap<String, String>,
    databases: HashMap<String, DbState>,
    statements: Vec<String>,
    sessions_opened: usize,
    sessions_closed: usize,
    fail_probe: bool,
    execute_delay: Option<Duration>,
}

/// The mock server; cloning shares state.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        let server = MockServer::default();
        server.add_account("root", "taosdata");
        server
    }

    pub fn add_account(&self, user: &str, password: &str) {
        self.lock()
            .accounts
            .insert(user.to_string(), password.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn statement_count(&self) -> usize {
        self.lock().statements.len()
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.lock().sessions_closed
    }

    pub fn sessions_live(&self) -> usize {
        let state = self.lock();
        state.sessions_opened - state.sessions_closed
    }

    pub fn db_precision(&self, db: &str) -> Option<String> {
        self.lock().databases.get(db).map(|d| d.precision.clone())
    }

    pub fn stable(&self, db: &str, stable: &str) -> Option<StableState> {
        self.lock()
            .databases
            .get(db)
            .and_then(|d| d.stables.get(stable))
            .cloned()
    }

    pub fn rows(&self, db: &str) -> Vec<InsertRow> {
        self.lock()
            .databases
            .get(db)
            .map(|d| d.rows.clone())
            .unwrap_or_default()
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.lock().fail_probe = fail;
    }

    pub fn set_execute_delay(&self, delay: Option<Duration>) {
        self.lock().execute_delay = delay;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().expect("mock state lock")
    }

    fn run_statement(&self, sql: &str) -> Result<u64, ExecuteError> {
        let mut state = self.lock();

        if sql == "select server_status()" {
            if state.fail_probe {
                return Err(ExecuteError::Broken("server gone".into()));
            }
            return Ok(1);
        }
        if let Some(rest) = sql.strip_prefix("insert into ") {
            return run_insert(&mut state, rest);
        }
        if let Some(rest) = sql.strip_prefix("create database if not exists ") {
            return run_create_database(&mut state, rest);
        }
        if let Some(rest) = sql.strip_prefix("create stable if not exists ") {
            return run_create_stable(&mut state, rest);
        }
        if let Some(rest) = sql.strip_prefix("alter stable ") {
            return run_alter(&mut state, rest);
        }
        Err(ExecuteError::Db(DbError::new(
            ErrorCode::Other(0x0216),
            format!("syntax error near '{sql}'"),
        )))
    }
}

#[async_trait]
impl Database for MockServer {
    async fn connect(
        &self,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn Session>, ConnectionError> {
        let mut state = self.lock();
        match state.accounts.get(user) {
            Some(stored) if stored == password => {
                state.sessions_opened += 1;
                Ok(Box::new(MockSession {
                    server: self.clone(),
                }))
            }
            _ => Err(ConnectionError::Authentication {
                user: user.to_string(),
            }),
        }
    }
}

struct MockSession {
    server: MockServer,
}

#[async_trait]
impl Session for MockSession {
    async fn execute(&mut self, sql: &str) -> Result<u64, ExecuteError> {
        // The statement reaches the server before any response delay, so it
        // stays in the log even when the client times out and hangs up.
        let delay = {
            let mut state = self.server.lock();
            state.statements.push(sql.to_string());
            state.execute_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.server.run_statement(sql)
    }

    async fn describe(&mut self, table: &str) -> Result<Vec<ColumnDesc>, ExecuteError> {
        let (db, stable) = split_qualified(table);
        let state = self.server.lock();
        let stable = state
            .databases
            .get(db)
            .and_then(|d| d.stables.get(stable))
            .ok_or_else(|| {
                ExecuteError::Db(DbError::new(ErrorCode::InvalidTableName, "Table does not exist"))
            })?;

        let mut columns = Vec::new();
        for (name, type_name, length) in &stable.columns {
            columns.push(ColumnDesc {
                field: name.clone(),
                type_name: type_name.clone(),
                length: *length,
                note: String::new(),
            });
        }
        for (name, width) in &stable.tags {
            columns.push(ColumnDesc {
                field: name.clone(),
                type_name: "BINARY".to_string(),
                length: *width,
                note: "TAG".to_string(),
            });
        }
        Ok(columns)
    }

    async fn close(&mut self) {
        self.server.lock().sessions_closed += 1;
    }
}

fn split_qualified(qualified: &str) -> (&str, &str) {
    qualified.split_once('.').expect("qualified table name")
}

fn take_until<'a>(input: &'a str, delim: &str) -> (&'a str, &'a str) {
    let (head, tail) = input.split_once(delim).expect("statement shape");
    (head, tail)
}

fn unquote(literal: &str) -> String {
    let inner = literal
        .trim()
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(literal);
    inner.replace("\\'", "'").replace("\\\\", "\\")
}

fn db_error(code: ErrorCode, message: &str) -> ExecuteError {
    ExecuteError::Db(DbError::new(code, message))
}

/// `{db}.{table} using {db}.{stable} (tags) tags(values) (ts,cols) values(...)`
fn run_insert(state: &mut ServerState, rest: &str) -> Result<u64, ExecuteError> {
    let (target, rest) = take_until(rest, " using ");
    let (_, table) = split_qualified(target);
    let (stable_ref, rest) = take_until(rest, " (");
    let (db, stable) = split_qualified(stable_ref);
    let (tag_names, rest) = take_until(rest, ") tags(");
    let (tag_values, rest) = take_until(rest, ") (ts,");
    let (columns, rest) = take_until(rest, ") values(");
    let values = rest.strip_suffix(')').expect("statement shape");

    let db_state = state
        .databases
        .get_mut(db)
        .ok_or_else(|| db_error(ErrorCode::DbNotSelected, "Database not specified or available"))?;
    let stable_state = db_state
        .stables
        .get(stable)
        .ok_or_else(|| db_error(ErrorCode::InvalidTableName, "Table does not exist"))?;

    let tag_names: Vec<&str> = tag_names.split(',').collect();
    let tag_values: Vec<String> = tag_values.split(',').map(unquote).collect();
    assert_eq!(tag_names.len(), tag_values.len(), "malformed insert");

    for (name, value) in tag_names.iter().zip(&tag_values) {
        match stable_state.tag_width(name) {
            None => {
                return Err(db_error(
                    ErrorCode::InvalidOperation,
                    "invalid operation: unknown tag",
                ))
            }
            Some(width) if width < value.len() => {
                return Err(db_error(
                    ErrorCode::InvalidOperation,
                    "invalid operation: tag value too long",
                ))
            }
            Some(_) => {}
        }
    }

    let mut value_iter = values.split(',');
    let ts = unquote(value_iter.next().expect("timestamp literal"));
    let fields: Vec<(String, String)> = columns
        .split(',')
        .map(str::to_string)
        .zip(value_iter.map(str::to_string))
        .collect();

    db_state.rows.push(InsertRow {
        table: table.to_string(),
        tags: tag_names
            .iter()
            .map(|s| s.to_string())
            .zip(tag_values)
            .collect(),
        fields,
        ts,
    });
    Ok(1)
}

/// `{db} precision 'ns' update 2`
fn run_create_database(state: &mut ServerState, rest: &str) -> Result<u64, ExecuteError> {
    let (db, rest) = take_until(rest, " precision '");
    let (precision, _) = take_until(rest, "'");
    state
        .databases
        .entry(db.to_string())
        .or_insert_with(|| DbState {
            precision: precision.to_string(),
            ..DbState::default()
        });
    Ok(0)
}

/// `{db}.{stable} (ts timestamp,defs) tags (defs)`
fn run_create_stable(state: &mut ServerState, rest: &str) -> Result<u64, ExecuteError> {
    let (target, rest) = take_until(rest, " (");
    let (db, stable) = split_qualified(target);
    let (columns, rest) = take_until(rest, ") tags (");
    let tags = rest.strip_suffix(')').expect("statement shape");

    let db_state = state
        .databases
        .get_mut(db)
        .ok_or_else(|| db_error(ErrorCode::DbNotSelected, "Database not specified or available"))?;
    if db_state.stables.contains_key(stable) {
        // `if not exists` makes the statement a no-op.
        return Ok(0);
    }

    let mut created = StableState::default();
    for def in columns.split(',') {
        created.columns.push(parse_column_def(def));
    }
    for def in tags.split(',') {
        let (name, type_name, width) = parse_column_def(def);
        assert_eq!(type_name, "BINARY", "tags are BINARY in this data model");
        created.tags.push((name, width));
    }
    db_state.stables.insert(stable.to_string(), created);
    Ok(0)
}

/// `{db}.{stable} add tag {def}` or `{db}.{stable} modify tag {def}`
fn run_alter(state: &mut ServerState, rest: &str) -> Result<u64, ExecuteError> {
    let (target, rest) = take_until(rest, " ");
    let (db, stable) = split_qualified(target);

    let stable_state = state
        .databases
        .get_mut(db)
        .and_then(|d| d.stables.get_mut(stable))
        .ok_or_else(|| db_error(ErrorCode::InvalidTableName, "Table does not exist"))?;

    if let Some(def) = rest.strip_prefix("add tag ") {
        let (name, _, width) = parse_column_def(def);
        if stable_state.tag_width(&name).is_some() {
            return Err(db_error(
                ErrorCode::InvalidOperation,
                "invalid operation: duplicated tag",
            ));
        }
        stable_state.tags.push((name, width));
        return Ok(0);
    }
    if let Some(def) = rest.strip_prefix("modify tag ") {
        let (name, _, width) = parse_column_def(def);
        let current = stable_state
            .tag_width(&name)
            .ok_or_else(|| db_error(ErrorCode::InvalidOperation, "invalid operation: unknown tag"))?;
        if width <= current {
            return Err(db_error(
                ErrorCode::InvalidTagLength,
                "new tag length must be larger than the old one",
            ));
        }
        for tag in stable_state.tags.iter_mut() {
            if tag.0 == name {
                tag.1 = width;
            }
        }
        return Ok(0);
    }
    Err(db_error(ErrorCode::Other(0x0216), "unsupported alter"))
}

/// Parses `name TYPE` / `name BINARY(n)` / `name BIGINT UNSIGNED`.
fn parse_column_def(def: &str) -> (String, String, usize) {
    let def = def.trim();
    let (name, ty) = def.split_once(' ').expect("column definition");
    if let Some(width) = ty
        .strip_prefix("BINARY(")
        .and_then(|s| s.strip_suffix(')'))
    {
        let width: usize = width.parse().expect("binary width");
        (name.to_string(), "BINARY".to_string(), width)
    } else {
        (name.to_string(), ty.to_uppercase(), 8)
    }
}
