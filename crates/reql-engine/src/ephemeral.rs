//! Ephemeral SQLite store
//!
//! Each top-level execution gets a private in-memory database. Referenced
//! results are materialized into it as tables, the statement runs against
//! it, and the database is dropped afterwards.
//!
//! An optional memory limit is enforced through SQLite's page budget:
//! `max_page_count = limit / page_size`. Writes beyond it fail with
//! `SQLITE_FULL`, which surfaces as [`StoreError::ResourceLimit`] after the
//! failing transaction has been rolled back.

use reql_core::{Column, ResultSet, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, InterruptHandle};
use std::collections::HashSet;
use tracing::{debug, info};

/// Errors raised by the ephemeral store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Memory limit of {limit_bytes} bytes exceeded ({attempted_bytes} bytes needed)")]
    ResourceLimit {
        limit_bytes: u64,
        attempted_bytes: u64,
        /// Table being written, if the limit was hit while materializing
        table: Option<String>,
    },

    #[error("Statement interrupted")]
    Interrupted,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// What a statement produced
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutput {
    /// Column names and positional rows
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },

    /// The statement has no result columns
    NoData,
}

/// In-memory database living for one execution
#[derive(Debug)]
pub struct EphemeralStore {
    conn: Connection,
    budget: Budget,
}

/// Page budget used to report limit violations
#[derive(Debug, Clone, Copy)]
struct Budget {
    memory_limit: Option<u64>,
    page_size: u64,
}

impl Budget {
    fn used_bytes(&self, conn: &Connection) -> Result<u64, StoreError> {
        let pages: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
        Ok(pages.max(0) as u64 * self.page_size)
    }

    fn classify(&self, conn: &Connection, error: rusqlite::Error, table: Option<&str>) -> StoreError {
        match error.sqlite_error_code() {
            Some(ErrorCode::DiskFull) => StoreError::ResourceLimit {
                limit_bytes: self.memory_limit.unwrap_or(0),
                attempted_bytes: self.used_bytes(conn).unwrap_or(0) + self.page_size,
                table: table.map(String::from),
            },
            Some(ErrorCode::OperationInterrupted) => StoreError::Interrupted,
            _ => StoreError::Sqlite(error),
        }
    }

    /// Commit on success, otherwise classify the failure and roll back
    fn finish<T>(
        &self,
        tx: rusqlite::Transaction<'_>,
        outcome: Result<T, StoreError>,
        table: &str,
    ) -> Result<T, StoreError> {
        match outcome {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(StoreError::Sqlite(e)) => Err(self.classify(&tx, e, Some(table))),
            Err(other) => Err(other),
        }
    }
}

impl EphemeralStore {
    /// Open a fresh database, optionally capped at `memory_limit` bytes
    pub fn open(memory_limit: Option<u64>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
        let page_size = page_size.max(1) as u64;

        if let Some(limit) = memory_limit {
            // A zero page count would read the pragma instead of setting it
            let pages = (limit / page_size).max(1);
            let applied: i64 =
                conn.pragma_update_and_check(None, "max_page_count", pages as i64, |row| row.get(0))?;
            conn.execute_batch("VACUUM")?;
            info!(
                "Restricted ephemeral store memory to {} bytes (page_size: {}, pages: {})",
                limit, page_size, applied
            );
        }

        Ok(Self {
            conn,
            budget: Budget {
                memory_limit,
                page_size,
            },
        })
    }

    pub fn memory_limit(&self) -> Option<u64> {
        self.budget.memory_limit
    }

    /// Handle that aborts the running statement from another thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    /// Bytes currently allocated to database pages
    pub fn used_bytes(&self) -> Result<u64, StoreError> {
        self.budget.used_bytes(&self.conn)
    }

    /// Create an empty table
    pub fn create_table(&mut self, name: &str, columns: &[Column]) -> Result<(), StoreError> {
        let budget = self.budget;
        let tx = self.conn.transaction()?;
        let outcome = create_table(&tx, name, columns);
        budget.finish(tx, outcome, name)
    }

    /// Insert rows in one batch; nothing is inserted if any row fails
    pub fn insert_rows(&mut self, name: &str, result: &ResultSet) -> Result<usize, StoreError> {
        let budget = self.budget;
        let tx = self.conn.transaction()?;
        let outcome = insert_rows(&tx, name, result);
        budget.finish(tx, outcome, name)
    }

    /// Create a table for `result` and fill it, atomically
    pub fn materialize(&mut self, name: &str, result: &ResultSet) -> Result<usize, StoreError> {
        let budget = self.budget;
        let tx = self.conn.transaction()?;
        let outcome = create_table(&tx, name, &result.columns).and_then(|()| insert_rows(&tx, name, result));
        let inserted = budget.finish(tx, outcome, name)?;
        info!("Inserted {} rows into {}", inserted, name);
        Ok(inserted)
    }

    /// Run a statement and collect its output
    pub fn execute(&self, text: &str) -> Result<StatementOutput, StoreError> {
        let fail = |e| self.budget.classify(&self.conn, e, None);
        let mut stmt = self.conn.prepare(text).map_err(fail)?;

        if stmt.column_count() == 0 {
            stmt.execute([]).map_err(fail)?;
            return Ok(StatementOutput::NoData);
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();

        let mut cursor = stmt.query([]).map_err(fail)?;
        while let Some(row) = cursor.next().map_err(fail)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get(i)?));
            }
            rows.push(values);
        }

        Ok(StatementOutput::Rows { columns, rows })
    }

    /// Close the database, reporting any error the engine raises on close
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::from(e))?;
        debug!("Closed ephemeral store");
        Ok(())
    }
}

fn create_table(conn: &Connection, name: &str, columns: &[Column]) -> Result<(), StoreError> {
    // Columns carry no declared type so values keep their own storage class
    let definitions = unique_column_names(columns.iter().map(|c| c.name.as_str()))
        .into_iter()
        .map(|column_name| quote_identifier(&column_name))
        .collect::<Vec<_>>()
        .join(", ");

    let ddl = format!("CREATE TABLE {} ({})", quote_identifier(name), definitions);
    debug!("DDL: {}", ddl);
    conn.execute(&ddl, [])?;
    Ok(())
}

fn insert_rows(conn: &Connection, name: &str, result: &ResultSet) -> Result<usize, StoreError> {
    if result.columns.is_empty() {
        return Ok(0);
    }

    let names = unique_column_names(result.columns.iter().map(|c| c.name.as_str()));
    let dml = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(name),
        names.iter().map(|n| quote_identifier(n)).collect::<Vec<_>>().join(", "),
        vec!["?"; names.len()].join(", ")
    );
    debug!("DML: {}", dml);

    let mut stmt = conn.prepare_cached(&dml)?;
    for row in &result.rows {
        stmt.execute(rusqlite::params_from_iter(result.row_values(row).map(to_sql)))?;
    }

    Ok(result.rows.len())
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rename repeated column names by appending a counter
///
/// SQLite compares column names case-insensitively, so `id` and `ID` are
/// duplicates too.
pub fn unique_column_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut counter = 1;
    let mut unique = Vec::new();

    for name in names {
        let mut candidate = name.to_string();
        while !seen.insert(candidate.to_lowercase()) {
            candidate = format!("{}{}", name, counter);
            counter += 1;
        }
        unique.push(candidate);
    }

    unique
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Real(f) => Value::Float(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}
