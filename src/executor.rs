//! Query execution against the SQLite store.
//!
//! Each call opens its own connection and drops it before returning, whether
//! the statement succeeded or not.

use crate::error::{AgentError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, OpenFlags};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

const ONE_STATEMENT: &str = "You can only execute one statement at a time.";

/// A single scalar produced by a query.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(f) => CellValue::Real(f),
            ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => CellValue::Blob(b.to_vec()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Real(r) => write!(f, "{}", r),
            CellValue::Text(t) => write!(f, "{}", t),
            CellValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// One result row; values are positional and line up with
/// [`TabularResult::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<CellValue>,
}

impl Row {
    pub fn new(values: Vec<CellValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rows returned by one statement. The column set comes from the statement
/// itself, so nothing about it is known until execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TabularResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value of `column` in row `row`, if both exist.
    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.values.get(idx)
    }

    /// Human-scannable text table: header line, then one right-aligned line per row.
    pub fn render(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.values.iter().map(|v| v.to_string()).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, header)| {
                cells
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(header.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut lines = vec![format_line(&self.columns, &widths)];
        if cells.is_empty() {
            lines.push("(no rows)".to_string());
        }
        for row in &cells {
            lines.push(format_line(row, &widths));
        }
        lines.join("\n")
    }
}

fn format_line(values: &[String], widths: &[usize]) -> String {
    values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:>width$}", value, width = *width))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs SQL against the store at `db_path`.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    db_path: PathBuf,
}

impl QueryExecutor {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Execute one statement on a blocking worker and collect every row.
    pub async fn execute(&self, sql: &str) -> Result<TabularResult> {
        let db_path = self.db_path.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || execute_blocking(&db_path, &sql))
            .await
            .map_err(|e| AgentError::Execution(format!("Query task failed: {}", e)))?
    }
}

fn execute_blocking(db_path: &Path, sql: &str) -> Result<TabularResult> {
    let started = Instant::now();
    // No CREATE flag: a missing store is an error, not a fresh empty database.
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| AgentError::Execution(format!("{} ({})", e, db_path.display())))?;

    let result = read_all(&conn, sql);
    drop(conn);

    let result = result?;
    info!(
        rows = result.row_count(),
        columns = result.column_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "query executed"
    );
    Ok(result)
}

fn read_all(conn: &Connection, sql: &str) -> Result<TabularResult> {
    debug!(sql, "executing query");
    let mut batch = Batch::new(conn, sql);
    let mut statement = batch
        .next()
        .map_err(execution_error)?
        .ok_or_else(|| AgentError::Execution("No statement to execute.".to_string()))?;
    // Only whitespace and comments may follow the first statement.
    if !matches!(batch.next(), Ok(None)) {
        return Err(AgentError::Execution(ONE_STATEMENT.to_string()));
    }

    let columns: Vec<String> = statement
        .column_names()
        .iter()
        .map(ToString::to_string)
        .collect();
    let column_count = columns.len();

    let mut rows = statement.query([]).map_err(execution_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(execution_error)? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(CellValue::from(row.get_ref(idx).map_err(execution_error)?));
        }
        out.push(Row::new(values));
    }

    Ok(TabularResult::new(columns, out))
}

fn execution_error(e: rusqlite::Error) -> AgentError {
    AgentError::Execution(e.to_string())
}
