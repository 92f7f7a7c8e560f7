//! CSV → SQLite loader that builds the store the pipeline queries.
//!
//! Runs once, offline, before the server starts. Column headers are
//! lowercased so they line up with the schema text given to the model.

use crate::error::{AgentError, Result};
use crate::schema::{AD_SALES_TABLE, ELIGIBILITY_TABLE, TOTAL_SALES_TABLE};
use csv::ReaderBuilder;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// One CSV export and the table it becomes.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pub table: String,
    pub path: PathBuf,
}

impl CsvSource {
    pub fn new(table: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            table: table.into(),
            path: path.into(),
        }
    }
}

/// The three exports the e-commerce schema expects.
pub fn ecommerce_sources(eligibility: PathBuf, ad_sales: PathBuf, total_sales: PathBuf) -> Vec<CsvSource> {
    vec![
        CsvSource::new(ELIGIBILITY_TABLE, eligibility),
        CsvSource::new(AD_SALES_TABLE, ad_sales),
        CsvSource::new(TOTAL_SALES_TABLE, total_sales),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `true`/`false` in any case, stored as 1/0.
    Boolean,
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Boolean | ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    /// Narrowest type for a single cell.
    fn of(cell: &str) -> Self {
        if parse_bool(cell).is_some() {
            ColumnType::Boolean
        } else if cell.parse::<i64>().is_ok() {
            ColumnType::Integer
        } else if cell.parse::<f64>().is_ok() {
            ColumnType::Real
        } else {
            ColumnType::Text
        }
    }

    /// Narrowest type that still holds `cell`, given what the column has seen so far.
    fn widen(self, cell: &str) -> Self {
        match (self, ColumnType::of(cell)) {
            (seen, next) if seen == next => seen,
            (ColumnType::Integer, ColumnType::Real) | (ColumnType::Real, ColumnType::Integer) => ColumnType::Real,
            _ => ColumnType::Text,
        }
    }
}

fn parse_bool(cell: &str) -> Option<bool> {
    if cell.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub table: String,
    pub rows: usize,
    /// `(name, declared type)` as SQLite reports them.
    pub columns: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub tables: Vec<TableReport>,
    pub skipped: Vec<String>,
}

/// Rebuild `db_path` from scratch out of `sources`.
///
/// A missing CSV skips its table; a CSV that fails to load is logged and the
/// rest still load.
pub fn ingest(db_path: &Path, sources: &[CsvSource]) -> Result<IngestReport> {
    if db_path.exists() {
        fs::remove_file(db_path)?;
        info!(db = %db_path.display(), "removed existing database");
    }
    let mut conn = Connection::open(db_path).map_err(ingestion_error)?;
    info!(db = %db_path.display(), "created new database");

    let mut report = IngestReport::default();
    for source in sources {
        if !source.path.exists() {
            warn!(table = %source.table, path = %source.path.display(), "CSV not found, skipping table");
            report.skipped.push(source.table.clone());
            continue;
        }
        match load_table(&mut conn, source) {
            Ok(rows) => {
                info!(table = %source.table, rows, "table created");
                report.tables.push(TableReport {
                    table: source.table.clone(),
                    rows,
                    columns: table_columns(&conn, &source.table)?,
                });
            }
            Err(e) => {
                error!(table = %source.table, path = %source.path.display(), "failed to load: {}", e);
                report.skipped.push(source.table.clone());
            }
        }
    }
    Ok(report)
}

fn load_table(conn: &mut Connection, source: &CsvSource) -> Result<usize> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&source.path)?;

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    if headers.is_empty() {
        return Err(AgentError::Ingestion(format!("{} has no header row", source.path.display())));
    }

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let cells: Vec<Option<String>> = (0..headers.len())
            .map(|idx| {
                let cell = record.get(idx).unwrap_or("").trim();
                if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        records.push(cells);
    }

    let types = infer_column_types(headers.len(), &records);
    let column_defs: Vec<String> = headers
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.as_sql()))
        .collect();
    let placeholders = vec!["?"; headers.len()].join(", ");
    let table = quote_ident(&source.table);

    let tx = conn.transaction().map_err(ingestion_error)?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({});",
        column_defs.join(", ")
    ))
    .map_err(ingestion_error)?;
    {
        let mut insert = tx
            .prepare(&format!("INSERT INTO {table} VALUES ({})", placeholders))
            .map_err(ingestion_error)?;
        for cells in &records {
            let values = cells.iter().zip(&types).map(|(cell, ty)| to_sql_value(cell.as_deref(), *ty));
            insert.execute(params_from_iter(values)).map_err(ingestion_error)?;
        }
    }
    tx.commit().map_err(ingestion_error)?;
    Ok(records.len())
}

fn infer_column_types(width: usize, records: &[Vec<Option<String>>]) -> Vec<ColumnType> {
    (0..width)
        .map(|idx| {
            let mut ty: Option<ColumnType> = None;
            for cell in records.iter().filter_map(|r| r[idx].as_deref()) {
                let next = match ty {
                    None => ColumnType::of(cell),
                    Some(seen) => seen.widen(cell),
                };
                ty = Some(next);
                if next == ColumnType::Text {
                    break;
                }
            }
            // An all-empty column stays TEXT.
            ty.unwrap_or(ColumnType::Text)
        })
        .collect()
}

fn to_sql_value(cell: Option<&str>, ty: ColumnType) -> SqlValue {
    let Some(cell) = cell else {
        return SqlValue::Null;
    };
    match ty {
        ColumnType::Boolean => match parse_bool(cell) {
            Some(flag) => SqlValue::Integer(flag as i64),
            None => SqlValue::Text(cell.to_string()),
        },
        ColumnType::Integer => cell.parse().map(SqlValue::Integer).unwrap_or_else(|_| SqlValue::Text(cell.to_string())),
        ColumnType::Real => cell.parse().map(SqlValue::Real).unwrap_or_else(|_| SqlValue::Text(cell.to_string())),
        ColumnType::Text => SqlValue::Text(cell.to_string()),
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
        .map_err(ingestion_error)?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
        .map_err(ingestion_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ingestion_error)?;
    Ok(columns)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn ingestion_error(e: rusqlite::Error) -> AgentError {
    AgentError::Ingestion(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_widen() {
        assert_eq!(ColumnType::Integer.widen("12"), ColumnType::Integer);
        assert_eq!(ColumnType::Integer.widen("1.5"), ColumnType::Real);
        assert_eq!(ColumnType::Real.widen("3"), ColumnType::Real);
        assert_eq!(ColumnType::Real.widen("abc"), ColumnType::Text);
        assert_eq!(ColumnType::Text.widen("3"), ColumnType::Text);
        assert_eq!(ColumnType::Boolean.widen("FALSE"), ColumnType::Boolean);
        assert_eq!(ColumnType::Boolean.widen("1"), ColumnType::Text);
        assert_eq!(ColumnType::Integer.widen("true"), ColumnType::Text);
    }

    #[test]
    fn test_boolean_column_is_stored_as_integer_flags() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "elig.csv",
            "item_id,eligibility,message\n101,TRUE,ok\n202,FALSE,Low stock\n303,,\n",
        );
        let db = dir.path().join("shop.db");
        let report = ingest(&db, &[CsvSource::new(ELIGIBILITY_TABLE, csv)]).unwrap();

        assert_eq!(
            report.tables[0].columns,
            vec![
                ("item_id".to_string(), "INTEGER".to_string()),
                ("eligibility".to_string(), "INTEGER".to_string()),
                ("message".to_string(), "TEXT".to_string()),
            ]
        );

        let conn = Connection::open(&db).unwrap();
        let eligible: Vec<i64> = conn
            .prepare("SELECT item_id FROM product_eligibility_table WHERE eligibility = 1")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(eligible, vec![101]);

        let via_true: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM product_eligibility_table WHERE eligibility = TRUE",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(via_true, 1);
    }

    #[test]
    fn test_ingest_lowercases_headers_and_infers_types() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "ad.csv",
            "Date,Item_ID,Ad_Sales,Clicks\n2025-06-01,101,120.5,37\n2025-06-02,101,,40\n",
        );
        let db = dir.path().join("shop.db");
        let report = ingest(&db, &[CsvSource::new(AD_SALES_TABLE, csv)]).unwrap();

        assert_eq!(report.tables.len(), 1);
        let table = &report.tables[0];
        assert_eq!(table.rows, 2);
        assert_eq!(
            table.columns,
            vec![
                ("date".to_string(), "TEXT".to_string()),
                ("item_id".to_string(), "INTEGER".to_string()),
                ("ad_sales".to_string(), "REAL".to_string()),
                ("clicks".to_string(), "INTEGER".to_string()),
            ]
        );

        let conn = Connection::open(&db).unwrap();
        let (clicks, nulls): (i64, i64) = conn
            .query_row(
                "SELECT SUM(clicks), SUM(ad_sales IS NULL) FROM product_ad_sales_metrics WHERE item_id = 101",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(clicks, 77);
        assert_eq!(nulls, 1);
    }

    #[test]
    fn test_ingest_replaces_existing_database() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("shop.db");
        Connection::open(&db)
            .unwrap()
            .execute_batch("CREATE TABLE stale (x INTEGER);")
            .unwrap();

        let csv = write_csv(&dir, "total.csv", "date,item_id,total_sales,total_units_ordered\n2025-06-01,1,10.0,2\n");
        ingest(&db, &[CsvSource::new(TOTAL_SALES_TABLE, csv)]).unwrap();

        let conn = Connection::open(&db).unwrap();
        let stale: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 'stale'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stale, 0);
    }

    #[test]
    fn test_missing_csv_is_skipped() {
        let dir = TempDir::new().unwrap();
        let present = write_csv(&dir, "elig.csv", "item_id,eligibility,message\n1,true,ok\n");
        let sources = ecommerce_sources(
            present,
            dir.path().join("missing_ad.csv"),
            dir.path().join("missing_total.csv"),
        );
        let report = ingest(&dir.path().join("shop.db"), &sources).unwrap();
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].table, ELIGIBILITY_TABLE);
        assert_eq!(report.skipped, vec![AD_SALES_TABLE.to_string(), TOTAL_SALES_TABLE.to_string()]);
    }
}
