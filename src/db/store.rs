//! Read-only query executor.
//!
//! Every query opens a fresh read-only connection on a blocking thread, so a
//! slow statement can never wedge the async runtime and a write can never
//! succeed even if the validator were somehow bypassed. The wall-clock
//! budget is enforced with SQLite's progress handler, and the row cap is
//! applied independently of any LIMIT inside the statement.

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::query::{CellValue, ColumnInfo, QueryResult};

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    query_timeout: Duration,
    max_rows: usize,
}

impl Store {
    /// Open the dataset, verifying up front that it is reachable read-only.
    pub fn open(path: &Path, query_timeout: Duration, max_rows: usize) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
            query_timeout,
            max_rows,
        };
        store
            .connect()
            .with_context(|| format!("Cannot open database {}", path.display()))?;
        Ok(store)
    }

    /// Open a fresh read-only connection.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// Execute one accepted statement, returning the bounded result set.
    ///
    /// Store-level failures (syntax the validator missed, timeout, I/O) come
    /// back as plain errors; the caller classifies them as `ExecutionError`
    /// and never retries.
    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let store = self.clone();
        let sql = sql.to_string();
        let result = tokio::task::spawn_blocking(move || store.execute_blocking(&sql))
            .await
            .map_err(|e| anyhow!("query task failed: {}", e))?;
        result
    }

    fn execute_blocking(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let deadline = start + self.query_timeout;
        let timeout = self.query_timeout;

        let conn = self.connect()?;
        conn.progress_handler(100, Some(move || Instant::now() >= deadline));

        let run = || -> std::result::Result<QueryResult, rusqlite::Error> {
            let mut stmt = conn.prepare(sql)?;
            let mut columns: Vec<ColumnInfo> = stmt
                .column_names()
                .iter()
                .map(|name| ColumnInfo {
                    name: name.to_string(),
                    max_width: unicode_width::UnicodeWidthStr::width(*name),
                })
                .collect();
            let column_count = columns.len();

            let mut result_rows: Vec<Vec<CellValue>> = Vec::new();
            let mut truncated = false;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                if result_rows.len() >= self.max_rows {
                    truncated = true;
                    break;
                }
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let cell = match row.get_ref(i)? {
                        rusqlite::types::ValueRef::Null => CellValue::Null,
                        rusqlite::types::ValueRef::Integer(v) => CellValue::Integer(v),
                        rusqlite::types::ValueRef::Real(v) => CellValue::Real(v),
                        rusqlite::types::ValueRef::Text(t) => {
                            CellValue::Text(String::from_utf8_lossy(t).into_owned())
                        }
                        rusqlite::types::ValueRef::Blob(b) => CellValue::Blob(b.len()),
                    };
                    let width = cell.display_width();
                    if width > columns[i].max_width {
                        columns[i].max_width = width;
                    }
                    cells.push(cell);
                }
                result_rows.push(cells);
            }

            let row_count = result_rows.len();
            Ok(QueryResult {
                columns,
                rows: result_rows,
                row_count,
                truncated,
                execution_time: start.elapsed(),
            })
        };

        run().map_err(|e| {
            if is_interrupt(&e) {
                anyhow!("query timed out after {:?}", timeout)
            } else {
                anyhow!("{}", e)
            }
        })
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}
