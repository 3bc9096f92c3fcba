//! Schema descriptor for the dataset.
//!
//! Introspected from the live database at startup, so the description given
//! to the model and the identifiers the validator accepts can never drift
//! from what the store actually contains.

use anyhow::{Context, Result};
use rusqlite::Connection;

#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count: i64,
}

#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableDescriptor>,
}

impl SchemaDescriptor {
    /// Introspect all user tables through `sqlite_master` and
    /// `PRAGMA table_info`.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .context("Failed to read sqlite_master")?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let mut info = conn.prepare(&format!("PRAGMA table_info(\"{}\")", name))?;
            let columns: Vec<ColumnDescriptor> = info
                .query_map([], |row| {
                    Ok(ColumnDescriptor {
                        name: row.get::<_, String>(1)?,
                        data_type: row.get::<_, String>(2)?,
                        not_null: row.get::<_, i64>(3)? != 0,
                        is_primary_key: row.get::<_, i64>(5)? != 0,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;

            let row_count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", name), [], |row| {
                    row.get(0)
                })
                .with_context(|| format!("Failed to count rows in {}", name))?;

            tables.push(TableDescriptor {
                name,
                columns,
                row_count,
            });
        }

        Ok(Self { tables })
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// True when any table carries a column with this name. Candidate
    /// statements are checked column-by-column without resolving which table
    /// an unqualified reference binds to.
    pub fn has_column(&self, name: &str) -> bool {
        self.tables
            .iter()
            .any(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
    }

    /// Render the schema block included in every oracle prompt.
    pub fn prompt_text(&self) -> String {
        let mut out = String::from("DATABASE SCHEMA\n");
        for table in &self.tables {
            out.push_str(&format!("\nTable: {}\n", table.name));
            out.push_str("Columns:\n");
            for col in &table.columns {
                out.push_str(&format!("  - {} ({})", col.name, col.data_type));
                if col.is_primary_key {
                    out.push_str(" [PRIMARY KEY]");
                }
                if col.not_null && !col.is_primary_key {
                    out.push_str(" [NOT NULL]");
                }
                out.push('\n');
            }
            out.push_str(&format!("Rows: {}\n", table.row_count));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE transactions (
                 id INTEGER PRIMARY KEY,
                 amount REAL NOT NULL,
                 category TEXT,
                 date TEXT
             );
             CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO transactions (amount, category, date)
                 VALUES (10.5, 'food', '2026-07-01'), (20.0, 'travel', '2026-07-02');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_load_finds_tables_and_columns() {
        let schema = SchemaDescriptor::load(&sample_db()).unwrap();
        assert_eq!(schema.tables.len(), 2);
        assert!(schema.has_table("transactions"));
        assert!(schema.has_table("CUSTOMERS"));
        assert!(schema.has_column("amount"));
        assert!(schema.has_column("Name"));
        assert!(!schema.has_table("refunds"));
        assert!(!schema.has_column("salary"));
    }

    #[test]
    fn test_row_counts() {
        let schema = SchemaDescriptor::load(&sample_db()).unwrap();
        let tx = schema
            .tables
            .iter()
            .find(|t| t.name == "transactions")
            .unwrap();
        assert_eq!(tx.row_count, 2);
    }

    #[test]
    fn test_prompt_text_mentions_every_column() {
        let schema = SchemaDescriptor::load(&sample_db()).unwrap();
        let text = schema.prompt_text();
        assert!(text.contains("Table: transactions"));
        assert!(text.contains("amount (REAL) [NOT NULL]"));
        assert!(text.contains("id (INTEGER) [PRIMARY KEY]"));
        assert!(text.contains("Rows: 2"));
    }

    #[test]
    fn test_internal_tables_skipped() {
        let conn = sample_db();
        // sqlite_sequence appears once an AUTOINCREMENT table exists
        conn.execute_batch(
            "CREATE TABLE logs (id INTEGER PRIMARY KEY AUTOINCREMENT, msg TEXT);
             INSERT INTO logs (msg) VALUES ('x');",
        )
        .unwrap();
        let schema = SchemaDescriptor::load(&conn).unwrap();
        assert!(!schema.tables.iter().any(|t| t.name.starts_with("sqlite_")));
    }
}
