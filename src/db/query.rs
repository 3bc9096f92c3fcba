use std::time::Duration;

/// A single SQLite scalar, one of the five storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(usize),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Real(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Blob(len) => format!("[{} bytes]", len),
        }
    }

    pub fn display_width(&self) -> usize {
        unicode_width::UnicodeWidthStr::width(self.display().as_str())
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Integer(i) => serde_json::Value::from(*i),
            CellValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
            CellValue::Blob(len) => serde_json::Value::String(format!("[{} bytes]", len)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    /// Widest rendered cell in this column, for aligned table output.
    pub max_width: usize,
}

/// Tabular outcome of one accepted statement. Read-only once produced.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    /// Set when the executor's row cap cut the result short.
    pub truncated: bool,
    pub execution_time: Duration,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name, bounded to `max_rows`.
    /// Used both for prompt context and for the degraded-mode answer.
    pub fn rows_as_json(&self, max_rows: usize) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (i, cell) in row.iter().enumerate() {
                    let name = self
                        .columns
                        .get(i)
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|| format!("column_{}", i));
                    obj.insert(name, cell.to_json());
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_display() {
        assert_eq!(CellValue::Null.display(), "NULL");
    }

    #[test]
    fn test_integer_display() {
        assert_eq!(CellValue::Integer(42).display(), "42");
        assert_eq!(CellValue::Integer(-100).display(), "-100");
    }

    #[test]
    fn test_real_display() {
        assert_eq!(CellValue::Real(48230.5).display(), "48230.5");
    }

    #[test]
    fn test_text_display() {
        assert_eq!(CellValue::Text("hello".into()).display(), "hello");
    }

    #[test]
    fn test_blob_display() {
        assert_eq!(CellValue::Blob(3).display(), "[3 bytes]");
    }

    #[test]
    fn test_display_width() {
        assert_eq!(CellValue::Null.display_width(), 4); // "NULL"
        assert_eq!(CellValue::Text("hello".into()).display_width(), 5);
        assert_eq!(CellValue::Integer(100).display_width(), 3);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(CellValue::Integer(7).to_json(), serde_json::json!(7));
        assert_eq!(CellValue::Null.to_json(), serde_json::Value::Null);
        assert_eq!(
            CellValue::Text("a".into()).to_json(),
            serde_json::json!("a")
        );
    }

    #[test]
    fn test_rows_as_json_keys_by_column() {
        let result = QueryResult {
            columns: vec![
                ColumnInfo {
                    name: "region".into(),
                    max_width: 6,
                },
                ColumnInfo {
                    name: "total".into(),
                    max_width: 5,
                },
            ],
            rows: vec![
                vec![CellValue::Text("north".into()), CellValue::Real(12.5)],
                vec![CellValue::Text("south".into()), CellValue::Real(7.0)],
            ],
            row_count: 2,
            truncated: false,
            execution_time: Duration::ZERO,
        };
        let json = result.rows_as_json(10);
        assert_eq!(json[0]["region"], "north");
        assert_eq!(json[1]["total"], 7.0);
    }

    #[test]
    fn test_rows_as_json_bounded() {
        let result = QueryResult {
            columns: vec![ColumnInfo {
                name: "n".into(),
                max_width: 1,
            }],
            rows: (0..20).map(|i| vec![CellValue::Integer(i)]).collect(),
            row_count: 20,
            truncated: false,
            execution_time: Duration::ZERO,
        };
        let json = result.rows_as_json(5);
        assert_eq!(json.as_array().unwrap().len(), 5);
    }
}
