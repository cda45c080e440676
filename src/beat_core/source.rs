//! Data source abstraction and the SQLite implementation
//!
//! Rows are handed to the translator as raw text, the same way a driver's
//! raw-bytes scan would present them. NULL becomes the empty string.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

#[derive(Debug)]
pub enum SourceError {
    Database(rusqlite::Error),
    Scan(String),
}

impl From<rusqlite::Error> for SourceError {
    fn from(err: rusqlite::Error) -> Self {
        SourceError::Database(err)
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Database(e) => write!(f, "Database error: {}", e),
            SourceError::Scan(msg) => write!(f, "Row scan error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// One result row: ordered (column name, raw text) pairs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub columns: Vec<(String, String)>,
}

impl Row {
    pub fn new(columns: Vec<(String, String)>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.as_str())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Rows of one executed query; a scan failure is yielded in place of a row
pub type RowStream = std::vec::IntoIter<Result<Row, SourceError>>;

/// Read-only relational source the beat polls
pub trait DataSource: Send {
    /// Execute query text and return its rows
    fn execute(&mut self, query: &str) -> Result<RowStream, SourceError>;

    /// Get source type for logging
    fn source_type(&self) -> &'static str;
}

/// SQLite data source opened read-only
pub struct SqliteDataSource {
    conn: Connection,
}

impl SqliteDataSource {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let conn = Connection::open_with_flags(
            db_path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Refuse writes even if the file permissions would allow them
        conn.execute_batch("PRAGMA query_only = ON")?;

        log::info!("📥 SQLite source opened read-only: {}", db_path.as_ref().display());

        Ok(Self { conn })
    }
}

impl DataSource for SqliteDataSource {
    fn execute(&mut self, query: &str) -> Result<RowStream, SourceError> {
        let mut stmt = self.conn.prepare(query)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();

        loop {
            match rows.next() {
                Ok(Some(row)) => {
                    let mut columns = Vec::with_capacity(names.len());
                    let mut scan_error = None;
                    for (i, name) in names.iter().enumerate() {
                        match row.get_ref(i) {
                            Ok(value) => columns.push((name.clone(), render_value(value))),
                            Err(e) => {
                                scan_error = Some(SourceError::Scan(format!("column {}: {}", name, e)));
                                break;
                            }
                        }
                    }
                    match scan_error {
                        Some(e) => {
                            out.push(Err(e));
                            break;
                        }
                        None => out.push(Ok(Row::new(columns))),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    out.push(Err(SourceError::Database(e)));
                    break;
                }
            }
        }

        Ok(out.into_iter())
    }

    fn source_type(&self) -> &'static str {
        "SQLite"
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
