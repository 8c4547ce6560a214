use crate::error::Result;
use crate::ledger::query::BuiltQuery;
use chrono::{Local, NaiveDate};
use log::debug;
use rusqlite::types::{ToSql, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Number, Value};
use std::path::Path;

/// One result record. Column order follows the SELECT list.
pub type Row = Map<String, Value>;

pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Request-scoped, read-only handle on the ledger database.
pub struct LedgerSession {
    conn: Connection,
    reference_date: NaiveDate,
    max_rows: usize,
}

impl LedgerSession {
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Wraps an existing connection and switches it to `query_only`.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(Self {
            conn,
            reference_date: Local::now().date_naive(),
            max_rows: DEFAULT_MAX_ROWS,
        })
    }

    /// Pins the "today" every relative time window is computed from.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = date;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn fetch(&self, query: &BuiltQuery) -> Result<Vec<Row>> {
        debug!("Executing ledger query: {}", query.sql);

        let mut stmt = self.conn.prepare(&query.sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let bound: Vec<(&str, &dyn ToSql)> = query
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();

        let mut rows = stmt.query(bound.as_slice())?;
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            if out.len() >= self.max_rows {
                debug!("Result capped at {} rows", self.max_rows);
                break;
            }
            let mut record = Map::new();
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            out.push(record);
        }

        Ok(out)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value as SqlValue;

    fn session() -> LedgerSession {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (label TEXT, amount REAL, n INTEGER);
             INSERT INTO t VALUES ('b', 2.5, 1), ('a', NULL, 2), ('c', 1.0, 3);",
        )
        .unwrap();
        LedgerSession::from_connection(conn).unwrap()
    }

    #[test]
    fn test_fetch_preserves_column_order() {
        let session = session();
        let rows = session
            .fetch(&BuiltQuery::new("SELECT n, label, amount FROM t ORDER BY n"))
            .unwrap();

        assert_eq!(rows.len(), 3);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["n", "label", "amount"]);
        assert_eq!(rows[1]["amount"], Value::Null);
        assert_eq!(rows[0]["amount"], serde_json::json!(2.5));
    }

    #[test]
    fn test_fetch_binds_named_params() {
        let session = session();
        let query = BuiltQuery {
            sql: "SELECT label FROM t WHERE n >= :min".to_string(),
            params: vec![(":min".to_string(), SqlValue::Integer(2))],
        };
        let rows = session.fetch(&query).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_session_is_read_only() {
        let session = session();
        let err = session.fetch(&BuiltQuery::new("DELETE FROM t"));
        assert!(err.is_err());
    }

    #[test]
    fn test_max_rows_caps_results() {
        let session = session().with_max_rows(2);
        let rows = session.fetch(&BuiltQuery::new("SELECT * FROM t")).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
