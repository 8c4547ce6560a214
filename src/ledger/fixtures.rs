use crate::ledger::{create_tables, LedgerSession};
use chrono::NaiveDate;
use rusqlite::Connection;

const SEED: &str = include_str!("../../tests/fixtures/ledger.sql");

pub fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

/// In-memory ledger seeded with five parties, pinned to 2024-06-30.
pub fn seeded_session() -> LedgerSession {
    let conn = Connection::open_in_memory().unwrap();
    create_tables(&conn).unwrap();
    conn.execute_batch(SEED).unwrap();
    LedgerSession::from_connection(conn)
        .unwrap()
        .with_reference_date(reference_date())
}
