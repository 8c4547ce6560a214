pub mod query;
pub mod schema;
pub mod session;

#[cfg(test)]
pub(crate) mod fixtures;

pub use query::{BuiltQuery, LedgerQuery, JOURNAL_FROM, SCOPE_PARAM};
pub use schema::{create_tables, SCHEMA_DESCRIPTION};
pub use session::{LedgerSession, Row, DEFAULT_MAX_ROWS};
