use crate::error::Result;
use rusqlite::Connection;

/// Prompt-facing description of the ledger. Field names here are the ones the
/// tool library and the legacy SQL path rely on.
pub const SCHEMA_DESCRIPTION: &str = r#"
Authoritative ledger schema (SQLite dialect)
- party: id PK, party_type ('INDIVIDUAL' | 'COMPANY'), display_name, created_at
- individual_profile: party_id PK/FK->party, given_name, family_name, primary_email
- company_profile: party_id PK/FK->party, legal_name, registration_number
- app_user: id PK, party_id FK->party, username UNIQUE, email UNIQUE, is_active
- user_party_map: user_id PK (legacy user id), party_id FK->party
- org_party_map: org_id PK (legacy organisation id), party_id FK->party
- account: id PK, party_id FK->party (owner), account_type_code, currency_code, name, opened_at, closed_at
- section: id PK, name ('income' | 'expense' | 'transfer')
- category: id PK, section_id FK->section, name
- journal_entry: id PK, entry_code UNIQUE, txn_date (YYYY-MM-DD), posted_at, description, channel_code, counterparty_party_id FK->party
- journal_line: id PK, entry_id FK->journal_entry, account_id FK->account, party_id FK->party, amount (signed), currency_code, category_id FK->category, line_memo
- employment_contract: id PK, employee_party_id FK->party, employer_party_id FK->party, position_title, start_date, end_date (NULL = current), is_primary
- holding_position: id PK, account_id FK->account, instrument_ticker, quantity, cost_basis, market_value, as_of_date

Join paths
- Ownership: journal_line jl JOIN account a ON jl.account_id = a.id; a.party_id is the owning party
- Classification: jl.category_id -> category c -> section s; s.name separates income from expense
- Dates: filter on je.txn_date; group months with strftime('%Y-%m', je.txn_date)
- Totals: always SUM(ABS(jl.amount)) within one section, never raw signed sums
"#;

const LEDGER_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS party (
    id INTEGER PRIMARY KEY,
    party_type TEXT NOT NULL CHECK (party_type IN ('INDIVIDUAL', 'COMPANY')),
    display_name TEXT NOT NULL,
    created_at TEXT
);
CREATE TABLE IF NOT EXISTS individual_profile (
    party_id INTEGER PRIMARY KEY REFERENCES party(id),
    given_name TEXT NOT NULL,
    family_name TEXT NOT NULL,
    primary_email TEXT UNIQUE
);
CREATE TABLE IF NOT EXISTS company_profile (
    party_id INTEGER PRIMARY KEY REFERENCES party(id),
    legal_name TEXT NOT NULL,
    registration_number TEXT UNIQUE
);
CREATE TABLE IF NOT EXISTS app_user (
    id INTEGER PRIMARY KEY,
    party_id INTEGER REFERENCES party(id),
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS user_party_map (
    user_id INTEGER PRIMARY KEY,
    party_id INTEGER NOT NULL REFERENCES party(id)
);
CREATE TABLE IF NOT EXISTS org_party_map (
    org_id INTEGER PRIMARY KEY,
    party_id INTEGER NOT NULL REFERENCES party(id)
);
CREATE TABLE IF NOT EXISTS account (
    id INTEGER PRIMARY KEY,
    party_id INTEGER NOT NULL REFERENCES party(id),
    account_type_code TEXT NOT NULL,
    currency_code TEXT NOT NULL DEFAULT 'EUR',
    name TEXT,
    opened_at TEXT,
    closed_at TEXT
);
CREATE TABLE IF NOT EXISTS section (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS category (
    id INTEGER PRIMARY KEY,
    section_id INTEGER NOT NULL REFERENCES section(id),
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS journal_entry (
    id INTEGER PRIMARY KEY,
    entry_code TEXT NOT NULL UNIQUE,
    txn_date TEXT NOT NULL,
    posted_at TEXT,
    description TEXT,
    channel_code TEXT,
    counterparty_party_id INTEGER REFERENCES party(id)
);
CREATE TABLE IF NOT EXISTS journal_line (
    id INTEGER PRIMARY KEY,
    entry_id INTEGER NOT NULL REFERENCES journal_entry(id),
    account_id INTEGER NOT NULL REFERENCES account(id),
    party_id INTEGER REFERENCES party(id),
    amount REAL NOT NULL,
    currency_code TEXT NOT NULL DEFAULT 'EUR',
    category_id INTEGER REFERENCES category(id),
    line_memo TEXT
);
CREATE TABLE IF NOT EXISTS employment_contract (
    id INTEGER PRIMARY KEY,
    employee_party_id INTEGER NOT NULL REFERENCES party(id),
    employer_party_id INTEGER NOT NULL REFERENCES party(id),
    position_title TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT,
    is_primary INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS holding_position (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL REFERENCES account(id),
    instrument_ticker TEXT NOT NULL,
    quantity REAL NOT NULL DEFAULT 0,
    cost_basis REAL NOT NULL DEFAULT 0,
    market_value REAL NOT NULL DEFAULT 0,
    as_of_date TEXT
);
"#;

/// Creates the ledger tables on a writable connection. Hosts normally own
/// migrations; this exists for fixtures and local tooling.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(LEDGER_DDL)?;
    Ok(())
}
