use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    ledger_file TEXT
);

CREATE TABLE IF NOT EXISTS column_maps (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    date_column TEXT NOT NULL,
    description_column TEXT NOT NULL,
    amount_column TEXT NOT NULL,
    date_format TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    in_ledger INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS matcher_rules (
    id INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL UNIQUE,
    case_insensitive INTEGER NOT NULL DEFAULT 0,
    account_path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY,
    source_path TEXT NOT NULL UNIQUE,
    external_id TEXT NOT NULL,
    mapping_id INTEGER,
    committed INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (mapping_id) REFERENCES column_maps(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS batch_raw (
    id INTEGER PRIMARY KEY,
    batch_id INTEGER NOT NULL,
    headers_json TEXT NOT NULL,
    rows_json TEXT NOT NULL,
    FOREIGN KEY (batch_id) REFERENCES batches(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    batch_id INTEGER NOT NULL,
    row_number INTEGER NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    amount TEXT NOT NULL,
    is_payment INTEGER NOT NULL DEFAULT 0,
    rule_id INTEGER,
    FOREIGN KEY (batch_id) REFERENCES batches(id) ON DELETE CASCADE,
    FOREIGN KEY (rule_id) REFERENCES matcher_rules(id) ON DELETE SET NULL
);
";

// (name, date_column, description_column, amount_column, date_format)
const BUILTIN_COLUMN_MAPS: &[(&str, &str, &str, &str, &str)] = &[
    ("boa", "Posted Date", "Payee", "Amount", "%m/%d/%Y"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    for (name, date_col, desc_col, amount_col, format) in BUILTIN_COLUMN_MAPS {
        conn.execute(
            "INSERT OR IGNORE INTO column_maps (name, date_column, description_column, amount_column, date_format) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![name, date_col, desc_col, amount_col, format],
        )?;
    }
    Ok(())
}
