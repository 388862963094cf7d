pub mod export;

use anyhow::Result;
use rusqlite::Connection;

/// A single logged ICAP transaction record.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    pub id: Option<i64>,
    pub timestamp: String,
    /// `"reqmod"` or `"respmod"`.
    pub mode: String,
    pub url: String,
    pub file_name: String,
    pub extension: String,
    pub vendor: String,
    /// `"pass"`, `"block"` or `"reject"`.
    pub action: String,
    pub reason: String,
}

/// Initialize the SQLite database and create the transactions table if it
/// doesn't exist.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            mode      TEXT NOT NULL,
            url       TEXT NOT NULL,
            file_name TEXT NOT NULL,
            extension TEXT NOT NULL,
            vendor    TEXT NOT NULL,
            action    TEXT NOT NULL,
            reason    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp);
        CREATE INDEX IF NOT EXISTS idx_transactions_action ON transactions(action);",
    )?;
    Ok(())
}

/// Log a transaction to the database.
pub fn log_transaction(conn: &Connection, log: &TransactionLog) -> Result<i64> {
    conn.execute(
        "INSERT INTO transactions (timestamp, mode, url, file_name, extension, vendor, action, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            log.timestamp,
            log.mode,
            log.url,
            log.file_name,
            log.extension,
            log.vendor,
            log.action,
            log.reason,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Query the most recent N log entries.
pub fn query_recent(conn: &Connection, limit: usize) -> Result<Vec<TransactionLog>> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, mode, url, file_name, extension, vendor, action, reason
         FROM transactions ORDER BY id DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        Ok(TransactionLog {
            id: Some(row.get(0)?),
            timestamp: row.get(1)?,
            mode: row.get(2)?,
            url: row.get(3)?,
            file_name: row.get(4)?,
            extension: row.get(5)?,
            vendor: row.get(6)?,
            action: row.get(7)?,
            reason: row.get(8)?,
        })
    })?;

    let mut logs = Vec::new();
    for row in rows {
        logs.push(row?);
    }
    Ok(logs)
}

/// Open (or create) the database at the given path and initialize the schema.
pub fn open_db(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_db(&conn)?;
    Ok(conn)
}

/// In-memory database for tests.
pub fn open_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_db(&conn)?;
    Ok(conn)
}
