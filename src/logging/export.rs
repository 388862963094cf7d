use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

use super::TransactionLog;

#[derive(Debug, Serialize)]
struct LogEntry {
    id: i64,
    timestamp: String,
    mode: String,
    url: String,
    file_name: String,
    extension: String,
    vendor: String,
    action: String,
    reason: String,
}

impl From<&TransactionLog> for LogEntry {
    fn from(log: &TransactionLog) -> Self {
        LogEntry {
            id: log.id.unwrap_or(0),
            timestamp: log.timestamp.clone(),
            mode: log.mode.clone(),
            url: log.url.clone(),
            file_name: log.file_name.clone(),
            extension: log.extension.clone(),
            vendor: log.vendor.clone(),
            action: log.action.clone(),
            reason: log.reason.clone(),
        }
    }
}

/// Export all logs as JSON string.
pub fn export_json(conn: &Connection) -> Result<String> {
    let logs = super::query_recent(conn, usize::MAX)?;
    let entries: Vec<LogEntry> = logs.iter().map(LogEntry::from).collect();
    let json = serde_json::to_string_pretty(&entries)?;
    Ok(json)
}

/// Export all logs as CSV string.
pub fn export_csv(conn: &Connection) -> Result<String> {
    let logs = super::query_recent(conn, usize::MAX)?;
    let mut output =
        String::from("id,timestamp,mode,url,file_name,extension,vendor,action,reason\n");
    for log in &logs {
        output.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            log.id.unwrap_or(0),
            log.timestamp,
            log.mode,
            log.url,
            log.file_name,
            log.extension,
            log.vendor,
            log.action,
            log.reason,
        ));
    }
    Ok(output)
}
