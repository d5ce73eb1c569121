use rusqlite::{Connection, Row};

use crate::error::Result;
use crate::models::{HistoryStatus, ImportHistoryRecord};

pub fn insert_history(conn: &Connection, record: &ImportHistoryRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_history (file_hash, filename, bank, imported_at, status, total_count, \
         imported_count, duplicate_count, error) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            record.file_hash,
            record.filename,
            record.bank,
            record.imported_at,
            record.status.as_str(),
            record.total_count,
            record.imported_count,
            record.duplicate_count,
            record.error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn history_from_row(row: &Row) -> rusqlite::Result<ImportHistoryRecord> {
    let status: String = row.get(5)?;
    Ok(ImportHistoryRecord {
        id: row.get(0)?,
        file_hash: row.get(1)?,
        filename: row.get(2)?,
        bank: row.get(3)?,
        imported_at: row.get(4)?,
        status: HistoryStatus::parse(&status).unwrap_or(HistoryStatus::Failed),
        total_count: row.get(6)?,
        imported_count: row.get(7)?,
        duplicate_count: row.get(8)?,
        error: row.get(9)?,
    })
}

/// Most recent first.
pub fn list_history(conn: &Connection, limit: usize) -> Result<Vec<ImportHistoryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_hash, filename, bank, imported_at, status, total_count, imported_count, \
         duplicate_count, error FROM import_history ORDER BY imported_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], history_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn history_file_hashes(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT file_hash FROM import_history")?;
    let hashes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hashes)
}

pub fn delete_failed_history(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM import_history WHERE status = 'failed'", [])?;
    Ok(deleted)
}
