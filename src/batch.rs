use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;

use crate::db::now_timestamp;
use crate::error::{Result, TallyError};
use crate::importer::ImporterKind;
use crate::models::{
    BatchState, BatchStats, Direction, ImportBatch, ImportStatus, ParsedRow, StagedTransaction,
    TaggingRule,
};
use crate::tagging::classify;

/// Classify every candidate against one rule snapshot.
pub fn stage(candidates: &[ParsedRow], rules: &[TaggingRule]) -> Vec<StagedTransaction> {
    candidates
        .iter()
        .map(|row| {
            let result = classify(&row.description, rules);
            StagedTransaction {
                temp_id: row.temp_id.clone(),
                date: row.date.clone(),
                description: row.description.clone(),
                value: row.value,
                direction: row.direction,
                category_id: result.category_id,
                subcategory_id: result.subcategory_id,
                confidence: result.confidence,
                needs_review: result.needs_review,
                import_status: ImportStatus::Pending,
            }
        })
        .collect()
}

impl BatchStats {
    /// `needs_review_count` covers pending rows only; low confidence means a
    /// matched row scored below `threshold`.
    pub fn from_rows(rows: &[StagedTransaction], threshold: f64) -> Self {
        let pending = |t: &&StagedTransaction| t.import_status == ImportStatus::Pending;
        Self {
            total_count: rows.len() as i64,
            pending_count: rows.iter().filter(pending).count() as i64,
            needs_review_count: rows.iter().filter(pending).filter(|t| t.needs_review).count() as i64,
            low_confidence_count: rows
                .iter()
                .filter(|t| t.category_id.is_some() && t.confidence < threshold)
                .count() as i64,
            period_start: rows.iter().map(|t| t.date.clone()).min(),
            period_end: rows.iter().map(|t| t.date.clone()).max(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub id: i64,
    pub file_hash: String,
    pub filename: String,
    pub parser_used: String,
    pub bank: String,
    pub parsed_at: String,
    pub stats: BatchStats,
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Persist a staged batch in `queued` state. A second batch for the same file
/// fingerprint is refused with `DuplicateFile`.
pub fn insert_batch(
    conn: &Connection,
    file_hash: &str,
    filename: &str,
    importer: ImporterKind,
    rows: &[StagedTransaction],
    confidence_threshold: f64,
) -> Result<i64> {
    let stats = BatchStats::from_rows(rows, confidence_threshold);
    let tx = conn.unchecked_transaction()?;
    let inserted = tx.execute(
        "INSERT INTO import_batches (file_hash, filename, parser_used, bank, parsed_at, state, \
         confidence_threshold, total_count, pending_count, needs_review_count, low_confidence_count, \
         period_start, period_end) VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            file_hash,
            filename,
            importer.key(),
            importer.bank(),
            now_timestamp(),
            confidence_threshold,
            stats.total_count,
            stats.pending_count,
            stats.needs_review_count,
            stats.low_confidence_count,
            stats.period_start,
            stats.period_end,
        ],
    );
    match inserted {
        Err(e) if is_unique_violation(&e) => {
            return Err(TallyError::DuplicateFile(filename.to_string()))
        }
        other => {
            other?;
        }
    }
    let batch_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO staged_transactions (batch_id, temp_id, position, date, description, value, \
             direction, category_id, subcategory_id, confidence, needs_review, import_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for (position, row) in rows.iter().enumerate() {
            stmt.execute(rusqlite::params![
                batch_id,
                row.temp_id,
                position as i64,
                row.date,
                row.description,
                row.value,
                row.direction.as_str(),
                row.category_id,
                row.subcategory_id,
                row.confidence,
                row.needs_review,
                row.import_status.as_str(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(batch_id)
}

fn staged_from_row(row: &Row) -> rusqlite::Result<StagedTransaction> {
    let direction: String = row.get(4)?;
    let status: String = row.get(9)?;
    Ok(StagedTransaction {
        temp_id: row.get(0)?,
        date: row.get(1)?,
        description: row.get(2)?,
        value: row.get(3)?,
        direction: Direction::parse(&direction).unwrap_or(Direction::Outcome),
        category_id: row.get(5)?,
        subcategory_id: row.get(6)?,
        confidence: row.get(7)?,
        needs_review: row.get(8)?,
        import_status: ImportStatus::parse(&status).unwrap_or(ImportStatus::Pending),
    })
}

const STAGED_COLUMNS: &str = "temp_id, date, description, value, direction, category_id, \
                              subcategory_id, confidence, needs_review, import_status";

pub fn load_rows(conn: &Connection, batch_id: i64) -> Result<Vec<StagedTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STAGED_COLUMNS} FROM staged_transactions WHERE batch_id = ?1 ORDER BY position"
    ))?;
    let rows = stmt
        .query_map([batch_id], staged_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_row(conn: &Connection, batch_id: i64, temp_id: &str) -> Result<StagedTransaction> {
    conn.query_row(
        &format!("SELECT {STAGED_COLUMNS} FROM staged_transactions WHERE batch_id = ?1 AND temp_id = ?2"),
        rusqlite::params![batch_id, temp_id],
        staged_from_row,
    )
    .optional()?
    .ok_or_else(|| TallyError::UnknownRow {
        batch_id,
        temp_id: temp_id.to_string(),
    })
}

const SUMMARY_COLUMNS: &str = "id, file_hash, filename, parser_used, bank, parsed_at, total_count, \
                               pending_count, needs_review_count, low_confidence_count, period_start, \
                               period_end, state";

fn summary_from_row(row: &Row) -> rusqlite::Result<(BatchSummary, String)> {
    Ok((
        BatchSummary {
            id: row.get(0)?,
            file_hash: row.get(1)?,
            filename: row.get(2)?,
            parser_used: row.get(3)?,
            bank: row.get(4)?,
            parsed_at: row.get(5)?,
            stats: BatchStats {
                total_count: row.get(6)?,
                pending_count: row.get(7)?,
                needs_review_count: row.get(8)?,
                low_confidence_count: row.get(9)?,
                period_start: row.get(10)?,
                period_end: row.get(11)?,
            },
        },
        row.get(12)?,
    ))
}

pub fn load_batch(conn: &Connection, batch_id: i64) -> Result<ImportBatch> {
    let (summary, state) = conn
        .query_row(
            &format!("SELECT {SUMMARY_COLUMNS} FROM import_batches WHERE id = ?1"),
            [batch_id],
            summary_from_row,
        )
        .optional()?
        .ok_or(TallyError::UnknownBatch(batch_id))?;
    let transactions = load_rows(conn, batch_id)?;
    Ok(ImportBatch {
        id: summary.id,
        file_hash: summary.file_hash,
        filename: summary.filename,
        parser_used: summary.parser_used,
        bank: summary.bank,
        parsed_at: summary.parsed_at,
        state: BatchState::parse(&state).unwrap_or(BatchState::Queued),
        stats: summary.stats,
        transactions,
    })
}

/// Batches still awaiting review, oldest first.
pub fn list_queue(conn: &Connection) -> Result<Vec<BatchSummary>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM import_batches WHERE state = 'queued' ORDER BY parsed_at, id"
    ))?;
    let rows = stmt
        .query_map([], summary_from_row)?
        .map(|r| r.map(|(summary, _)| summary))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn batch_file_hashes(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT file_hash FROM import_batches")?;
    let hashes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hashes)
}

/// Recompute the stored rollup from the rows. Call inside the transaction
/// that mutated the rows.
pub fn refresh_stats(conn: &Connection, batch_id: i64) -> Result<BatchStats> {
    let stats = conn.query_row(
        "SELECT count(s.temp_id), \
                coalesce(sum(s.import_status = 'pending'), 0), \
                coalesce(sum(s.import_status = 'pending' AND s.needs_review = 1), 0), \
                coalesce(sum(s.category_id IS NOT NULL AND s.confidence < b.confidence_threshold), 0), \
                min(s.date), max(s.date) \
         FROM import_batches b LEFT JOIN staged_transactions s ON s.batch_id = b.id \
         WHERE b.id = ?1",
        [batch_id],
        |row| {
            Ok(BatchStats {
                total_count: row.get(0)?,
                pending_count: row.get(1)?,
                needs_review_count: row.get(2)?,
                low_confidence_count: row.get(3)?,
                period_start: row.get(4)?,
                period_end: row.get(5)?,
            })
        },
    )?;
    conn.execute(
        "UPDATE import_batches SET total_count = ?1, pending_count = ?2, needs_review_count = ?3, \
         low_confidence_count = ?4, period_start = ?5, period_end = ?6 WHERE id = ?7",
        rusqlite::params![
            stats.total_count,
            stats.pending_count,
            stats.needs_review_count,
            stats.low_confidence_count,
            stats.period_start,
            stats.period_end,
            batch_id
        ],
    )?;
    Ok(stats)
}

/// Compare-and-swap `pending -> to`. Returns false when another writer
/// already moved the row.
pub fn transition_row(conn: &Connection, batch_id: i64, temp_id: &str, to: ImportStatus) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE staged_transactions SET import_status = ?3 \
         WHERE batch_id = ?1 AND temp_id = ?2 AND import_status = 'pending'",
        rusqlite::params![batch_id, temp_id, to.as_str()],
    )?;
    Ok(changed == 1)
}

/// Compare-and-swap `queued -> committed`, only once no row is pending.
pub fn mark_committed(conn: &Connection, batch_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE import_batches SET state = 'committed' WHERE id = ?1 AND state = 'queued' \
         AND NOT EXISTS (SELECT 1 FROM staged_transactions \
                         WHERE batch_id = ?1 AND import_status = 'pending')",
        [batch_id],
    )?;
    Ok(changed == 1)
}

/// User edit before commit: pin the category and clear the review flag.
pub fn override_category(
    conn: &Connection,
    batch_id: i64,
    temp_id: &str,
    category_id: i64,
    subcategory_id: Option<i64>,
) -> Result<StagedTransaction> {
    let tx = conn.unchecked_transaction()?;
    let current = load_row(&tx, batch_id, temp_id)?;
    if current.import_status != ImportStatus::Pending {
        return Err(TallyError::ConcurrencyConflict(temp_id.to_string()));
    }
    tx.execute(
        "UPDATE staged_transactions SET category_id = ?3, subcategory_id = ?4, confidence = 1.0, \
         needs_review = 0 WHERE batch_id = ?1 AND temp_id = ?2 AND import_status = 'pending'",
        rusqlite::params![batch_id, temp_id, category_id, subcategory_id],
    )?;
    refresh_stats(&tx, batch_id)?;
    let updated = load_row(&tx, batch_id, temp_id)?;
    tx.commit()?;
    Ok(updated)
}

/// Drop every batch still in `queued` state (rows cascade). Returns the count.
pub fn delete_queued_batches(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM import_batches WHERE state = 'queued'", [])?;
    Ok(deleted)
}

#[cfg(test)]
pub(crate) fn sample_rows(descriptions: &[(&str, f64)]) -> Vec<ParsedRow> {
    descriptions
        .iter()
        .enumerate()
        .map(|(i, (description, value))| ParsedRow {
            temp_id: format!("tmp-{}", i + 1),
            date: format!("2025-01-{:02}", i + 1),
            description: description.to_string(),
            value: *value,
            direction: Direction::from_value(*value),
        })
        .collect()
}
