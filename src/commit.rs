use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::batch::{load_batch, load_row, mark_committed, refresh_stats, transition_row};
use crate::db::now_timestamp;
use crate::duplicate::{self, staged_fingerprint};
use crate::error::{Result, TallyError};
use crate::ledger::Ledger;
use crate::models::{
    BatchState, HistoryStatus, ImportHistoryRecord, ImportStatus, LedgerTransaction, StagedTransaction,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitFailure {
    pub temp_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub imported: usize,
    pub duplicates: usize,
    pub total: usize,
    /// Rows another commit had already moved out of `pending`.
    pub skipped: usize,
    pub failures: Vec<CommitFailure>,
    /// True when this call completed the batch and wrote its history record.
    pub batch_committed: bool,
    /// Set when every row is done but the batch could not be completed. The
    /// next commit of the same batch retries completion.
    pub completion_error: Option<String>,
}

enum RowOutcome {
    Imported,
    Duplicate,
    Conflict,
}

fn immediate(conn: &Connection) -> Result<Transaction<'_>> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

fn validate(row: &StagedTransaction) -> Result<()> {
    let reason = if row.date.trim().is_empty() {
        "missing date"
    } else if row.description.trim().is_empty() {
        "missing description"
    } else if !row.value.is_finite() {
        "value is not a finite number"
    } else {
        return Ok(());
    };
    Err(TallyError::Validation {
        temp_id: row.temp_id.clone(),
        reason: reason.to_string(),
    })
}

/// Claim one row and write it, all inside a single immediate transaction.
/// Any error drops the transaction, which leaves the row `pending`.
fn commit_row(
    conn: &Connection,
    ledger: &dyn Ledger,
    batch_id: i64,
    bank: &str,
    temp_id: &str,
) -> Result<RowOutcome> {
    let tx = immediate(conn)?;
    let row = load_row(&tx, batch_id, temp_id)?;
    if row.import_status != ImportStatus::Pending {
        return Ok(RowOutcome::Conflict);
    }
    validate(&row)?;

    let is_duplicate = duplicate::check(bank, &row, &*tx)?;
    let to = if is_duplicate {
        ImportStatus::Duplicate
    } else {
        ImportStatus::Imported
    };
    if !transition_row(&tx, batch_id, temp_id, to)? {
        return Ok(RowOutcome::Conflict);
    }
    if !is_duplicate {
        ledger.append(
            &tx,
            &LedgerTransaction {
                id: None,
                bank: bank.to_string(),
                date: row.date.clone(),
                description: row.description.clone(),
                value: row.value,
                direction: row.direction,
                category_id: row.category_id,
                subcategory_id: row.subcategory_id,
                fingerprint: staged_fingerprint(bank, &row),
                batch_id: Some(batch_id),
            },
        )?;
    }
    refresh_stats(&tx, batch_id)?;
    tx.commit()?;
    Ok(if is_duplicate {
        RowOutcome::Duplicate
    } else {
        RowOutcome::Imported
    })
}

/// Flip the batch to `committed` and write its single history record. Only
/// the caller that wins the state swap writes history.
fn complete_batch(conn: &Connection, ledger: &dyn Ledger, batch_id: i64) -> Result<bool> {
    let tx = immediate(conn)?;
    if !mark_committed(&tx, batch_id)? {
        return Ok(false);
    }
    let (file_hash, filename, bank, total, imported, duplicates): (String, String, String, i64, i64, i64) =
        tx.query_row(
            "SELECT b.file_hash, b.filename, b.bank, count(s.temp_id), \
                    coalesce(sum(s.import_status = 'imported'), 0), \
                    coalesce(sum(s.import_status = 'duplicate'), 0) \
             FROM import_batches b LEFT JOIN staged_transactions s ON s.batch_id = b.id \
             WHERE b.id = ?1",
            [batch_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )?;
    ledger.record_history(
        &tx,
        &ImportHistoryRecord {
            id: None,
            file_hash,
            filename,
            bank: Some(bank),
            imported_at: now_timestamp(),
            status: HistoryStatus::Imported,
            total_count: total,
            imported_count: imported,
            duplicate_count: duplicates,
            error: None,
        },
    )?;
    tx.commit()?;
    Ok(true)
}

/// Commit the selected rows of a batch (all pending rows when `selected` is
/// `None`). Rows are independent: one failure is recorded and the rest carry
/// on. Committing an already committed batch returns zero counts.
pub fn commit_batch(
    conn: &Connection,
    ledger: &dyn Ledger,
    batch_id: i64,
    selected: Option<&[String]>,
) -> Result<CommitResult> {
    let batch = load_batch(conn, batch_id)?;
    let mut result = CommitResult::default();
    if batch.state == BatchState::Committed {
        return Ok(result);
    }

    let targets: Vec<String> = match selected {
        Some(ids) => {
            let mut seen = std::collections::HashSet::new();
            ids.iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty() && seen.insert(id.clone()))
                .collect()
        }
        None => batch
            .transactions
            .iter()
            .filter(|t| t.import_status == ImportStatus::Pending)
            .map(|t| t.temp_id.clone())
            .collect(),
    };
    result.total = targets.len();

    for temp_id in &targets {
        match commit_row(conn, ledger, batch_id, &batch.bank, temp_id) {
            Ok(RowOutcome::Imported) => {
                result.imported += 1;
                tracing::debug!(batch_id, temp_id = %temp_id, "row imported");
            }
            Ok(RowOutcome::Duplicate) => {
                result.duplicates += 1;
                tracing::debug!(batch_id, temp_id = %temp_id, "row already in ledger");
            }
            Ok(RowOutcome::Conflict) => result.skipped += 1,
            Err(e) => {
                tracing::warn!(batch_id, temp_id = %temp_id, error = %e, "row commit failed");
                result.failures.push(CommitFailure {
                    temp_id: temp_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    match complete_batch(conn, ledger, batch_id) {
        Ok(committed) => result.batch_committed = committed,
        Err(e) => {
            tracing::warn!(batch_id, error = %e, "batch completion failed");
            result.completion_error = Some(e.to_string());
        }
    }
    tracing::info!(
        batch_id,
        imported = result.imported,
        duplicates = result.duplicates,
        skipped = result.skipped,
        failures = result.failures.len(),
        batch_committed = result.batch_committed,
        completion_failed = result.completion_error.is_some(),
        "commit finished"
    );
    Ok(result)
}
