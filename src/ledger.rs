use rusqlite::Connection;

use crate::error::{Result, TallyError};
use crate::history::insert_history;
use crate::models::{ImportHistoryRecord, LedgerTransaction};

/// Durable writes made by the commit coordinator. Writes go through the
/// caller's connection so they share its transaction.
pub trait Ledger {
    fn append(&self, conn: &Connection, txn: &LedgerTransaction) -> Result<i64>;

    fn record_history(&self, conn: &Connection, record: &ImportHistoryRecord) -> Result<i64>;
}

/// The ledger kept in the `transactions` table.
pub struct SqliteLedger;

impl Ledger for SqliteLedger {
    fn append(&self, conn: &Connection, txn: &LedgerTransaction) -> Result<i64> {
        conn.execute(
            "INSERT INTO transactions (bank, date, description, value, direction, category_id, \
             subcategory_id, fingerprint, batch_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                txn.bank,
                txn.date,
                txn.description,
                txn.value,
                txn.direction.as_str(),
                txn.category_id,
                txn.subcategory_id,
                txn.fingerprint,
                txn.batch_id,
            ],
        )
        .map_err(|e| TallyError::Persistence(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    fn record_history(&self, conn: &Connection, record: &ImportHistoryRecord) -> Result<i64> {
        insert_history(conn, record).map_err(|e| TallyError::Persistence(e.to_string()))
    }
}

pub fn ledger_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))?)
}
