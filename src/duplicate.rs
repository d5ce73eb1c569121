use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::Result;
use crate::fingerprint::ledger_fingerprint;
use crate::models::StagedTransaction;

/// Anything that can answer "is this fingerprint already in the ledger".
pub trait LedgerIndex {
    fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool>;
}

impl LedgerIndex for Connection {
    fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        let mut stmt = self.prepare_cached("SELECT 1 FROM transactions WHERE fingerprint = ?1")?;
        Ok(stmt.exists([fingerprint])?)
    }
}

impl LedgerIndex for HashSet<String> {
    fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.contains(fingerprint))
    }
}

pub fn staged_fingerprint(bank: &str, staged: &StagedTransaction) -> String {
    ledger_fingerprint(bank, &staged.date, staged.value, &staged.description)
}

/// Commit-time check; the ledger may have changed since the batch was staged.
pub fn check(bank: &str, staged: &StagedTransaction, index: &dyn LedgerIndex) -> Result<bool> {
    index.contains_fingerprint(&staged_fingerprint(bank, staged))
}
