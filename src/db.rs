use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, TallyError};

pub const DB_FILE: &str = "tally.db";

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    is_active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS subcategories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    is_active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS tagging_rules (
    id INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL,
    match_type TEXT NOT NULL DEFAULT 'contains',
    category_id INTEGER NOT NULL,
    subcategory_id INTEGER,
    priority INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id),
    FOREIGN KEY (subcategory_id) REFERENCES subcategories(id)
);

CREATE TABLE IF NOT EXISTS import_batches (
    id INTEGER PRIMARY KEY,
    file_hash TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    parser_used TEXT NOT NULL,
    bank TEXT NOT NULL,
    parsed_at TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    confidence_threshold REAL NOT NULL DEFAULT 1.0,
    total_count INTEGER NOT NULL DEFAULT 0,
    pending_count INTEGER NOT NULL DEFAULT 0,
    needs_review_count INTEGER NOT NULL DEFAULT 0,
    low_confidence_count INTEGER NOT NULL DEFAULT 0,
    period_start TEXT,
    period_end TEXT
);

CREATE TABLE IF NOT EXISTS staged_transactions (
    batch_id INTEGER NOT NULL,
    temp_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    value REAL NOT NULL,
    direction TEXT NOT NULL,
    category_id INTEGER,
    subcategory_id INTEGER,
    confidence REAL NOT NULL DEFAULT 0,
    needs_review INTEGER NOT NULL DEFAULT 1,
    import_status TEXT NOT NULL DEFAULT 'pending',
    PRIMARY KEY (batch_id, temp_id),
    FOREIGN KEY (batch_id) REFERENCES import_batches(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    bank TEXT NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    value REAL NOT NULL,
    direction TEXT NOT NULL,
    category_id INTEGER,
    subcategory_id INTEGER,
    fingerprint TEXT NOT NULL,
    batch_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id),
    FOREIGN KEY (subcategory_id) REFERENCES subcategories(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_fingerprint ON transactions(fingerprint);

CREATE TABLE IF NOT EXISTS import_history (
    id INTEGER PRIMARY KEY,
    file_hash TEXT NOT NULL,
    filename TEXT NOT NULL,
    bank TEXT,
    imported_at TEXT NOT NULL,
    status TEXT NOT NULL,
    total_count INTEGER NOT NULL DEFAULT 0,
    imported_count INTEGER NOT NULL DEFAULT 0,
    duplicate_count INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_import_history_hash ON import_history(file_hash);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Look up a category by name, creating it when missing. Names are stored lower-case.
pub fn find_or_create_category(conn: &Connection, name: &str) -> Result<i64> {
    find_or_create_named(conn, "categories", name)
}

pub fn find_or_create_subcategory(conn: &Connection, name: &str) -> Result<i64> {
    find_or_create_named(conn, "subcategories", name)
}

fn find_or_create_named(conn: &Connection, table: &str, name: &str) -> Result<i64> {
    let name = name.trim().to_lowercase();
    let existing: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM {table} WHERE name = ?1"),
            [&name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(&format!("INSERT INTO {table} (name) VALUES (?1)"), [&name])?;
    Ok(conn.last_insert_rowid())
}

/// Existing category only; edits never grow the taxonomy.
pub fn category_id_by_name(conn: &Connection, name: &str) -> Result<i64> {
    id_by_name(conn, "categories", name)
}

pub fn subcategory_id_by_name(conn: &Connection, name: &str) -> Result<i64> {
    id_by_name(conn, "subcategories", name)
}

fn id_by_name(conn: &Connection, table: &str, name: &str) -> Result<i64> {
    let name = name.trim().to_lowercase();
    conn.query_row(
        &format!("SELECT id FROM {table} WHERE name = ?1"),
        [&name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(TallyError::UnknownCategory(name))
}

pub fn category_name(conn: &Connection, id: Option<i64>) -> Result<Option<String>> {
    lookup_name(conn, "categories", id)
}

pub fn subcategory_name(conn: &Connection, id: Option<i64>) -> Result<Option<String>> {
    lookup_name(conn, "subcategories", id)
}

fn lookup_name(conn: &Connection, table: &str, id: Option<i64>) -> Result<Option<String>> {
    let Some(id) = id else {
        return Ok(None);
    };
    let name = conn
        .query_row(
            &format!("SELECT name FROM {table} WHERE id = ?1"),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db")).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "categories",
            "subcategories",
            "tagging_rules",
            "import_batches",
            "staged_transactions",
            "transactions",
            "import_history",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_find_or_create_category_reuses_lowercased_name() {
        let (_dir, conn) = test_db();
        let a = find_or_create_category(&conn, "Food").unwrap();
        let b = find_or_create_category(&conn, "  food ").unwrap();
        assert_eq!(a, b);
        assert_eq!(category_name(&conn, Some(a)).unwrap().as_deref(), Some("food"));
    }

    #[test]
    fn test_category_id_by_name_does_not_create() {
        let (_dir, conn) = test_db();
        assert!(matches!(
            category_id_by_name(&conn, "Travel"),
            Err(TallyError::UnknownCategory(name)) if name == "travel"
        ));
        let id = find_or_create_category(&conn, "travel").unwrap();
        assert_eq!(category_id_by_name(&conn, " TRAVEL").unwrap(), id);
    }

    #[test]
    fn test_batch_file_hash_is_unique() {
        let (_dir, conn) = test_db();
        let insert = "INSERT INTO import_batches (file_hash, filename, parser_used, bank, parsed_at) \
                      VALUES ('abc', 'a.csv', 'generic_csv', 'generic', '2025-01-01 00:00:00')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
