use serde::Serialize;

use crate::cli::print_json;
use crate::db::get_connection;
use crate::error::Result;
use crate::inbox::{list_files, InboxDirs};
use crate::ledger::ledger_count;
use crate::settings::{db_path, load_settings};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    data_dir: String,
    database: String,
    initialized: bool,
    inbox_files: usize,
    queued_batches: i64,
    pending_rows: i64,
    ledger_transactions: i64,
    rules: i64,
    active_rules: i64,
    failed_imports: i64,
}

pub fn run(json: bool) -> Result<()> {
    let settings = load_settings();
    let path = db_path(&settings);
    let dirs = InboxDirs::new(std::path::Path::new(&settings.data_dir));

    let mut status = Status {
        data_dir: settings.data_dir.clone(),
        database: path.display().to_string(),
        initialized: path.exists(),
        inbox_files: list_files(&dirs.inbox)?.len(),
        queued_batches: 0,
        pending_rows: 0,
        ledger_transactions: 0,
        rules: 0,
        active_rules: 0,
        failed_imports: 0,
    };

    if status.initialized {
        let conn = get_connection(&path)?;
        let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
        status.queued_batches = count("SELECT count(*) FROM import_batches WHERE state = 'queued'")?;
        status.pending_rows =
            count("SELECT coalesce(sum(pending_count), 0) FROM import_batches WHERE state = 'queued'")?;
        status.ledger_transactions = ledger_count(&conn)?;
        status.rules = count("SELECT count(*) FROM tagging_rules")?;
        status.active_rules = count("SELECT count(*) FROM tagging_rules WHERE is_active = 1")?;
        status.failed_imports = count("SELECT count(*) FROM import_history WHERE status = 'failed'")?;
    }

    if json {
        return print_json(&status);
    }

    println!("Data dir:   {}", status.data_dir);
    println!("Database:   {}", status.database);
    if !status.initialized {
        println!();
        println!("Database not found. Run `tally init` to set up.");
        return Ok(());
    }
    println!();
    println!("Inbox files:     {}", status.inbox_files);
    println!("Queued batches:  {}", status.queued_batches);
    println!("Pending rows:    {}", status.pending_rows);
    println!("Ledger:          {}", status.ledger_transactions);
    println!("Rules:           {} ({} active)", status.rules, status.active_rules);
    println!("Failed imports:  {}", status.failed_imports);
    Ok(())
}
