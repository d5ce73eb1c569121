use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open, print_json};
use crate::error::Result;
use crate::history::list_history;
use crate::models::HistoryStatus;

pub fn run(limit: usize, json: bool) -> Result<()> {
    let ctx = open()?;
    let records = list_history(&ctx.conn, limit)?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No imports yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["When", "File", "Bank", "Status", "Total", "Imported", "Duplicates", "Error"]);
    for r in records {
        let status = match r.status {
            HistoryStatus::Imported => "imported".green().to_string(),
            HistoryStatus::Failed => "failed".red().to_string(),
        };
        table.add_row(vec![
            Cell::new(r.imported_at),
            Cell::new(r.filename),
            Cell::new(r.bank.unwrap_or_default()),
            Cell::new(status),
            Cell::new(r.total_count),
            Cell::new(r.imported_count),
            Cell::new(r.duplicate_count),
            Cell::new(r.error.unwrap_or_default()),
        ]);
    }
    println!("Import history\n{table}");
    Ok(())
}
