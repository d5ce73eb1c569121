use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open, print_json};
use crate::error::Result;
use crate::importer::import_types;
use crate::rules::load_active_rules;
use crate::scan::{reset as reset_inbox, scan as scan_inbox, stage_file, FileStatus, ScanOptions};

pub fn types(json: bool) -> Result<()> {
    let types = import_types();
    if json {
        return print_json(&types);
    }
    let mut table = Table::new();
    table.set_header(vec!["Type", "Label"]);
    for t in types {
        table.add_row(vec![Cell::new(t.value), Cell::new(t.label)]);
    }
    println!("{table}");
    Ok(())
}

pub fn file(file: &str, import_type: Option<&str>, json: bool) -> Result<()> {
    let ctx = open()?;
    let rules = load_active_rules(&ctx.conn)?;
    let staged = stage_file(
        &ctx.conn,
        &ctx.dirs,
        &PathBuf::from(file),
        import_type,
        &rules,
        ctx.settings.low_confidence_threshold,
    )?;
    if json {
        return print_json(&staged);
    }
    println!(
        "Queued batch {} ({} transactions, parser {})",
        staged.batch_id, staged.transaction_count, staged.parser_used
    );
    println!("Review with `tally batch {}`", staged.batch_id);
    Ok(())
}

pub fn scan(json: bool) -> Result<()> {
    let ctx = open()?;
    let rules = load_active_rules(&ctx.conn)?;
    let options = ScanOptions {
        workers: ctx.settings.workers(),
        confidence_threshold: ctx.settings.low_confidence_threshold,
    };
    let result = scan_inbox(&ctx.conn, &ctx.dirs, &rules, options)?;
    if json {
        return print_json(&result);
    }

    if result.summary.total == 0 {
        println!("Inbox is empty: {}", ctx.dirs.inbox.display());
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["File", "Status", "Batch", "Rows", "Parser"]);
    for p in &result.processed {
        let status = match p.status {
            FileStatus::Queued => "queued".green().to_string(),
            FileStatus::Skipped => "skipped".dimmed().to_string(),
        };
        table.add_row(vec![
            Cell::new(&p.filename),
            Cell::new(status),
            Cell::new(p.batch_id.map(|id| id.to_string()).unwrap_or_default()),
            Cell::new(p.transaction_count),
            Cell::new(p.parser.as_deref().unwrap_or("")),
        ]);
    }
    for e in &result.errors {
        table.add_row(vec![
            Cell::new(&e.filename),
            Cell::new("failed".red().to_string()),
            Cell::new(""),
            Cell::new(""),
            Cell::new(&e.error),
        ]);
    }
    println!("{table}");
    println!(
        "{} files: {} queued, {} failed, {} skipped",
        result.summary.total, result.summary.successful, result.summary.failed, result.summary.skipped
    );
    Ok(())
}

pub fn reset(timeout: Option<u64>, json: bool) -> Result<()> {
    let ctx = open()?;
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.settings.reset_timeout());
    let result = reset_inbox(&ctx.conn, &ctx.dirs, timeout)?;
    if json {
        return print_json(&result);
    }

    println!(
        "{} files moved to inbox, {} batches and {} failed imports deleted",
        result.moved_to_inbox, result.deleted_batches, result.deleted_imports
    );
    if let Some(err) = &result.db_error {
        println!("{} {err}", "Database not cleared:".red());
        println!("Files were moved; run `tally reset` again once the database is free.");
    }
    for e in &result.move_errors {
        println!("{} {}: {}", "Not moved:".yellow(), e.filename, e.error);
    }
    Ok(())
}
