use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::batch::{list_queue, load_batch, override_category};
use crate::cli::{open, print_json};
use crate::db::{category_id_by_name, category_name, subcategory_id_by_name, subcategory_name};
use crate::error::Result;
use crate::fmt::{amount, percent};
use crate::models::ImportStatus;

pub fn list(json: bool) -> Result<()> {
    let ctx = open()?;
    let batches = list_queue(&ctx.conn)?;
    if json {
        return print_json(&batches);
    }
    if batches.is_empty() {
        println!("{}", "No batches waiting for review.".green());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "File", "Parser", "Period", "Rows", "Pending", "Review", "Low conf."]);
    for b in batches {
        let period = match (&b.stats.period_start, &b.stats.period_end) {
            (Some(start), Some(end)) => format!("{start} .. {end}"),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(b.id),
            Cell::new(b.filename),
            Cell::new(b.parser_used),
            Cell::new(period),
            Cell::new(b.stats.total_count),
            Cell::new(b.stats.pending_count),
            Cell::new(b.stats.needs_review_count),
            Cell::new(b.stats.low_confidence_count),
        ]);
    }
    println!("Import queue\n{table}");
    Ok(())
}

pub fn show(id: i64, json: bool) -> Result<()> {
    let ctx = open()?;
    let batch = load_batch(&ctx.conn, id)?;
    if json {
        return print_json(&batch);
    }

    println!(
        "Batch {} | {} | {} | {} | {}",
        batch.id,
        batch.filename,
        batch.parser_used,
        batch.state.as_str(),
        batch.parsed_at
    );
    let mut table = Table::new();
    table.set_header(vec!["Temp ID", "Date", "Description", "Amount", "Category", "Conf.", "Status"]);
    for t in &batch.transactions {
        let category = match category_name(&ctx.conn, t.category_id)? {
            Some(cat) => match subcategory_name(&ctx.conn, t.subcategory_id)? {
                Some(sub) => format!("{cat} / {sub}"),
                None => cat,
            },
            None => "(needs review)".yellow().to_string(),
        };
        let status = match t.import_status {
            ImportStatus::Pending => "pending".to_string(),
            ImportStatus::Imported => "imported".green().to_string(),
            ImportStatus::Duplicate => "duplicate".dimmed().to_string(),
        };
        table.add_row(vec![
            Cell::new(&t.temp_id),
            Cell::new(&t.date),
            Cell::new(&t.description),
            Cell::new(amount(t.value)),
            Cell::new(category),
            Cell::new(percent(t.confidence)),
            Cell::new(status),
        ]);
    }
    println!("{table}");
    println!(
        "{} rows, {} pending, {} need review, {} low confidence",
        batch.stats.total_count,
        batch.stats.pending_count,
        batch.stats.needs_review_count,
        batch.stats.low_confidence_count
    );
    Ok(())
}

pub fn edit(batch_id: i64, temp_id: &str, category: &str, subcategory: Option<&str>, json: bool) -> Result<()> {
    let ctx = open()?;
    let category_id = category_id_by_name(&ctx.conn, category)?;
    let subcategory_id = subcategory
        .map(|name| subcategory_id_by_name(&ctx.conn, name))
        .transpose()?;
    let row = override_category(&ctx.conn, batch_id, temp_id, category_id, subcategory_id)?;
    if json {
        return print_json(&row);
    }
    println!("{} {} \u{2192} {}", "Updated".green(), row.temp_id, category.trim().to_lowercase());
    Ok(())
}
