use colored::Colorize;

use crate::batch::load_batch;
use crate::cli::{open, print_json};
use crate::commit::commit_batch;
use crate::error::Result;
use crate::inbox::archive;
use crate::ledger::SqliteLedger;

pub fn run(batch_id: i64, ids: Option<Vec<String>>, json: bool) -> Result<()> {
    let ctx = open()?;
    let result = commit_batch(&ctx.conn, &SqliteLedger, batch_id, ids.as_deref())?;

    if result.batch_committed {
        let batch = load_batch(&ctx.conn, batch_id)?;
        if let Err(e) = archive(&ctx.dirs, &batch.filename) {
            tracing::warn!(file = %batch.filename, error = %e, "could not archive committed file");
        }
    }

    if json {
        return print_json(&result);
    }
    println!(
        "{} imported, {} duplicates, {} skipped of {} selected",
        result.imported, result.duplicates, result.skipped, result.total
    );
    for f in &result.failures {
        println!("{} {}: {}", "Failed".red(), f.temp_id, f.error);
    }
    if let Some(e) = &result.completion_error {
        println!("{} batch {batch_id} not completed: {e}", "Failed".red());
        println!("Run `tally commit {batch_id}` again to finish it.");
    } else if result.batch_committed {
        println!("{}", format!("Batch {batch_id} fully committed.").green());
    } else if !result.failures.is_empty() {
        println!("Fix the rows above and run `tally commit {batch_id}` again to retry them.");
    }
    Ok(())
}
