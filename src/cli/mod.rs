pub mod commit;
pub mod history;
pub mod import;
pub mod init;
pub mod queue;
pub mod rules;
pub mod status;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::get_connection;
use crate::error::{Result, TallyError};
use crate::inbox::InboxDirs;
use crate::settings::{db_path, load_settings, Settings};

/// Settings, an open database and the inbox tree for one command.
pub(crate) struct Context {
    pub settings: Settings,
    pub conn: Connection,
    pub dirs: InboxDirs,
}

pub(crate) fn open() -> Result<Context> {
    let settings = load_settings();
    let path = db_path(&settings);
    if !path.exists() {
        return Err(TallyError::Settings(format!(
            "no database at {}; run `tally init` first",
            path.display()
        )));
    }
    let conn = get_connection(&path)?;
    let dirs = InboxDirs::new(std::path::Path::new(&settings.data_dir));
    Ok(Context { settings, conn, dirs })
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Parser)]
#[command(name = "tally", about = "Queue bank statements, auto-categorize them with rules, commit them to a ledger.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database and inbox.
    Init {
        /// Path for tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// List supported import types.
    Types {
        #[arg(long)]
        json: bool,
    },
    /// Parse one statement file into a queued batch.
    Import {
        /// Path to the statement file
        file: String,
        /// Import type key (e.g. bofa_checking); detected when omitted
        #[arg(long = "type")]
        import_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Stage every new file in the inbox.
    Scan {
        #[arg(long)]
        json: bool,
    },
    /// List batches waiting for review.
    Queue {
        #[arg(long)]
        json: bool,
    },
    /// Show one batch with its staged rows.
    Batch {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Override the category of a staged row.
    Edit {
        /// Batch ID
        batch: i64,
        /// Row temp id, e.g. tmp-3
        temp_id: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        subcategory: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Commit staged rows of a batch into the ledger.
    Commit {
        /// Batch ID
        batch: i64,
        /// Comma-separated temp ids (default: every pending row)
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<String>>,
        #[arg(long)]
        json: bool,
    },
    /// Return queued and failed files to the inbox and drop their batches.
    Reset {
        /// Seconds to wait for the database (default: reset_timeout_secs setting)
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Show recent imports.
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Manage tagging rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Show data directory and pipeline counts.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a tagging rule.
    Add {
        /// Pattern to match against transaction descriptions
        pattern: String,
        /// Category name to assign (created if missing)
        #[arg(long)]
        category: String,
        #[arg(long)]
        subcategory: Option<String>,
        /// Match type: exact, startsWith, contains
        #[arg(long = "match-type", default_value = "contains")]
        match_type: String,
        /// Rule priority (higher wins)
        #[arg(long, default_value = "0")]
        priority: i64,
        /// Store the rule inactive
        #[arg(long)]
        inactive: bool,
        #[arg(long)]
        json: bool,
    },
    /// List all tagging rules.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Update an existing rule.
    Update {
        /// Rule ID (shown in `tally rules list`)
        id: i64,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// New subcategory; an empty string clears it
        #[arg(long)]
        subcategory: Option<String>,
        #[arg(long = "match-type")]
        match_type: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        /// true or false
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        json: bool,
    },
    /// Delete a rule by ID.
    Delete { id: i64 },
    /// Show which rule would tag each description, without changing anything.
    Preview {
        descriptions: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Ledger descriptions by frequency, with the rule that tags them.
    Frequency {
        #[arg(long, default_value = "all", value_parser = ["all", "tagged", "untagged"])]
        filter: String,
        #[arg(long)]
        json: bool,
    },
    /// Re-run active rules over the ledger.
    Reapply {
        #[arg(long)]
        json: bool,
    },
    /// Activate every rule, then reapply.
    ActivateAll {
        #[arg(long)]
        json: bool,
    },
}
