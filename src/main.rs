mod batch;
mod cli;
mod commit;
mod db;
mod duplicate;
mod error;
mod fingerprint;
mod fmt;
mod history;
mod importer;
mod inbox;
mod ledger;
mod models;
mod rules;
mod scan;
mod settings;
mod tagging;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, RulesCommands};

/// Reads the log filter without logging; a bad settings file is reported by
/// the command's own settings load once the subscriber is up.
fn init_logging() {
    let fallback = settings::file_settings().unwrap_or_default().log_filter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Types { json } => cli::import::types(json),
        Commands::Import {
            file,
            import_type,
            json,
        } => cli::import::file(&file, import_type.as_deref(), json),
        Commands::Scan { json } => cli::import::scan(json),
        Commands::Queue { json } => cli::queue::list(json),
        Commands::Batch { id, json } => cli::queue::show(id, json),
        Commands::Edit {
            batch,
            temp_id,
            category,
            subcategory,
            json,
        } => cli::queue::edit(batch, &temp_id, &category, subcategory.as_deref(), json),
        Commands::Commit { batch, ids, json } => cli::commit::run(batch, ids, json),
        Commands::Reset { timeout, json } => cli::import::reset(timeout, json),
        Commands::History { limit, json } => cli::history::run(limit, json),
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                subcategory,
                match_type,
                priority,
                inactive,
                json,
            } => cli::rules::add(
                cli::rules::AddArgs {
                    pattern: &pattern,
                    category: &category,
                    subcategory: subcategory.as_deref(),
                    match_type: &match_type,
                    priority,
                    inactive,
                },
                json,
            ),
            RulesCommands::List { json } => cli::rules::list(json),
            RulesCommands::Update {
                id,
                pattern,
                category,
                subcategory,
                match_type,
                priority,
                active,
                json,
            } => cli::rules::update(
                id,
                cli::rules::RuleUpdateArgs {
                    pattern,
                    category,
                    subcategory,
                    match_type,
                    priority,
                    active,
                },
                json,
            ),
            RulesCommands::Delete { id } => cli::rules::delete(id),
            RulesCommands::Preview { descriptions, json } => cli::rules::preview(&descriptions, json),
            RulesCommands::Frequency { filter, json } => cli::rules::frequency(&filter, json),
            RulesCommands::Reapply { json } => cli::rules::reapply(json),
            RulesCommands::ActivateAll { json } => cli::rules::activate_all(json),
        },
        Commands::Status { json } => cli::status::run(json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
