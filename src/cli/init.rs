use std::path::PathBuf;

use crate::db::{get_connection, init_db, DB_FILE};
use crate::error::Result;
use crate::inbox::InboxDirs;
use crate::settings::{file_settings, save_settings, with_env_override, Settings};

pub fn run(data_dir: Option<String>) -> Result<()> {
    // Persist only what the user chose; a TALLY_DATA_DIR override stays
    // in the environment.
    let mut stored = file_settings().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "replacing unreadable settings");
        Settings::default()
    });
    let resolved = match data_dir {
        Some(dir) => {
            stored.data_dir = expand_path(&dir);
            PathBuf::from(&stored.data_dir)
        }
        None => PathBuf::from(with_env_override(stored.clone()).data_dir),
    };
    save_settings(&stored)?;

    std::fs::create_dir_all(&resolved)?;
    InboxDirs::new(&resolved).ensure()?;

    let conn = get_connection(&resolved.join(DB_FILE))?;
    init_db(&conn)?;

    tracing::info!(data_dir = %resolved.display(), "initialized");
    println!("Initialized tally at {}", resolved.display());
    println!("Drop statement files into {}", resolved.join("inbox").display());
    Ok(())
}

fn expand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
