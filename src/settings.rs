use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::DB_FILE;
use crate::error::{Result, TallyError};

pub const DATA_DIR_ENV: &str = "TALLY_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Matched rows scoring below this count as low-confidence in batch stats.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_low_confidence_threshold() -> f64 {
    1.0
}

fn default_scan_workers() -> usize {
    4
}

fn default_reset_timeout_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "tally=info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            low_confidence_threshold: default_low_confidence_threshold(),
            scan_workers: default_scan_workers(),
            reset_timeout_secs: default_reset_timeout_secs(),
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn workers(&self) -> usize {
        self.scan_workers.max(1)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tally")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("tally")
}

/// The settings file as stored, without the environment override. A missing
/// file gives defaults; an unreadable one is an error.
pub fn file_settings() -> Result<Settings> {
    let path = settings_path();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map_err(|e| TallyError::Settings(format!("{}: {e}", path.display())))
}

/// Effective settings: the stored file (defaults when missing or unreadable)
/// with `TALLY_DATA_DIR` applied on top.
pub fn load_settings() -> Settings {
    with_env_override(file_settings().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unreadable settings");
        Settings::default()
    }))
}

pub fn with_env_override(mut settings: Settings) -> Settings {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            settings.data_dir = dir;
        }
    }
    settings
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| TallyError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn db_path(settings: &Settings) -> PathBuf {
    PathBuf::from(&settings.data_dir).join(DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"data_dir": "/tmp/books"}"#).unwrap();
        assert_eq!(settings.data_dir, "/tmp/books");
        assert_eq!(settings.low_confidence_threshold, 1.0);
        assert_eq!(settings.scan_workers, 4);
        assert_eq!(settings.reset_timeout(), Duration::from_secs(30));
        assert_eq!(settings.log_filter, "tally=info");
    }

    #[test]
    fn test_workers_never_zero() {
        let settings = Settings {
            scan_workers: 0,
            ..Settings::default()
        };
        assert_eq!(settings.workers(), 1);
    }

    #[test]
    fn test_db_path_joins_data_dir() {
        let settings = Settings {
            data_dir: "/tmp/books".to_string(),
            ..Settings::default()
        };
        assert_eq!(db_path(&settings), PathBuf::from("/tmp/books/tally.db"));
    }
}
