use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported import type: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed file: {0}")]
    MalformedFile(String),

    #[error("File already scanned: {0}")]
    DuplicateFile(String),

    #[error("Invalid row {temp_id}: {reason}")]
    Validation { temp_id: String, reason: String },

    #[error("Row {0} was already committed")]
    ConcurrencyConflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Unknown batch: {0}")]
    UnknownBatch(i64),

    #[error("Unknown row {temp_id} in batch {batch_id}")]
    UnknownRow { batch_id: i64, temp_id: String },

    #[error("Unknown rule: {0}")]
    UnknownRule(i64),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, TallyError>;
