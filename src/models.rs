use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
    Exact,
    StartsWith,
    Contains,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::StartsWith => "startsWith",
            Self::Contains => "contains",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "exact" => Some(Self::Exact),
            "startsWith" | "starts_with" => Some(Self::StartsWith),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }

    /// Tie-break rank among rules of equal priority: higher is more specific.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Exact => 2,
            Self::StartsWith => 1,
            Self::Contains => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggingRule {
    pub id: i64,
    pub pattern: String,
    pub match_type: MatchType,
    pub category_id: i64,
    pub subcategory_id: Option<i64>,
    pub priority: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Income,
    Outcome,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Outcome => "outcome",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "income" => Some(Self::Income),
            "outcome" => Some(Self::Outcome),
            _ => None,
        }
    }

    pub fn from_value(value: f64) -> Self {
        if value < 0.0 {
            Self::Outcome
        } else {
            Self::Income
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Imported,
    Duplicate,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Imported => "imported",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "imported" => Some(Self::Imported),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

/// Intermediate representation from a statement parser before staging.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub temp_id: String,
    pub date: String,
    pub description: String,
    pub value: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedTransaction {
    pub temp_id: String,
    pub date: String,
    pub description: String,
    pub value: f64,
    pub direction: Direction,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub confidence: f64,
    pub needs_review: bool,
    pub import_status: ImportStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_count: i64,
    pub pending_count: i64,
    pub needs_review_count: i64,
    pub low_confidence_count: i64,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Queued,
    Committed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Committed => "committed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub id: i64,
    pub file_hash: String,
    pub filename: String,
    pub parser_used: String,
    pub bank: String,
    pub parsed_at: String,
    pub state: BatchState,
    pub stats: BatchStats,
    pub transactions: Vec<StagedTransaction>,
}

/// Canonical committed record, as appended to the ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: Option<i64>,
    pub bank: String,
    pub date: String,
    pub description: String,
    pub value: f64,
    pub direction: Direction,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub fingerprint: String,
    pub batch_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Imported,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "imported" => Some(Self::Imported),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistoryRecord {
    pub id: Option<i64>,
    pub file_hash: String,
    pub filename: String,
    pub bank: Option<String>,
    pub imported_at: String,
    pub status: HistoryStatus,
    pub total_count: i64,
    pub imported_count: i64,
    pub duplicate_count: i64,
    pub error: Option<String>,
}
