use std::path::Path;

use serde::Serialize;

use crate::error::{Result, TallyError};
use crate::fingerprint::file_fingerprint;
use crate::models::{Direction, ParsedRow};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw
        .replace("R$", "")
        .replace(',', "")
        .replace('"', "")
        .replace('$', "");
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(|v| -v);
    }
    s.parse().ok()
}

pub fn parse_date_mdy(raw: &str) -> Option<String> {
    let date = chrono::NaiveDate::parse_from_str(raw.trim(), "%m/%d/%Y").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}

pub fn parse_date_dmy(raw: &str) -> Option<String> {
    let date = chrono::NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}

pub fn parse_date_iso(raw: &str) -> Option<String> {
    let date = chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn decode(bytes: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| TallyError::MalformedFile(format!("not valid UTF-8: {e}")))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

fn reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
}

/// 1-based line in the file where the record starts.
fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn is_blank(record: &csv::StringRecord) -> bool {
    record.iter().all(|f| f.trim().is_empty())
}

fn bad_amount(record: &csv::StringRecord, raw: &str) -> TallyError {
    TallyError::MalformedFile(format!(
        "line {}: unreadable amount '{}'",
        line_of(record),
        raw.trim()
    ))
}

fn bad_date(record: &csv::StringRecord, raw: &str) -> TallyError {
    TallyError::MalformedFile(format!(
        "line {}: unreadable date '{}'",
        line_of(record),
        raw.trim()
    ))
}

fn short_record(record: &csv::StringRecord, expected: usize) -> TallyError {
    TallyError::MalformedFile(format!(
        "line {}: expected {expected} columns, found {}",
        line_of(record),
        record.len()
    ))
}

/// A header with nothing parseable under it is not a statement.
fn require_rows(rows: Vec<ParsedRow>) -> Result<Vec<ParsedRow>> {
    if rows.is_empty() {
        return Err(TallyError::MalformedFile(
            "no transaction rows after header".to_string(),
        ));
    }
    Ok(rows)
}

fn row(date: String, description: String, value: f64) -> ParsedRow {
    ParsedRow {
        temp_id: String::new(),
        date,
        description,
        value,
        direction: Direction::from_value(value),
    }
}

/// Assign batch-local ids in file order.
fn number_rows(mut rows: Vec<ParsedRow>) -> Vec<ParsedRow> {
    for (idx, row) in rows.iter_mut().enumerate() {
        row.temp_id = format!("tmp-{}", idx + 1);
    }
    rows
}

// ---------------------------------------------------------------------------
// Raw files
// ---------------------------------------------------------------------------

/// A statement file as picked up from the inbox or handed to `tally import`.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub filename: String,
    pub content: Vec<u8>,
    pub import_type: Option<String>,
    pub fingerprint: String,
}

impl RawFile {
    pub fn from_bytes(filename: &str, content: Vec<u8>, import_type: Option<&str>) -> Self {
        let fingerprint = file_fingerprint(&content);
        Self {
            filename: filename.to_string(),
            content,
            import_type: import_type.map(str::to_string),
            fingerprint,
        }
    }

    pub fn read(path: &Path, import_type: Option<&str>) -> Result<Self> {
        let content = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        Ok(Self::from_bytes(&filename, content, import_type))
    }
}

// ---------------------------------------------------------------------------
// Importer kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImporterKind {
    BofaChecking,
    BofaCreditCard,
    NubankCard,
    GenericCsv,
}

impl ImporterKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::BofaChecking => "bofa_checking",
            Self::BofaCreditCard => "bofa_credit_card",
            Self::NubankCard => "nubank_card",
            Self::GenericCsv => "generic_csv",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BofaChecking => "Bank of America Checking (CSV)",
            Self::BofaCreditCard => "Bank of America Credit Card (CSV)",
            Self::NubankCard => "Nubank Credit Card (CSV)",
            Self::GenericCsv => "Generic CSV (date, description, amount)",
        }
    }

    /// Bank label recorded on batches and folded into ledger fingerprints.
    pub fn bank(&self) -> &'static str {
        match self {
            Self::BofaChecking | Self::BofaCreditCard => "bofa",
            Self::NubankCard => "nubank",
            Self::GenericCsv => "generic",
        }
    }

    pub fn detect(&self, bytes: &[u8]) -> bool {
        let Ok(text) = decode(bytes) else {
            return false;
        };
        match self {
            Self::BofaChecking => detect_bofa_checking(text),
            Self::BofaCreditCard => detect_bofa_credit_card(text),
            Self::NubankCard => detect_nubank_card(text),
            Self::GenericCsv => generic_header(text).is_some(),
        }
    }

    /// Pure: turns file bytes into unclassified candidates.
    pub fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedRow>> {
        let text = decode(bytes)?;
        let rows = match self {
            Self::BofaChecking => parse_bofa_checking(text)?,
            Self::BofaCreditCard => parse_bofa_credit_card(text)?,
            Self::NubankCard => parse_nubank_card(text)?,
            Self::GenericCsv => parse_generic_csv(text)?,
        };
        Ok(number_rows(rows))
    }
}

const ALL_IMPORTERS: &[ImporterKind] = &[
    ImporterKind::BofaChecking,
    ImporterKind::BofaCreditCard,
    ImporterKind::NubankCard,
    ImporterKind::GenericCsv,
];

#[derive(Debug, Clone, Serialize)]
pub struct ImportType {
    pub value: &'static str,
    pub label: &'static str,
}

pub fn import_types() -> Vec<ImportType> {
    ALL_IMPORTERS
        .iter()
        .map(|i| ImportType {
            value: i.key(),
            label: i.label(),
        })
        .collect()
}

pub fn get_by_key(key: &str) -> Result<ImporterKind> {
    ALL_IMPORTERS
        .iter()
        .find(|i| i.key() == key)
        .copied()
        .ok_or_else(|| TallyError::UnsupportedFormat(key.to_string()))
}

pub fn detect_format(bytes: &[u8]) -> Result<ImporterKind> {
    ALL_IMPORTERS
        .iter()
        .find(|i| i.detect(bytes))
        .copied()
        .ok_or_else(|| TallyError::UnsupportedFormat("unrecognized file layout".to_string()))
}

/// Resolve the parser (declared type or detection) and parse the file.
pub fn parse(raw: &RawFile) -> Result<(ImporterKind, Vec<ParsedRow>)> {
    let importer = match raw.import_type.as_deref() {
        Some(key) => get_by_key(key)?,
        None => detect_format(&raw.content)?,
    };
    let rows = importer.parse(&raw.content)?;
    Ok((importer, rows))
}

// ---------------------------------------------------------------------------
// BofA Checking parser
// ---------------------------------------------------------------------------

fn is_bofa_checking_header(record: &csv::StringRecord) -> bool {
    record.len() >= 4 && record[0].trim() == "Date" && record[1].contains("Description")
}

fn detect_bofa_checking(text: &str) -> bool {
    reader(text)
        .records()
        .filter_map(|r| r.ok())
        .any(|record| is_bofa_checking_header(&record))
}

fn parse_bofa_checking(text: &str) -> Result<Vec<ParsedRow>> {
    let mut rows = Vec::new();
    let mut found_header = false;

    for result in reader(text).records() {
        let Ok(record) = result else { continue };
        if !found_header {
            found_header = is_bofa_checking_header(&record);
            continue;
        }
        if is_blank(&record) {
            continue;
        }
        if record.len() < 3 {
            return Err(short_record(&record, 3));
        }
        let description = record[1].trim().to_string();
        if description.contains("Beginning balance") {
            continue;
        }
        let date = parse_date_mdy(&record[0]).ok_or_else(|| bad_date(&record, &record[0]))?;
        let value = parse_amount(&record[2]).ok_or_else(|| bad_amount(&record, &record[2]))?;
        rows.push(row(date, description, value));
    }
    if !found_header {
        return Err(TallyError::MalformedFile(
            "missing 'Date,Description,Amount' header".to_string(),
        ));
    }
    require_rows(rows)
}

// ---------------------------------------------------------------------------
// BofA Credit Card parser
// ---------------------------------------------------------------------------

fn detect_bofa_credit_card(text: &str) -> bool {
    text.contains("CardHolder Name") || (text.contains("Posting Date") && text.contains("Payee"))
}

fn parse_bofa_credit_card(text: &str) -> Result<Vec<ParsedRow>> {
    let mut rows = Vec::new();
    let mut found_header = false;
    let (mut idx_date, mut idx_desc, mut idx_amount, mut idx_type) = (3, 5, 6, 9);

    for result in reader(text).records() {
        let Ok(record) = result else { continue };
        if !found_header {
            if record.iter().any(|f| f.contains("Posting Date")) {
                for (i, field) in record.iter().enumerate() {
                    match field.trim() {
                        "Posting Date" => idx_date = i,
                        "Payee" => idx_desc = i,
                        "Amount" => idx_amount = i,
                        "Type" => idx_type = i,
                        _ => {}
                    }
                }
                found_header = true;
            }
            continue;
        }
        let min_cols = [idx_date, idx_desc, idx_amount, idx_type]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 1;
        if is_blank(&record) {
            continue;
        }
        if record.len() < min_cols {
            return Err(short_record(&record, min_cols));
        }
        let date = parse_date_mdy(&record[idx_date])
            .ok_or_else(|| bad_date(&record, &record[idx_date]))?;
        let description = record[idx_desc].trim().to_string();
        let amount = parse_amount(&record[idx_amount])
            .ok_or_else(|| bad_amount(&record, &record[idx_amount]))?;
        let value = if record[idx_type].trim() == "D" {
            -amount.abs()
        } else {
            amount.abs()
        };
        rows.push(row(date, description, value));
    }
    if !found_header {
        return Err(TallyError::MalformedFile(
            "missing 'Posting Date' header".to_string(),
        ));
    }
    require_rows(rows)
}

// ---------------------------------------------------------------------------
// Nubank credit card parser
// ---------------------------------------------------------------------------

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_lowercase)
}

fn detect_nubank_card(text: &str) -> bool {
    first_line(text).as_deref() == Some("date,title,amount")
}

fn parse_nubank_card(text: &str) -> Result<Vec<ParsedRow>> {
    if !detect_nubank_card(text) {
        return Err(TallyError::MalformedFile(
            "missing 'date,title,amount' header".to_string(),
        ));
    }
    let mut rows = Vec::new();
    for result in reader(text).records().skip(1) {
        let Ok(record) = result else { continue };
        if is_blank(&record) {
            continue;
        }
        if record.len() < 3 {
            return Err(short_record(&record, 3));
        }
        let date = parse_date_iso(&record[0]).ok_or_else(|| bad_date(&record, &record[0]))?;
        let description = record[1].trim().to_string();
        let amount = parse_amount(&record[2]).ok_or_else(|| bad_amount(&record, &record[2]))?;
        // Card statement: charges are positive, payments and refunds negative.
        rows.push(row(date, description, -amount));
    }
    require_rows(rows)
}

// ---------------------------------------------------------------------------
// Generic CSV parser
// ---------------------------------------------------------------------------

/// Column indexes of (date, description, amount) from the first non-empty line.
fn generic_header(text: &str) -> Option<(usize, usize, usize)> {
    let record = reader(text)
        .records()
        .filter_map(|r| r.ok())
        .find(|r| r.iter().any(|f| !f.trim().is_empty()))?;
    let position = |name: &str| {
        record
            .iter()
            .position(|f| f.trim().eq_ignore_ascii_case(name))
    };
    Some((position("date")?, position("description")?, position("amount")?))
}

fn parse_generic_csv(text: &str) -> Result<Vec<ParsedRow>> {
    let (idx_date, idx_desc, idx_amount) = generic_header(text).ok_or_else(|| {
        TallyError::MalformedFile("missing 'date,description,amount' header".to_string())
    })?;
    let min_cols = idx_date.max(idx_desc).max(idx_amount) + 1;

    let mut rows = Vec::new();
    let mut header_seen = false;
    for result in reader(text).records() {
        let Ok(record) = result else { continue };
        if is_blank(&record) {
            continue;
        }
        if !header_seen {
            header_seen = true;
            continue;
        }
        if record.len() < min_cols {
            return Err(short_record(&record, min_cols));
        }
        let raw_date = &record[idx_date];
        let date = parse_date_iso(raw_date)
            .or_else(|| parse_date_dmy(raw_date))
            .ok_or_else(|| bad_date(&record, raw_date))?;
        let description = record[idx_desc].trim().to_string();
        let value = parse_amount(&record[idx_amount])
            .ok_or_else(|| bad_amount(&record, &record[idx_amount]))?;
        rows.push(row(date, description, value));
    }
    require_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("\"500.00\""), Some(500.0));
        assert_eq!(parse_amount("  -42.50  "), Some(-42.5));
        assert_eq!(parse_amount("not_a_number"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_amount_parenthesized_and_currency() {
        assert_eq!(parse_amount("(1,234.56)"), Some(-1234.56));
        assert_eq!(parse_amount("$1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("-$50.00"), Some(-50.0));
        assert_eq!(parse_amount("R$ 12.00"), Some(12.0));
        assert_eq!(parse_amount("R$ -8.50"), Some(-8.5));
        assert_eq!(parse_amount("12R00"), None);
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(parse_date_mdy("01/15/2025"), Some("2025-01-15".to_string()));
        assert_eq!(parse_date_mdy("02/30/2025"), None);
        assert_eq!(parse_date_dmy("15/01/2025"), Some("2025-01-15".to_string()));
        assert_eq!(parse_date_iso("2025-01-15"), Some("2025-01-15".to_string()));
        assert_eq!(parse_date_iso("2025-13-01"), None);
    }

    #[test]
    fn test_bofa_checking_parse() {
        let content = "\
Account Name: Test Checking
Account Number: ****1234

Date,Description,Amount,Running Bal.
01/15/2025,ADOBE CREATIVE,-50.00,950.00
01/16/2025,Beginning balance,1000.00,1000.00
01/17/2025,STRIPE PAYOUT,\"2,500.00\",3450.00
";
        let rows = ImporterKind::BofaChecking.parse(content.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].temp_id, "tmp-1");
        assert_eq!(rows[0].description, "ADOBE CREATIVE");
        assert_eq!(rows[0].value, -50.0);
        assert_eq!(rows[0].direction, Direction::Outcome);
        assert_eq!(rows[1].temp_id, "tmp-2");
        assert_eq!(rows[1].value, 2500.0);
        assert_eq!(rows[1].direction, Direction::Income);
    }

    #[test]
    fn test_bofa_checking_without_header_is_malformed() {
        let err = ImporterKind::BofaChecking
            .parse(b"just,some,random\ntext,here,now\n")
            .unwrap_err();
        assert!(matches!(err, TallyError::MalformedFile(_)));
    }

    #[test]
    fn test_bofa_checking_bad_amount_is_malformed() {
        let content = "Date,Description,Amount,Running Bal.\n01/15/2025,ADOBE,abc,0\n";
        let err = ImporterKind::BofaChecking.parse(content.as_bytes()).unwrap_err();
        assert!(matches!(err, TallyError::MalformedFile(_)));
    }

    #[test]
    fn test_bofa_credit_card_type_sets_direction() {
        let content = "\
CardHolder Name,Card,Account,Posting Date,Trans. Date,Payee,Amount,Ref,Addr,Type
JOHN,1234,5678,01/10/2025,01/09/2025,NETFLIX.COM,15.49,r1,x,D
JOHN,1234,5678,01/12/2025,01/12/2025,PAYMENT THANK YOU,500.00,r2,x,C
";
        let rows = ImporterKind::BofaCreditCard.parse(content.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, -15.49);
        assert_eq!(rows[0].direction, Direction::Outcome);
        assert_eq!(rows[1].value, 500.0);
        assert_eq!(rows[1].direction, Direction::Income);
    }

    #[test]
    fn test_nubank_card_charges_are_outcomes() {
        let content = "date,title,amount\n2025-02-01,Uber Eats SP,32.90\n2025-02-03,Pagamento recebido,-100.00\n";
        let rows = ImporterKind::NubankCard.parse(content.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, -32.90);
        assert_eq!(rows[0].direction, Direction::Outcome);
        assert_eq!(rows[1].value, 100.0);
        assert_eq!(rows[1].direction, Direction::Income);
    }

    #[test]
    fn test_generic_csv_any_column_order_and_dmy() {
        let content = "Amount,Date,Description\n-10.00,15/01/2025,Coffee\n200,2025-01-20,Salary\n";
        let rows = ImporterKind::GenericCsv.parse(content.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "2025-01-15");
        assert_eq!(rows[0].description, "Coffee");
        assert_eq!(rows[1].value, 200.0);
    }

    #[test]
    fn test_header_without_parseable_rows_is_malformed() {
        let header_only = ImporterKind::GenericCsv.parse(b"date,description,amount\n").unwrap_err();
        assert!(matches!(header_only, TallyError::MalformedFile(_)));

        let nubank = ImporterKind::NubankCard.parse(b"date,title,amount\n\n").unwrap_err();
        assert!(matches!(nubank, TallyError::MalformedFile(_)));
    }

    #[test]
    fn test_unreadable_date_fails_the_file_with_its_line() {
        let content = "date,description,amount\nnot-a-date,Coffee,-3.00\n??,Tea,-2.00\n";
        let err = ImporterKind::GenericCsv.parse(content.as_bytes()).unwrap_err();
        match err {
            TallyError::MalformedFile(msg) => {
                assert!(msg.contains("line 2"), "{msg}");
                assert!(msg.contains("not-a-date"), "{msg}");
            }
            other => panic!("expected MalformedFile, got {other:?}"),
        }

        let mixed = "date,description,amount\n2025-01-02,Coffee,-3.00\n2025-02-30,Tea,-2.00\n";
        assert!(matches!(
            ImporterKind::GenericCsv.parse(mixed.as_bytes()),
            Err(TallyError::MalformedFile(_))
        ));
    }

    #[test]
    fn test_error_line_counts_preamble_and_blank_lines() {
        let content = "\
Account Name: Test Checking
Account Number: ****1234

Date,Description,Amount,Running Bal.
01/15/2025,ADOBE CREATIVE,-50.00,950.00

01/17/2025,STRIPE PAYOUT,abc,3450.00
";
        let err = ImporterKind::BofaChecking.parse(content.as_bytes()).unwrap_err();
        match err {
            TallyError::MalformedFile(msg) => assert!(msg.starts_with("line 7:"), "{msg}"),
            other => panic!("expected MalformedFile, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let err = ImporterKind::GenericCsv.parse(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, TallyError::MalformedFile(_)));
    }

    #[test]
    fn test_detect_format_prefers_specific_parsers() {
        let bofa = "Date,Description,Amount,Running Bal.\n01/15/2025,X,-1.00,0\n";
        assert_eq!(detect_format(bofa.as_bytes()).unwrap(), ImporterKind::BofaChecking);
        let nubank = "date,title,amount\n2025-02-01,X,1.00\n";
        assert_eq!(detect_format(nubank.as_bytes()).unwrap(), ImporterKind::NubankCard);
        let generic = "date,description,amount\n2025-02-01,X,1.00\n";
        assert_eq!(detect_format(generic.as_bytes()).unwrap(), ImporterKind::GenericCsv);
        assert!(matches!(
            detect_format(b"%PDF-1.4 binary"),
            Err(TallyError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unknown_import_type_is_unsupported() {
        let raw = RawFile::from_bytes("a.csv", b"date,description,amount\n".to_vec(), Some("ofx"));
        assert!(matches!(parse(&raw), Err(TallyError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_import_types_lists_every_parser() {
        let types = import_types();
        assert_eq!(types.len(), 4);
        assert!(types.iter().any(|t| t.value == "generic_csv"));
    }
}
