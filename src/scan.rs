use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::batch::{batch_file_hashes, delete_queued_batches, insert_batch, stage};
use crate::db::{now_timestamp, DEFAULT_BUSY_TIMEOUT};
use crate::error::{Result, TallyError};
use crate::history::{delete_failed_history, history_file_hashes, insert_history};
use crate::importer::{self, ImporterKind, RawFile};
use crate::inbox::{list_files, move_into, InboxDirs};
use crate::models::{HistoryStatus, ImportHistoryRecord, StagedTransaction, TaggingRule};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Queued,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFile {
    pub filename: String,
    pub status: FileStatus,
    pub batch_id: Option<i64>,
    pub transaction_count: usize,
    pub parser: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub summary: ScanSummary,
    pub processed: Vec<ProcessedFile>,
    pub errors: Vec<FileError>,
}

impl ScanResult {
    fn skip(&mut self, filename: String) {
        self.summary.skipped += 1;
        self.processed.push(ProcessedFile {
            filename,
            status: FileStatus::Skipped,
            batch_id: None,
            transaction_count: 0,
            parser: None,
        });
    }

    fn fail(&mut self, filename: String, error: &TallyError) {
        self.summary.failed += 1;
        self.errors.push(FileError {
            filename,
            error: error.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub workers: usize,
    pub confidence_threshold: f64,
}

/// Parse and classify one file. Pure apart from reading the rule snapshot.
fn parse_and_stage(raw: &RawFile, rules: &[TaggingRule]) -> Result<(ImporterKind, Vec<StagedTransaction>)> {
    let (importer, rows) = importer::parse(raw)?;
    Ok((importer, stage(&rows, rules)))
}

type Parsed = Result<(ImporterKind, Vec<StagedTransaction>)>;

/// Fan the parse step out over scoped threads. Output is index-aligned with
/// `files`. A worker that panics fails every file of its chunk.
fn parse_parallel<F>(files: &[(PathBuf, RawFile)], workers: usize, parse: F) -> Vec<Parsed>
where
    F: Fn(&RawFile) -> Parsed + Sync,
{
    if files.is_empty() {
        return Vec::new();
    }
    let chunk_size = files.len().div_ceil(workers.max(1));
    let parse = &parse;

    std::thread::scope(|s| {
        let handles: Vec<_> = files
            .chunks(chunk_size)
            .map(|chunk| {
                let handle = s.spawn(move || chunk.iter().map(|(_, raw)| parse(raw)).collect::<Vec<_>>());
                (chunk, handle)
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|(chunk, handle)| match handle.join() {
                Ok(parsed) => parsed,
                Err(_) => {
                    tracing::error!(files = chunk.len(), "parse worker panicked");
                    chunk
                        .iter()
                        .map(|(_, raw)| {
                            Err(TallyError::MalformedFile(format!(
                                "parser crashed while reading {}",
                                raw.filename
                            )))
                        })
                        .collect()
                }
            })
            .collect()
    })
}

fn failed_history(raw: &RawFile, error: &TallyError) -> ImportHistoryRecord {
    ImportHistoryRecord {
        id: None,
        file_hash: raw.fingerprint.clone(),
        filename: raw.filename.clone(),
        bank: None,
        imported_at: now_timestamp(),
        status: HistoryStatus::Failed,
        total_count: 0,
        imported_count: 0,
        duplicate_count: 0,
        error: Some(error.to_string()),
    }
}

/// Sweep the inbox into queued batches. Fingerprint checks and persistence
/// run serially on `conn`; only parsing runs on worker threads. One file's
/// failure never stops the sweep.
pub fn scan(
    conn: &Connection,
    dirs: &InboxDirs,
    rules: &[TaggingRule],
    options: ScanOptions,
) -> Result<ScanResult> {
    dirs.ensure()?;
    let mut result = ScanResult::default();
    let mut known: HashSet<String> = batch_file_hashes(conn)?.into_iter().collect();
    known.extend(history_file_hashes(conn)?);

    let mut fresh = Vec::new();
    for path in list_files(&dirs.inbox)? {
        result.summary.total += 1;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let raw = match RawFile::read(&path, None) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(file = %filename, error = %e, "unreadable inbox file");
                result.fail(filename, &e);
                continue;
            }
        };
        if !known.insert(raw.fingerprint.clone()) {
            tracing::info!(file = %filename, "already scanned, skipping");
            result.skip(filename);
            continue;
        }
        fresh.push((path, raw));
    }

    let parsed = parse_parallel(&fresh, options.workers, |raw| parse_and_stage(raw, rules));
    for ((path, raw), parsed) in fresh.iter().zip(parsed) {
        match parsed {
            Ok((importer, rows)) => persist_batch(conn, dirs, path, raw, importer, &rows, options, &mut result),
            Err(e) => {
                tracing::warn!(file = %raw.filename, error = %e, "parse failed");
                if let Err(move_err) = move_into(path, &dirs.failed) {
                    tracing::warn!(file = %raw.filename, error = %move_err, "could not move to failed/");
                }
                if let Err(db_err) = insert_history(conn, &failed_history(raw, &e)) {
                    tracing::warn!(file = %raw.filename, error = %db_err, "could not record failed import");
                }
                result.fail(raw.filename.clone(), &e);
            }
        }
    }

    tracing::info!(
        total = result.summary.total,
        successful = result.summary.successful,
        failed = result.summary.failed,
        skipped = result.summary.skipped,
        "scan finished"
    );
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn persist_batch(
    conn: &Connection,
    dirs: &InboxDirs,
    path: &Path,
    raw: &RawFile,
    importer: ImporterKind,
    rows: &[StagedTransaction],
    options: ScanOptions,
    result: &mut ScanResult,
) {
    // The batch records the name the file has in queue/, so it can be found
    // again for archiving.
    let queued = match move_into(path, &dirs.queue) {
        Ok(dest) => dest,
        Err(e) => {
            result.fail(raw.filename.clone(), &e);
            return;
        }
    };
    let queued_name = queued
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| raw.filename.clone());

    match insert_batch(conn, &raw.fingerprint, &queued_name, importer, rows, options.confidence_threshold) {
        Ok(batch_id) => {
            tracing::info!(file = %queued_name, batch_id, rows = rows.len(), parser = importer.key(), "file staged");
            result.summary.successful += 1;
            result.processed.push(ProcessedFile {
                filename: queued_name,
                status: FileStatus::Queued,
                batch_id: Some(batch_id),
                transaction_count: rows.len(),
                parser: Some(importer.key().to_string()),
            });
        }
        Err(e) => {
            if let Err(move_err) = move_into(&queued, &dirs.inbox) {
                tracing::warn!(file = %queued_name, error = %move_err, "could not return file to inbox");
            }
            match e {
                TallyError::DuplicateFile(_) => result.skip(raw.filename.clone()),
                e => {
                    tracing::warn!(file = %raw.filename, error = %e, "could not persist batch");
                    result.fail(raw.filename.clone(), &e);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub batch_id: i64,
    pub parser_used: String,
    pub transaction_count: usize,
}

/// Stage one file named on the command line. The file is copied into queue/
/// so reset and archiving treat it like a scanned file.
pub fn stage_file(
    conn: &Connection,
    dirs: &InboxDirs,
    path: &Path,
    import_type: Option<&str>,
    rules: &[TaggingRule],
    confidence_threshold: f64,
) -> Result<StagedFile> {
    dirs.ensure()?;
    let raw = RawFile::read(path, import_type)?;
    let mut known: HashSet<String> = batch_file_hashes(conn)?.into_iter().collect();
    known.extend(history_file_hashes(conn)?);
    if known.contains(&raw.fingerprint) {
        return Err(TallyError::DuplicateFile(raw.filename));
    }
    let (importer, rows) = parse_and_stage(&raw, rules)?;
    let queued = crate::inbox::copy_into(path, &dirs.queue)?;
    let queued_name = queued
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| raw.filename.clone());
    let batch_id = match insert_batch(conn, &raw.fingerprint, &queued_name, importer, &rows, confidence_threshold) {
        Ok(id) => id,
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(&queued) {
                tracing::warn!(file = %queued_name, error = %rm, "could not remove queued copy");
            }
            return Err(e);
        }
    };
    tracing::info!(file = %queued_name, batch_id, rows = rows.len(), parser = importer.key(), "file staged");
    Ok(StagedFile {
        batch_id,
        parser_used: importer.key().to_string(),
        transaction_count: rows.len(),
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResult {
    pub moved_to_inbox: usize,
    pub deleted_imports: usize,
    pub deleted_batches: usize,
    pub db_error: Option<String>,
    pub move_errors: Vec<FileError>,
}

fn clear_staging(conn: &Connection, timeout: Duration) -> Result<(usize, usize)> {
    conn.busy_timeout(timeout)?;
    let cleared = (|| {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let batches = delete_queued_batches(&tx)?;
        let imports = delete_failed_history(&tx)?;
        tx.commit()?;
        Ok((imports, batches))
    })();
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    cleared
}

/// Return queued and failed files to the inbox and drop their batches and
/// failed-history records. The DB step is one transaction: it either clears
/// everything or nothing. Safe to rerun.
pub fn reset(conn: &Connection, dirs: &InboxDirs, timeout: Duration) -> Result<ResetResult> {
    let deadline = Instant::now() + timeout;
    let mut result = ResetResult::default();

    match clear_staging(conn, timeout) {
        Ok((imports, batches)) => {
            result.deleted_imports = imports;
            result.deleted_batches = batches;
        }
        Err(e) => {
            tracing::error!(error = %e, "reset could not clear staged batches");
            result.db_error = Some(e.to_string());
        }
    }

    for dir in [&dirs.queue, &dirs.failed] {
        for path in list_files(dir)? {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if Instant::now() > deadline {
                result.move_errors.push(FileError {
                    filename,
                    error: "reset timed out".to_string(),
                });
                continue;
            }
            match move_into(&path, &dirs.inbox) {
                Ok(_) => result.moved_to_inbox += 1,
                Err(e) => result.move_errors.push(FileError {
                    filename,
                    error: e.to_string(),
                }),
            }
        }
    }

    tracing::info!(
        moved = result.moved_to_inbox,
        deleted_batches = result.deleted_batches,
        deleted_imports = result.deleted_imports,
        db_error = result.db_error.is_some(),
        "reset finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{list_queue, load_batch};
    use crate::db::{get_connection, init_db};
    use crate::history::list_history;
    use crate::models::MatchType;
    use crate::tagging::rule;

    const GOOD: &str = "date,description,amount\n2025-01-02,UBER TRIP,-12.50\n2025-01-03,Payroll,3000\n";
    const OTHER: &str = "date,description,amount\n2025-02-02,Grocery Store,-80.00\n";
    const BROKEN: &str = "this is not,a statement\n";

    fn options(workers: usize) -> ScanOptions {
        ScanOptions {
            workers,
            confidence_threshold: 1.0,
        }
    }

    fn setup() -> (tempfile::TempDir, Connection, InboxDirs) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("tally.db")).unwrap();
        init_db(&conn).unwrap();
        let dirs = InboxDirs::new(dir.path());
        dirs.ensure().unwrap();
        (dir, conn, dirs)
    }

    fn rules() -> Vec<TaggingRule> {
        vec![rule(1, "uber", MatchType::Contains, 10, 0)]
    }

    #[test]
    fn test_scan_stages_good_files_and_reports_bad_ones() {
        let (_dir, conn, dirs) = setup();
        std::fs::write(dirs.inbox.join("jan.csv"), GOOD).unwrap();
        std::fs::write(dirs.inbox.join("junk.csv"), BROKEN).unwrap();

        let result = scan(&conn, &dirs, &rules(), options(2)).unwrap();
        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.successful, 1);
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.errors[0].filename, "junk.csv");
        assert_eq!(result.processed[0].transaction_count, 2);
        assert_eq!(result.processed[0].parser.as_deref(), Some("generic_csv"));

        assert!(dirs.queue.join("jan.csv").exists());
        assert!(dirs.failed.join("junk.csv").exists());
        let history = list_history(&conn, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HistoryStatus::Failed);
    }

    #[test]
    fn test_rescanning_same_content_is_skipped() {
        let (_dir, conn, dirs) = setup();
        std::fs::write(dirs.inbox.join("jan.csv"), GOOD).unwrap();
        scan(&conn, &dirs, &rules(), options(1)).unwrap();

        std::fs::write(dirs.inbox.join("jan-copy.csv"), GOOD).unwrap();
        let again = scan(&conn, &dirs, &rules(), options(1)).unwrap();
        assert_eq!(again.summary.skipped, 1);
        assert_eq!(again.summary.failed, 0);
        assert!(again.errors.is_empty());
        assert_eq!(list_queue(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_identical_files_in_one_sweep_make_one_batch() {
        let (_dir, conn, dirs) = setup();
        std::fs::write(dirs.inbox.join("a.csv"), GOOD).unwrap();
        std::fs::write(dirs.inbox.join("b.csv"), GOOD).unwrap();
        let result = scan(&conn, &dirs, &rules(), options(4)).unwrap();
        assert_eq!(result.summary.successful, 1);
        assert_eq!(result.summary.skipped, 1);
    }

    #[test]
    fn test_parallel_scan_keeps_file_order() {
        let (_dir, conn, dirs) = setup();
        for i in 1..=5 {
            let content = format!("date,description,amount\n2025-01-0{i},Shop {i},-{i}.00\n");
            std::fs::write(dirs.inbox.join(format!("f{i}.csv")), content).unwrap();
        }
        let result = scan(&conn, &dirs, &rules(), options(3)).unwrap();
        assert_eq!(result.summary.successful, 5);
        let names: Vec<_> = result.processed.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["f1.csv", "f2.csv", "f3.csv", "f4.csv", "f5.csv"]);
    }

    #[test]
    fn test_panicking_parse_worker_fails_its_chunk() {
        let files: Vec<_> = (1..=4)
            .map(|i| {
                let name = format!("f{i}.csv");
                let raw = RawFile::from_bytes(&name, GOOD.as_bytes().to_vec(), None);
                (PathBuf::from(name), raw)
            })
            .collect();
        let parsed = parse_parallel(&files, 2, |raw| {
            if raw.filename == "f1.csv" {
                panic!("parser bug");
            }
            parse_and_stage(raw, &[])
        });
        assert_eq!(parsed.len(), 4);
        assert!(matches!(parsed[0], Err(TallyError::MalformedFile(_))));
        assert!(matches!(parsed[1], Err(TallyError::MalformedFile(_))));
        assert_eq!(parsed[2].as_ref().unwrap().1.len(), 2);
        assert_eq!(parsed[3].as_ref().unwrap().1.len(), 2);
    }

    #[test]
    fn test_reset_then_rescan_reproduces_batches() {
        let (_dir, conn, dirs) = setup();
        std::fs::write(dirs.inbox.join("jan.csv"), GOOD).unwrap();
        std::fs::write(dirs.inbox.join("feb.csv"), OTHER).unwrap();
        std::fs::write(dirs.inbox.join("junk.csv"), BROKEN).unwrap();
        let rules = rules();

        scan(&conn, &dirs, &rules, options(2)).unwrap();
        let before: Vec<_> = list_queue(&conn)
            .unwrap()
            .into_iter()
            .map(|b| {
                let batch = load_batch(&conn, b.id).unwrap();
                let rows: Vec<_> = batch
                    .transactions
                    .iter()
                    .map(|t| (t.temp_id.clone(), t.category_id, t.confidence))
                    .collect();
                (batch.file_hash, rows)
            })
            .collect();

        let reset_result = reset(&conn, &dirs, Duration::from_secs(30)).unwrap();
        assert_eq!(reset_result.deleted_batches, 2);
        assert_eq!(reset_result.deleted_imports, 1);
        assert_eq!(reset_result.moved_to_inbox, 3);
        assert!(reset_result.db_error.is_none());
        assert!(list_queue(&conn).unwrap().is_empty());

        let rescan = scan(&conn, &dirs, &rules, options(2)).unwrap();
        assert_eq!(rescan.summary.successful, 2);
        assert_eq!(rescan.summary.failed, 1);
        let after: Vec<_> = list_queue(&conn)
            .unwrap()
            .into_iter()
            .map(|b| {
                let batch = load_batch(&conn, b.id).unwrap();
                let rows: Vec<_> = batch
                    .transactions
                    .iter()
                    .map(|t| (t.temp_id.clone(), t.category_id, t.confidence))
                    .collect();
                (batch.file_hash, rows)
            })
            .collect();
        let mut before = before;
        let mut after = after;
        before.sort_by(|a, b| a.0.cmp(&b.0));
        after.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(before, after);
    }

    #[test]
    fn test_reset_reports_locked_database_and_can_be_rerun() {
        let (dir, conn, dirs) = setup();
        std::fs::write(dirs.inbox.join("jan.csv"), GOOD).unwrap();
        scan(&conn, &dirs, &rules(), options(1)).unwrap();

        let blocker = get_connection(&dir.path().join("tally.db")).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();
        let blocked = reset(&conn, &dirs, Duration::from_millis(50)).unwrap();
        assert!(blocked.db_error.is_some());
        assert_eq!(blocked.deleted_batches, 0);
        blocker.execute_batch("ROLLBACK").unwrap();

        let retry = reset(&conn, &dirs, Duration::from_secs(5)).unwrap();
        assert!(retry.db_error.is_none());
        assert_eq!(retry.deleted_batches, 1);
        assert!(dirs.inbox.join("jan.csv").exists());
    }

    #[test]
    fn test_stage_file_refuses_known_fingerprint() {
        let (dir, conn, dirs) = setup();
        let path = dir.path().join("upload.csv");
        std::fs::write(&path, GOOD).unwrap();
        let staged = stage_file(&conn, &dirs, &path, Some("generic_csv"), &rules(), 1.0).unwrap();
        assert_eq!(staged.transaction_count, 2);
        assert!(dirs.queue.join("upload.csv").exists());
        assert!(matches!(
            stage_file(&conn, &dirs, &path, Some("generic_csv"), &rules(), 1.0),
            Err(TallyError::DuplicateFile(_))
        ));
    }

    #[test]
    fn test_stage_file_unknown_type_is_unsupported() {
        let (dir, conn, dirs) = setup();
        let path = dir.path().join("upload.csv");
        std::fs::write(&path, GOOD).unwrap();
        assert!(matches!(
            stage_file(&conn, &dirs, &path, Some("ofx"), &rules(), 1.0),
            Err(TallyError::UnsupportedFormat(_))
        ));
    }
}
