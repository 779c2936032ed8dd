use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{error, info, warn};

use super::rows::{ClaimRecord, DetailRecord, HeaderIndex, RowError};
use super::writer::{self, WriteError, WriteOutcome};
use super::{LoadMode, CLAIM_COLUMNS, DETAIL_COLUMNS};
use crate::db;

/// Where a run currently is. A failed run is rolled back, so its writes are
/// discarded whatever stage it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    NotStarted,
    Purging,
    LoadingClaims,
    LoadingDetails,
    Complete,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::NotStarted => "not_started",
            IngestStage::Purging => "purging",
            IngestStage::LoadingClaims => "loading_claims",
            IngestStage::LoadingDetails => "loading_details",
            IngestStage::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub claims_csv: PathBuf,
    pub details_csv: PathBuf,
    pub delimiter: u8,
    pub mode: LoadMode,
}

impl IngestOptions {
    pub fn new(claims_csv: impl Into<PathBuf>, details_csv: impl Into<PathBuf>) -> Self {
        Self {
            claims_csv: claims_csv.into(),
            details_csv: details_csv.into(),
            delimiter: b',',
            mode: LoadMode::Append,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Per-run counters. Neither load mode rewrites an existing row, so the
/// `*_updated` counters stay 0; they are kept for a stable report shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub claims_created: u64,
    pub claims_updated: u64,
    pub claims_skipped: u64,
    pub details_created: u64,
    pub details_updated: u64,
    pub details_skipped: u64,
}

impl LoadSummary {
    fn record_claim(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.claims_created += 1,
            WriteOutcome::Skipped => self.claims_skipped += 1,
        }
    }

    fn record_detail(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.details_created += 1,
            WriteOutcome::Skipped => self.details_skipped += 1,
        }
    }

    /// Counter names and values in report order.
    pub fn entries(&self) -> [(&'static str, u64); 6] {
        [
            ("claims_created", self.claims_created),
            ("claims_updated", self.claims_updated),
            ("claims_skipped", self.claims_skipped),
            ("details_created", self.details_created),
            ("details_updated", self.details_updated),
            ("details_skipped", self.details_skipped),
        ]
    }
}

/// A rejected row, located by file name and row number (header is row 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRowError {
    pub file: String,
    pub row: u64,
    pub message: String,
}

impl std::fmt::Display for IngestRowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error in {} at row {}: {}", self.file, self.row, self.message)
    }
}

/// Result of a committed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub summary: LoadSummary,
    pub errors: Vec<IngestRowError>,
}

impl IngestOutcome {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Failures that abort the run. Nothing is committed when one is returned.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("File not found at: {}", .path.display())]
    FileNotFound { path: PathBuf },
    #[error("failed to read {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Loads a claims file and its details file in one transaction.
#[derive(Debug, Clone)]
pub struct ClaimDataIngestor {
    options: IngestOptions,
}

impl ClaimDataIngestor {
    pub fn new(options: IngestOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub async fn run(&self, pool: &SqlitePool) -> Result<IngestOutcome, IngestError> {
        for path in [&self.options.claims_csv, &self.options.details_csv] {
            if !path.is_file() {
                error!(target: "claims", event = "ingest_file_missing", path = %path.display());
                return Err(IngestError::FileNotFound { path: path.clone() });
            }
        }

        let started = Instant::now();
        info!(
            target: "claims",
            event = "ingest_start",
            mode = self.options.mode.as_str(),
            claims_csv = %self.options.claims_csv.display(),
            details_csv = %self.options.details_csv.display(),
            delimiter = %char::from(self.options.delimiter)
        );

        let options = self.options.clone();
        let stage = StageTracker::default();
        let tracker = stage.clone();
        let result = db::run_in_tx(pool, move |tx| {
            Box::pin(async move { run_stages(&options, &tracker, tx).await })
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(
                target: "claims",
                event = "ingest_done",
                duration_ms,
                claims_created = outcome.summary.claims_created,
                claims_skipped = outcome.summary.claims_skipped,
                details_created = outcome.summary.details_created,
                details_skipped = outcome.summary.details_skipped,
                row_errors = outcome.errors.len()
            ),
            Err(err) => error!(
                target: "claims",
                event = "ingest_failed",
                duration_ms,
                stage = stage.current().as_str(),
                error = %err
            ),
        }
        result
    }
}

/// Shares the current stage between the transaction body and the caller,
/// which only sees the error once the body has returned.
#[derive(Debug, Clone)]
struct StageTracker(Arc<Mutex<IngestStage>>);

impl Default for StageTracker {
    fn default() -> Self {
        StageTracker(Arc::new(Mutex::new(IngestStage::NotStarted)))
    }
}

impl StageTracker {
    fn enter(&self, stage: IngestStage) {
        info!(target: "claims", event = "ingest_stage", stage = stage.as_str());
        let mut guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = stage;
    }

    fn current(&self) -> IngestStage {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_stages(
    options: &IngestOptions,
    stage: &StageTracker,
    tx: &mut Transaction<'static, Sqlite>,
) -> Result<IngestOutcome, IngestError> {
    let mut outcome = IngestOutcome::default();

    if options.mode == LoadMode::Overwrite {
        stage.enter(IngestStage::Purging);
        let purged = writer::purge_claims(&mut **tx).await?;
        info!(target: "claims", event = "ingest_purged", claims = purged);
    }

    stage.enter(IngestStage::LoadingClaims);
    load_claims(options, tx, &mut outcome).await?;

    stage.enter(IngestStage::LoadingDetails);
    load_details(options, tx, &mut outcome).await?;

    stage.enter(IngestStage::Complete);
    Ok(outcome)
}

async fn load_claims(
    options: &IngestOptions,
    tx: &mut Transaction<'static, Sqlite>,
    outcome: &mut IngestOutcome,
) -> Result<(), IngestError> {
    let path = options.claims_csv.as_path();
    let (mut reader, headers) = open_reader(path, options.delimiter, CLAIM_COLUMNS)?;
    let file = file_label(path);

    for (idx, result) in reader.records().enumerate() {
        let row = idx as u64 + 2;
        let record = match result {
            Ok(record) => record,
            Err(source) if source.is_io_error() => {
                return Err(IngestError::Csv {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(source) => {
                reject(outcome, &file, row, describe_record_error(&source));
                continue;
            }
        };

        let parsed = match ClaimRecord::parse(&headers, &record) {
            Ok(parsed) => parsed,
            Err(err) => {
                reject(outcome, &file, row, err);
                continue;
            }
        };

        match writer::write_claim(&mut **tx, &parsed, options.mode).await {
            Ok(written) => outcome.summary.record_claim(written),
            Err(WriteError::Row(err)) => reject(outcome, &file, row, err),
            Err(WriteError::Database(err)) => return Err(err.into()),
        }
    }
    Ok(())
}

async fn load_details(
    options: &IngestOptions,
    tx: &mut Transaction<'static, Sqlite>,
    outcome: &mut IngestOutcome,
) -> Result<(), IngestError> {
    let path = options.details_csv.as_path();
    let (mut reader, headers) = open_reader(path, options.delimiter, DETAIL_COLUMNS)?;
    let file = file_label(path);

    for (idx, result) in reader.records().enumerate() {
        let row = idx as u64 + 2;
        let record = match result {
            Ok(record) => record,
            Err(source) if source.is_io_error() => {
                return Err(IngestError::Csv {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(source) => {
                reject(outcome, &file, row, describe_record_error(&source));
                continue;
            }
        };

        let parsed = match DetailRecord::parse(&headers, &record) {
            Ok(parsed) => parsed,
            Err(err) => {
                reject(outcome, &file, row, err);
                continue;
            }
        };

        match writer::write_detail(&mut **tx, &parsed, options.mode).await {
            Ok(written) => outcome.summary.record_detail(written),
            Err(WriteError::Row(err)) => reject(outcome, &file, row, err),
            Err(WriteError::Database(err)) => return Err(err.into()),
        }
    }
    Ok(())
}

fn open_reader(
    path: &Path,
    delimiter: u8,
    required: &[&str],
) -> Result<(csv::Reader<File>, HeaderIndex), IngestError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|source| classify_open_error(path, source))?;

    let headers = reader
        .headers()
        .map(HeaderIndex::new)
        .map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let missing = headers.missing(required);
    if !missing.is_empty() {
        warn!(
            target: "claims",
            event = "ingest_header_incomplete",
            path = %path.display(),
            missing = %missing.join(",")
        );
    }
    Ok((reader, headers))
}

fn classify_open_error(path: &Path, source: csv::Error) -> IngestError {
    let not_found = matches!(
        source.kind(),
        csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound
    );
    if not_found {
        IngestError::FileNotFound {
            path: path.to_path_buf(),
        }
    } else {
        IngestError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Row error for a record the csv reader could not decode. The reader's own
/// record/line position is dropped; the caller reports the row number.
fn describe_record_error(source: &csv::Error) -> RowError {
    match source.kind() {
        csv::ErrorKind::UnequalLengths { expected_len, len, .. } => RowError::FieldCount {
            expected: *expected_len as usize,
            found: *len as usize,
        },
        csv::ErrorKind::Utf8 { err, .. } => {
            RowError::Malformed(format!("field {} is not valid UTF-8", err.field() + 1))
        }
        _ => RowError::Malformed("unreadable record".to_string()),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn reject(outcome: &mut IngestOutcome, file: &str, row: u64, err: RowError) {
    warn!(target: "claims", event = "ingest_row_error", file, row, error = %err);
    outcome.errors.push(IngestRowError {
        file: file.to_string(),
        row,
        message: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_error_display_names_file_and_row() {
        let err = IngestRowError {
            file: "claims.csv".into(),
            row: 3,
            message: "invalid integer literal for id: 'bad-id'".into(),
        };
        assert_eq!(
            err.to_string(),
            "Error in claims.csv at row 3: invalid integer literal for id: 'bad-id'"
        );
    }

    #[test]
    fn summary_counts_by_outcome() {
        let mut summary = LoadSummary::default();
        summary.record_claim(WriteOutcome::Created);
        summary.record_claim(WriteOutcome::Skipped);
        summary.record_detail(WriteOutcome::Created);
        assert_eq!(summary.claims_updated, 0);
        assert_eq!(summary.claims_created, 1);
        assert_eq!(summary.claims_skipped, 1);
        assert_eq!(summary.details_created, 1);
        assert_eq!(summary.entries()[0], ("claims_created", 1));
        assert_eq!(summary.entries()[5], ("details_skipped", 0));
    }

    #[test]
    fn file_label_uses_the_file_name() {
        assert_eq!(file_label(Path::new("/tmp/in/claims.csv")), "claims.csv");
    }

    #[test]
    fn missing_file_is_classified_as_not_found() {
        let err = ReaderBuilder::new()
            .from_path("/definitely/not/here.csv")
            .expect_err("missing file");
        let classified = classify_open_error(Path::new("/definitely/not/here.csv"), err);
        assert!(matches!(classified, IngestError::FileNotFound { .. }));
    }

    #[test]
    fn stage_tracker_reports_the_last_entered_stage() {
        let tracker = StageTracker::default();
        assert_eq!(tracker.current(), IngestStage::NotStarted);
        let shared = tracker.clone();
        shared.enter(IngestStage::LoadingDetails);
        assert_eq!(tracker.current(), IngestStage::LoadingDetails);
    }

    #[test]
    fn utf8_errors_name_the_field_without_reader_position() {
        let data: &[u8] = b"a,b\n1,\xff\n";
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(data);
        let err = reader
            .records()
            .next()
            .expect("one record")
            .expect_err("invalid utf-8");
        let row_error = describe_record_error(&err);
        assert_eq!(row_error.to_string(), "malformed record: field 2 is not valid UTF-8");
    }
}
