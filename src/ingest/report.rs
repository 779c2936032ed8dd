use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::execute::{IngestOptions, IngestOutcome, IngestRowError, LoadSummary};
use super::LoadMode;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestReportFile<'a> {
    generated_at: String,
    claims_csv: String,
    details_csv: String,
    delimiter: String,
    mode: LoadMode,
    summary: &'a LoadSummary,
    errors: &'a [IngestRowError],
}

/// Writes a timestamped JSON report of a completed run into `reports_dir`.
pub fn write_ingest_report(
    reports_dir: &Path,
    options: &IngestOptions,
    outcome: &IngestOutcome,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let stem = now.format("ingest-%Y%m%d-%H%M%S").to_string();
    let mut path = reports_dir.join(format!("{stem}.json"));
    let mut counter = 1;
    while path.exists() {
        path = reports_dir.join(format!("{stem}_{counter}.json"));
        counter += 1;
    }

    let payload = IngestReportFile {
        generated_at: now.to_rfc3339(),
        claims_csv: options.claims_csv.display().to_string(),
        details_csv: options.details_csv.display().to_string(),
        delimiter: char::from(options.delimiter).to_string(),
        mode: options.mode,
        summary: &outcome.summary,
        errors: &outcome.errors,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize ingest report")?;
    fs::write(&path, json).with_context(|| format!("write ingest report {}", path.display()))?;
    Ok(path)
}
