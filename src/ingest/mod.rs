pub mod execute;
pub mod report;
pub mod rows;
pub mod writer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use execute::{
    ClaimDataIngestor, IngestError, IngestOptions, IngestOutcome, IngestRowError, IngestStage,
    LoadSummary,
};
pub use report::write_ingest_report;
pub use rows::{ClaimRecord, DetailRecord, HeaderIndex, RowError};
pub use writer::{WriteError, WriteOutcome};

pub const CLAIM_COLUMNS: &[&str] = &[
    "id",
    "patient_name",
    "billed_amount",
    "paid_amount",
    "status",
    "insurer_name",
    "discharge_date",
];
pub const DETAIL_COLUMNS: &[&str] = &["claim_id", "cpt_codes"];

/// How existing claims are reconciled with incoming rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Insert new rows, leave existing ones untouched.
    #[default]
    Append,
    /// Purge every claim first, then load the files fresh.
    Overwrite,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Append => "append",
            LoadMode::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(LoadMode::Append),
            "overwrite" => Ok(LoadMode::Overwrite),
            other => Err(format!(
                "unknown load mode '{other}' (expected append or overwrite)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_mode_parses_case_insensitively() {
        assert_eq!("Overwrite".parse::<LoadMode>(), Ok(LoadMode::Overwrite));
        assert_eq!("append".parse::<LoadMode>(), Ok(LoadMode::Append));
        assert!("merge".parse::<LoadMode>().is_err());
        assert_eq!(LoadMode::default(), LoadMode::Append);
    }
}
