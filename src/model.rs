//! Claim, detail, note and user records as persisted in SQLite.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::time::to_date;
use crate::{AppError, AppResult};

/// Calendar format shared by CSV input and storage.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Fractional digits kept for money columns.
pub const AMOUNT_SCALE: u32 = 2;
/// Total significant digits allowed for money columns.
pub const AMOUNT_MAX_DIGITS: u32 = 10;

const NOTE_PREVIEW_CHARS: usize = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimStatus {
    #[serde(rename = "PAID")]
    Paid,
    #[serde(rename = "DENIED")]
    Denied,
    #[serde(rename = "UNDER REVIEW")]
    UnderReview,
}

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 3] = [
        ClaimStatus::Paid,
        ClaimStatus::Denied,
        ClaimStatus::UnderReview,
    ];

    /// Stored value of the status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Paid => "PAID",
            ClaimStatus::Denied => "DENIED",
            ClaimStatus::UnderReview => "UNDER REVIEW",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClaimStatus::Paid => "Paid",
            ClaimStatus::Denied => "Denied",
            ClaimStatus::UnderReview => "Under Review",
        }
    }

    /// Case-insensitive lookup. Returns `None` for values outside the set.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "PAID" => Some(ClaimStatus::Paid),
            "DENIED" => Some(ClaimStatus::Denied),
            "UNDER REVIEW" | "UNDER_REVIEW" => Some(ClaimStatus::UnderReview),
            _ => None,
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: i64,
    pub patient_name: String,
    pub billed_amount: Decimal,
    pub paid_amount: Decimal,
    /// Upper-cased status exactly as loaded; may fall outside [`ClaimStatus`].
    pub status: String,
    pub insurer_name: String,
    pub discharge_date: NaiveDate,
    pub is_flagged: bool,
    pub flagged_by: Option<i64>,
    pub flagged_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Claim {
    /// Amount billed but not paid. Always derived, never stored.
    pub fn underpayment(&self) -> Decimal {
        self.billed_amount - self.paid_amount
    }

    pub fn status_kind(&self) -> Option<ClaimStatus> {
        ClaimStatus::parse(&self.status)
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Claim {} for {}", self.id, self.patient_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimDetail {
    pub claim_id: i64,
    pub cpt_codes: String,
    pub denial_reason: Option<String>,
}

impl ClaimDetail {
    /// Individual CPT codes, trimmed, empty entries dropped.
    pub fn cpt_code_list(&self) -> Vec<&str> {
        self.cpt_codes
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .collect()
    }
}

impl fmt::Display for ClaimDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Details for Claim {}", self.claim_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub claim_id: i64,
    pub note: String,
    pub created_at: i64,
    pub user_id: Option<i64>,
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = if self.note.chars().count() > NOTE_PREVIEW_CHARS {
            let head: String = self.note.chars().take(NOTE_PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.note.clone()
        };
        write!(
            f,
            "Note on {} at {}: {}",
            self.claim_id,
            to_date(self.created_at).format(DATE_FORMAT),
            preview
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: i64,
}

/// Formats an amount the way it is stored: exactly two fractional digits.
pub fn format_amount(amount: Decimal) -> String {
    let mut scaled = amount.round_dp(AMOUNT_SCALE);
    scaled.rescale(AMOUNT_SCALE);
    scaled.to_string()
}

pub(crate) fn decode_amount(column: &str, raw: &str) -> AppResult<Decimal> {
    Decimal::from_str(raw).map_err(|err| {
        AppError::new("CLAIMS/DECODE", "Stored amount is not a decimal")
            .with_context("column", column)
            .with_context("value", raw)
            .with_cause(AppError::from(err.to_string()))
    })
}

pub(crate) fn decode_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|err| {
        AppError::new("CLAIMS/DECODE", "Stored discharge date is malformed")
            .with_context("value", raw)
            .with_cause(AppError::from(err.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claim() -> Claim {
        Claim {
            id: 1,
            patient_name: "John Doe".into(),
            billed_amount: Decimal::new(100_000, 2),
            paid_amount: Decimal::new(80_000, 2),
            status: "PAID".into(),
            insurer_name: "Acme Insurance".into(),
            discharge_date: NaiveDate::from_ymd_opt(2025, 9, 1).expect("valid date"),
            is_flagged: false,
            flagged_by: None,
            flagged_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn claim_display() {
        assert_eq!(sample_claim().to_string(), "Claim 1 for John Doe");
    }

    #[test]
    fn underpayment_is_billed_minus_paid() {
        assert_eq!(sample_claim().underpayment(), Decimal::new(20_000, 2));
    }

    #[test]
    fn out_of_set_status_has_no_kind() {
        let mut claim = sample_claim();
        assert_eq!(claim.status_kind(), Some(ClaimStatus::Paid));
        claim.status = "PENDING".into();
        assert_eq!(claim.status_kind(), None);
    }

    #[test]
    fn status_parse_accepts_both_spellings_of_under_review() {
        assert_eq!(ClaimStatus::parse("under review"), Some(ClaimStatus::UnderReview));
        assert_eq!(ClaimStatus::parse("UNDER_REVIEW"), Some(ClaimStatus::UnderReview));
        assert_eq!(ClaimStatus::UnderReview.as_str(), "UNDER REVIEW");
    }

    #[test]
    fn detail_display_and_codes() {
        let detail = ClaimDetail {
            claim_id: 1,
            cpt_codes: "99214, 99215,,".into(),
            denial_reason: None,
        };
        assert_eq!(detail.to_string(), "Details for Claim 1");
        assert_eq!(detail.cpt_code_list(), vec!["99214", "99215"]);
    }

    #[test]
    fn note_display_truncates_long_text() {
        let note = Note {
            id: 1,
            claim_id: 1,
            note: "x".repeat(80),
            created_at: 1_756_684_800_000,
            user_id: None,
        };
        let rendered = note.to_string();
        assert!(rendered.starts_with("Note on 1 at 2025-09-01: "));
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.matches('x').count(), 75);
    }

    #[test]
    fn format_amount_pads_and_rounds_half_even() {
        assert_eq!(format_amount(Decimal::new(5, 0)), "5.00");
        assert_eq!(format_amount(Decimal::new(12_005, 3)), "12.00");
        assert_eq!(format_amount(Decimal::new(12_015, 3)), "12.02");
    }
}
