use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use csv::StringRecord;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::{AMOUNT_MAX_DIGITS, AMOUNT_SCALE, DATE_FORMAT};

/// Recoverable problem with a single input row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("missing required column '{0}'")]
    MissingColumn(String),
    #[error("invalid integer literal for {column}: '{value}'")]
    InvalidInteger { column: String, value: String },
    #[error("invalid decimal literal for {column}: '{value}'")]
    InvalidDecimal { column: String, value: String },
    #[error("{column} '{value}' does not fit in 10 digits with 2 decimal places")]
    AmountOutOfRange { column: String, value: String },
    #[error("{column} '{value}' does not match format YYYY-MM-DD")]
    InvalidDate { column: String, value: String },
    #[error("expected at most {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("Claim with id={0} not found.")]
    ClaimNotFound(i64),
    #[error("duplicate claim id={0} in input")]
    DuplicateClaim(i64),
    #[error("duplicate detail for claim id={0} in input")]
    DuplicateDetail(i64),
}

/// Column name to position lookup built from a CSV header row.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
    width: usize,
}

impl HeaderIndex {
    pub fn new(headers: &StringRecord) -> Self {
        let mut positions = HashMap::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            // first occurrence wins for repeated headers
            positions.entry(name.trim().to_string()).or_insert(idx);
        }
        Self {
            positions,
            width: headers.len(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    /// Required columns absent from the header, in the order given.
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|column| !self.contains(column))
            .collect()
    }

    /// Short records are accepted and read as missing trailing fields;
    /// records wider than the header are not.
    fn check_width(&self, record: &StringRecord) -> Result<(), RowError> {
        if record.len() > self.width {
            return Err(RowError::FieldCount {
                expected: self.width,
                found: record.len(),
            });
        }
        Ok(())
    }

    fn get<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.positions
            .get(column)
            .and_then(|&idx| record.get(idx))
    }

    fn require<'r>(&self, record: &'r StringRecord, column: &str) -> Result<&'r str, RowError> {
        self.get(record, column)
            .ok_or_else(|| RowError::MissingColumn(column.to_string()))
    }
}

/// A claims row after type coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    pub id: i64,
    pub patient_name: String,
    pub billed_amount: Decimal,
    pub paid_amount: Decimal,
    pub status: String,
    pub insurer_name: String,
    pub discharge_date: NaiveDate,
}

/// A details row after type coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRecord {
    pub claim_id: i64,
    pub cpt_codes: String,
    pub denial_reason: String,
}

impl ClaimRecord {
    pub fn parse(headers: &HeaderIndex, record: &StringRecord) -> Result<Self, RowError> {
        headers.check_width(record)?;
        let id = parse_integer("id", headers.require(record, "id")?)?;
        let billed_amount =
            parse_amount("billed_amount", headers.require(record, "billed_amount")?)?;
        let paid_amount = parse_amount("paid_amount", headers.require(record, "paid_amount")?)?;
        let discharge_date =
            parse_date("discharge_date", headers.require(record, "discharge_date")?)?;

        Ok(ClaimRecord {
            id,
            patient_name: headers.require(record, "patient_name")?.to_string(),
            billed_amount,
            paid_amount,
            // upper-cased only; membership in ClaimStatus is not enforced
            status: headers.require(record, "status")?.to_uppercase(),
            insurer_name: headers.require(record, "insurer_name")?.to_string(),
            discharge_date,
        })
    }
}

impl DetailRecord {
    pub fn parse(headers: &HeaderIndex, record: &StringRecord) -> Result<Self, RowError> {
        headers.check_width(record)?;
        let claim_id = parse_integer("claim_id", headers.require(record, "claim_id")?)?;
        Ok(DetailRecord {
            claim_id,
            cpt_codes: headers.require(record, "cpt_codes")?.to_string(),
            denial_reason: headers
                .get(record, "denial_reason")
                .unwrap_or_default()
                .to_string(),
        })
    }
}

pub fn parse_integer(column: &str, raw: &str) -> Result<i64, RowError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| RowError::InvalidInteger {
            column: column.to_string(),
            value: raw.to_string(),
        })
}

/// Parses a money value and rounds it half-to-even to two places.
pub fn parse_amount(column: &str, raw: &str) -> Result<Decimal, RowError> {
    let value = Decimal::from_str(raw.trim()).map_err(|_| RowError::InvalidDecimal {
        column: column.to_string(),
        value: raw.to_string(),
    })?;
    let mut rounded = value.round_dp(AMOUNT_SCALE);
    let limit = Decimal::from(10_i64.pow(AMOUNT_MAX_DIGITS - AMOUNT_SCALE));
    if rounded.abs() >= limit {
        return Err(RowError::AmountOutOfRange {
            column: column.to_string(),
            value: raw.to_string(),
        });
    }
    rounded.rescale(AMOUNT_SCALE);
    Ok(rounded)
}

pub fn parse_date(column: &str, raw: &str) -> Result<NaiveDate, RowError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| RowError::InvalidDate {
        column: column.to_string(),
        value: raw.to_string(),
    })
}
