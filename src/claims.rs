//! Read and annotate operations used by the review screens.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;

use crate::model::{decode_amount, decode_date, Claim, ClaimDetail, Note};
use crate::time::now_ms;
use crate::{AppError, AppResult};

const CLAIM_SELECT: &str = "SELECT id, patient_name, billed_amount, paid_amount, status, insurer_name, discharge_date, is_flagged, flagged_by, flagged_at, created_at, updated_at FROM claims";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    PatientName,
    InsurerName,
    Status,
    BilledAmount,
    PaidAmount,
    Underpayment,
    DischargeDate,
    IsFlagged,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::PatientName => "patient_name",
            SortField::InsurerName => "insurer_name",
            SortField::Status => "status",
            SortField::BilledAmount => "billed_amount",
            SortField::PaidAmount => "paid_amount",
            SortField::Underpayment => "underpayment",
            SortField::DischargeDate => "discharge_date",
            SortField::IsFlagged => "is_flagged",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "id" => Some(SortField::Id),
            "patient_name" => Some(SortField::PatientName),
            "insurer_name" => Some(SortField::InsurerName),
            "status" => Some(SortField::Status),
            "billed_amount" => Some(SortField::BilledAmount),
            "paid_amount" => Some(SortField::PaidAmount),
            "underpayment" => Some(SortField::Underpayment),
            "discharge_date" => Some(SortField::DischargeDate),
            "is_flagged" => Some(SortField::IsFlagged),
            _ => None,
        }
    }

    // amounts are stored as decimal text
    fn sql_expr(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::PatientName => "patient_name",
            SortField::InsurerName => "insurer_name",
            SortField::Status => "status",
            SortField::BilledAmount => "CAST(billed_amount AS REAL)",
            SortField::PaidAmount => "CAST(paid_amount AS REAL)",
            SortField::Underpayment => {
                "(CAST(billed_amount AS REAL) - CAST(paid_amount AS REAL))"
            }
            SortField::DischargeDate => "discharge_date",
            SortField::IsFlagged => "is_flagged",
        }
    }
}

/// A `field` / `-field` sort parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub descending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec {
            field: SortField::DischargeDate,
            descending: true,
        }
    }
}

impl SortSpec {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        SortField::parse(name).map(|field| SortSpec { field, descending })
    }

    /// Sort to apply when `field` is picked while `current` is active:
    /// the same field flips direction, a new field starts ascending.
    pub fn toggle(current: Option<&str>, field: SortField) -> Self {
        match current.and_then(SortSpec::parse) {
            Some(active) if active.field == field => SortSpec {
                field,
                descending: !active.descending,
            },
            _ => SortSpec {
                field,
                descending: false,
            },
        }
    }

    pub fn as_param(&self) -> String {
        if self.descending {
            format!("-{}", self.field.as_str())
        } else {
            self.field.as_str().to_string()
        }
    }

    fn order_clause(&self) -> String {
        let dir = if self.descending { "DESC" } else { "ASC" };
        format!("{} {dir}, id ASC", self.field.sql_expr())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimQuery {
    /// Case-insensitive substring over patient and insurer names.
    pub search: Option<String>,
    pub status: Option<String>,
    pub flagged: Option<bool>,
    /// Unknown fields fall back to the default ordering.
    pub sort: Option<String>,
}

/// A claim together with its detail record and notes, newest note first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimView {
    pub claim: Claim,
    pub detail: Option<ClaimDetail>,
    pub notes: Vec<Note>,
}

fn claim_from_row(row: &SqliteRow) -> AppResult<Claim> {
    let billed: String = row.try_get("billed_amount")?;
    let paid: String = row.try_get("paid_amount")?;
    let discharge: String = row.try_get("discharge_date")?;
    Ok(Claim {
        id: row.try_get("id")?,
        patient_name: row.try_get("patient_name")?,
        billed_amount: decode_amount("billed_amount", &billed)?,
        paid_amount: decode_amount("paid_amount", &paid)?,
        status: row.try_get("status")?,
        insurer_name: row.try_get("insurer_name")?,
        discharge_date: decode_date(&discharge)?,
        is_flagged: row.try_get("is_flagged")?,
        flagged_by: row.try_get("flagged_by")?,
        flagged_at: row.try_get("flagged_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn note_from_row(row: &SqliteRow) -> AppResult<Note> {
    Ok(Note {
        id: row.try_get("id")?,
        claim_id: row.try_get("claim_id")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        user_id: row.try_get("user_id")?,
    })
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn claim_not_found(id: i64) -> AppError {
    AppError::new("CLAIMS/NOT_FOUND", "Claim not found").with_context("claim_id", id.to_string())
}

pub async fn list_claims(pool: &SqlitePool, query: &ClaimQuery) -> AppResult<Vec<Claim>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(CLAIM_SELECT);
    qb.push(" WHERE 1 = 1");

    if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", escape_like(term));
        qb.push(" AND (patient_name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR insurer_name LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    if let Some(status) = query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND status = ").push_bind(status.to_uppercase());
    }
    if let Some(flagged) = query.flagged {
        qb.push(" AND is_flagged = ").push_bind(flagged);
    }

    let sort = query
        .sort
        .as_deref()
        .and_then(SortSpec::parse)
        .unwrap_or_default();
    qb.push(" ORDER BY ").push(sort.order_clause());

    let rows = qb.build().fetch_all(pool).await.map_err(|err| {
        AppError::from(err).with_context("operation", "list_claims")
    })?;
    rows.iter().map(claim_from_row).collect()
}

pub async fn get_claim(pool: &SqlitePool, id: i64) -> AppResult<Option<ClaimView>> {
    let row = sqlx::query(&format!("{CLAIM_SELECT} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let claim = claim_from_row(&row)?;

    let detail = sqlx::query(
        "SELECT claim_id, cpt_codes, denial_reason FROM claim_details WHERE claim_id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .map(|row| -> AppResult<ClaimDetail> {
        Ok(ClaimDetail {
            claim_id: row.try_get("claim_id")?,
            cpt_codes: row.try_get("cpt_codes")?,
            denial_reason: row.try_get("denial_reason")?,
        })
    })
    .transpose()?;

    let notes = sqlx::query(
        "SELECT id, claim_id, note, created_at, user_id FROM notes WHERE claim_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(note_from_row)
    .collect::<AppResult<Vec<_>>>()?;

    Ok(Some(ClaimView {
        claim,
        detail,
        notes,
    }))
}

/// Flips the review flag. Flagging records who and when; unflagging clears both.
pub async fn toggle_flag(pool: &SqlitePool, id: i64, user_id: Option<i64>) -> AppResult<Claim> {
    let now = now_ms();
    let res = sqlx::query(
        "UPDATE claims SET
           is_flagged = CASE is_flagged WHEN 0 THEN 1 ELSE 0 END,
           flagged_by = CASE is_flagged WHEN 0 THEN ? ELSE NULL END,
           flagged_at = CASE is_flagged WHEN 0 THEN ? ELSE NULL END,
           updated_at = ?
         WHERE id = ?",
    )
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "toggle_flag"))?;
    if res.rows_affected() == 0 {
        return Err(claim_not_found(id));
    }

    let row = sqlx::query(&format!("{CLAIM_SELECT} WHERE id = ?"))
        .bind(id)
        .fetch_one(pool)
        .await?;
    let claim = claim_from_row(&row)?;
    info!(
        target: "claims",
        event = "claim_flag_toggled",
        claim_id = id,
        flagged = claim.is_flagged,
        user_id = ?user_id
    );
    Ok(claim)
}

pub async fn add_note(
    pool: &SqlitePool,
    claim_id: i64,
    user_id: Option<i64>,
    text: &str,
) -> AppResult<Note> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::new("NOTES/INVALID", "Note text must not be blank")
            .with_context("claim_id", claim_id.to_string()));
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM claims WHERE id = ?")
        .bind(claim_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(claim_not_found(claim_id));
    }

    let now = now_ms();
    let res = sqlx::query("INSERT INTO notes (claim_id, note, created_at, user_id) VALUES (?, ?, ?, ?)")
        .bind(claim_id)
        .bind(text)
        .bind(now)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "add_note"))?;

    info!(target: "claims", event = "note_added", claim_id, user_id = ?user_id);
    Ok(Note {
        id: res.last_insert_rowid(),
        claim_id,
        note: text.to_string(),
        created_at: now,
        user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_spec_parses_direction() {
        let parsed = SortSpec::parse("-billed_amount").expect("known field");
        assert_eq!(parsed.field, SortField::BilledAmount);
        assert!(parsed.descending);
        assert!(SortSpec::parse("nope").is_none());
        assert_eq!(SortSpec::default().as_param(), "-discharge_date");
    }

    #[test]
    fn toggle_flips_same_field_and_resets_new_field() {
        assert_eq!(
            SortSpec::toggle(Some("billed_amount"), SortField::BilledAmount).as_param(),
            "-billed_amount"
        );
        assert_eq!(
            SortSpec::toggle(Some("-billed_amount"), SortField::BilledAmount).as_param(),
            "billed_amount"
        );
        assert_eq!(
            SortSpec::toggle(Some("-billed_amount"), SortField::PatientName).as_param(),
            "patient_name"
        );
        assert_eq!(
            SortSpec::toggle(None, SortField::Status).as_param(),
            "status"
        );
    }

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
