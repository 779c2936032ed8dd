//! Applies parsed rows to storage under a [`LoadMode`].
//!
//! Every insert runs inside its own savepoint, so a constraint failure on one
//! row rolls back only that row and leaves the surrounding run transaction
//! usable.

use sqlx::{Connection, SqliteConnection};
use thiserror::Error;

use super::rows::{ClaimRecord, DetailRecord, RowError};
use super::LoadMode;
use crate::model::format_amount;
use crate::time::now_ms;

/// What happened to one row. Existing rows are never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Skipped,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Row(#[from] RowError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub async fn write_claim(
    conn: &mut SqliteConnection,
    record: &ClaimRecord,
    mode: LoadMode,
) -> Result<WriteOutcome, WriteError> {
    if mode == LoadMode::Append && claim_exists(conn, record.id).await? {
        return Ok(WriteOutcome::Skipped);
    }

    let now = now_ms();
    let mut sp = conn.begin().await?;
    let res = sqlx::query(
        "INSERT INTO claims (id, patient_name, billed_amount, paid_amount, status, insurer_name, discharge_date, is_flagged, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(record.id)
    .bind(&record.patient_name)
    .bind(format_amount(record.billed_amount))
    .bind(format_amount(record.paid_amount))
    .bind(&record.status)
    .bind(&record.insurer_name)
    .bind(record.discharge_date.format(crate::model::DATE_FORMAT).to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *sp)
    .await;

    match res {
        Ok(_) => {
            sp.commit().await?;
            Ok(WriteOutcome::Created)
        }
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            sp.rollback().await?;
            Err(RowError::DuplicateClaim(record.id).into())
        }
        Err(err) => {
            sp.rollback().await?;
            Err(err.into())
        }
    }
}

pub async fn write_detail(
    conn: &mut SqliteConnection,
    record: &DetailRecord,
    mode: LoadMode,
) -> Result<WriteOutcome, WriteError> {
    if !claim_exists(conn, record.claim_id).await? {
        return Err(RowError::ClaimNotFound(record.claim_id).into());
    }

    if mode == LoadMode::Append && detail_exists(conn, record.claim_id).await? {
        return Ok(WriteOutcome::Skipped);
    }

    let mut sp = conn.begin().await?;
    let res = sqlx::query(
        "INSERT INTO claim_details (claim_id, cpt_codes, denial_reason) VALUES (?, ?, ?)",
    )
    .bind(record.claim_id)
    .bind(&record.cpt_codes)
    .bind(&record.denial_reason)
    .execute(&mut *sp)
    .await;

    match res {
        Ok(_) => {
            sp.commit().await?;
            Ok(WriteOutcome::Created)
        }
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            sp.rollback().await?;
            Err(RowError::DuplicateDetail(record.claim_id).into())
        }
        Err(err) => {
            sp.rollback().await?;
            Err(err.into())
        }
    }
}

/// Deletes every claim. Details and notes go with them through
/// `ON DELETE CASCADE`.
pub async fn purge_claims(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("DELETE FROM claims").execute(&mut *conn).await?;
    Ok(res.rows_affected())
}

async fn claim_exists(conn: &mut SqliteConnection, id: i64) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM claims WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

async fn detail_exists(conn: &mut SqliteConnection, claim_id: i64) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM claim_details WHERE claim_id = ?")
        .bind(claim_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}
