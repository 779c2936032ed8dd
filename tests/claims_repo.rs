use anyhow::Result;
use claims_desk::claims::{self, ClaimQuery, SortField, SortSpec};
use claims_desk::users;
use sqlx::SqlitePool;

#[path = "util.rs"]
mod util;

#[allow(clippy::too_many_arguments)]
async fn seed_claim(
    pool: &SqlitePool,
    id: i64,
    patient: &str,
    insurer: &str,
    status: &str,
    billed: &str,
    paid: &str,
    discharge: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO claims (id, patient_name, billed_amount, paid_amount, status, insurer_name, discharge_date, is_flagged, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, 0)",
    )
    .bind(id)
    .bind(patient)
    .bind(billed)
    .bind(paid)
    .bind(status)
    .bind(insurer)
    .bind(discharge)
    .execute(pool)
    .await?;
    Ok(())
}

async fn seeded() -> Result<SqlitePool> {
    let pool = util::migrated_pool().await;
    seed_claim(&pool, 1, "John Doe", "Acme Health", "PAID", "1000.50", "800.00", "2025-01-15").await?;
    seed_claim(&pool, 2, "Jane Roe", "Beta Mutual", "DENIED", "90.00", "0.00", "2025-03-01").await?;
    seed_claim(&pool, 3, "Sam Acme", "Gamma Care", "UNDER REVIEW", "500.00", "100.00", "2025-02-10").await?;
    Ok(pool)
}

fn ids(rows: &[claims_desk::model::Claim]) -> Vec<i64> {
    rows.iter().map(|c| c.id).collect()
}

#[tokio::test]
async fn default_order_is_newest_discharge_first() -> Result<()> {
    let pool = seeded().await?;
    let rows = claims::list_claims(&pool, &ClaimQuery::default()).await?;
    assert_eq!(ids(&rows), vec![2, 3, 1]);

    let unknown = ClaimQuery {
        sort: Some("-nonsense".into()),
        ..ClaimQuery::default()
    };
    assert_eq!(ids(&claims::list_claims(&pool, &unknown).await?), vec![2, 3, 1]);
    Ok(())
}

#[tokio::test]
async fn search_matches_patient_or_insurer_case_insensitively() -> Result<()> {
    let pool = seeded().await?;
    let query = ClaimQuery {
        search: Some("acme".into()),
        sort: Some("id".into()),
        ..ClaimQuery::default()
    };
    assert_eq!(ids(&claims::list_claims(&pool, &query).await?), vec![1, 3]);

    let literal_percent = ClaimQuery {
        search: Some("%".into()),
        ..ClaimQuery::default()
    };
    assert!(claims::list_claims(&pool, &literal_percent).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn status_filter_is_upper_cased() -> Result<()> {
    let pool = seeded().await?;
    let query = ClaimQuery {
        status: Some("under review".into()),
        ..ClaimQuery::default()
    };
    assert_eq!(ids(&claims::list_claims(&pool, &query).await?), vec![3]);
    Ok(())
}

#[tokio::test]
async fn amount_sorts_are_numeric() -> Result<()> {
    let pool = seeded().await?;
    let billed = ClaimQuery {
        sort: Some("billed_amount".into()),
        ..ClaimQuery::default()
    };
    assert_eq!(ids(&claims::list_claims(&pool, &billed).await?), vec![2, 3, 1]);

    let underpaid = ClaimQuery {
        sort: Some("-underpayment".into()),
        ..ClaimQuery::default()
    };
    assert_eq!(ids(&claims::list_claims(&pool, &underpaid).await?), vec![3, 1, 2]);
    Ok(())
}

#[tokio::test]
async fn toggle_flag_round_trip_and_flag_filter() -> Result<()> {
    let pool = seeded().await?;
    let reviewer = users::create_user(&pool, "reviewer").await?;

    let flagged = claims::toggle_flag(&pool, 2, Some(reviewer.id)).await?;
    assert!(flagged.is_flagged);
    assert_eq!(flagged.flagged_by, Some(reviewer.id));
    assert!(flagged.flagged_at.is_some());

    let only_flagged = ClaimQuery {
        flagged: Some(true),
        ..ClaimQuery::default()
    };
    assert_eq!(ids(&claims::list_claims(&pool, &only_flagged).await?), vec![2]);

    let cleared = claims::toggle_flag(&pool, 2, Some(reviewer.id)).await?;
    assert!(!cleared.is_flagged);
    assert_eq!(cleared.flagged_by, None);
    assert_eq!(cleared.flagged_at, None);

    let err = claims::toggle_flag(&pool, 404, None).await.unwrap_err();
    assert_eq!(err.code(), "CLAIMS/NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn notes_are_listed_newest_first_and_blank_text_rejected() -> Result<()> {
    let pool = seeded().await?;
    claims::add_note(&pool, 1, None, "first").await?;
    claims::add_note(&pool, 1, None, "second").await?;

    let view = claims::get_claim(&pool, 1).await?.expect("claim exists");
    let texts: Vec<&str> = view.notes.iter().map(|n| n.note.as_str()).collect();
    assert_eq!(texts, vec!["second", "first"]);
    assert!(view.detail.is_none());

    let unknown_author = claims::add_note(&pool, 1, Some(999), "orphan").await.unwrap_err();
    assert_eq!(unknown_author.code(), "DB/FOREIGN_KEY");
    assert_eq!(
        unknown_author.context().get("operation").map(String::as_str),
        Some("add_note")
    );

    let blank = claims::add_note(&pool, 1, None, "   ").await.unwrap_err();
    assert_eq!(blank.code(), "NOTES/INVALID");
    let missing = claims::add_note(&pool, 404, None, "hi").await.unwrap_err();
    assert_eq!(missing.code(), "CLAIMS/NOT_FOUND");
    assert!(claims::get_claim(&pool, 404).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_keeps_their_notes_and_flags() -> Result<()> {
    let pool = seeded().await?;
    let user = users::create_user(&pool, "alice").await?;
    claims::toggle_flag(&pool, 1, Some(user.id)).await?;
    claims::add_note(&pool, 1, Some(user.id), "needs appeal").await?;

    let dup = users::create_user(&pool, "alice").await.unwrap_err();
    assert_eq!(dup.code(), "USERS/DUPLICATE");

    users::delete_user(&pool, user.id).await?;
    let view = claims::get_claim(&pool, 1).await?.expect("claim exists");
    assert!(view.claim.is_flagged);
    assert_eq!(view.claim.flagged_by, None);
    assert_eq!(view.notes.len(), 1);
    assert_eq!(view.notes[0].user_id, None);

    let gone = users::delete_user(&pool, user.id).await.unwrap_err();
    assert_eq!(gone.code(), "USERS/NOT_FOUND");
    assert!(users::find_by_username(&pool, "alice").await?.is_none());
    Ok(())
}

#[test]
fn sort_toggle_links() {
    let next = SortSpec::toggle(Some("-discharge_date"), SortField::DischargeDate);
    assert_eq!(next.as_param(), "discharge_date");
    assert_eq!(
        SortSpec::toggle(Some("discharge_date"), SortField::PaidAmount).as_param(),
        "paid_amount"
    );
}
