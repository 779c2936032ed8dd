use anyhow::Result;
use claims_desk::migrate;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn migrations_are_idempotent() -> Result<()> {
    let pool = util::temp_pool().await;
    migrate::apply_migrations(&pool).await?;
    migrate::apply_migrations(&pool).await?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await?;
    assert_eq!(applied as usize, migrate::migration_names().count());
    Ok(())
}

#[tokio::test]
async fn edited_migration_is_refused() -> Result<()> {
    let pool = util::migrated_pool().await;
    sqlx::query("UPDATE schema_migrations SET checksum = 'tampered'")
        .execute(&pool)
        .await?;
    let err = migrate::apply_migrations(&pool).await.unwrap_err();
    assert!(err.to_string().contains("edited after application"));
    Ok(())
}

#[tokio::test]
async fn foreign_keys_cascade_from_claims() -> Result<()> {
    let pool = util::migrated_pool().await;
    sqlx::query(
        "INSERT INTO claims (id, patient_name, billed_amount, paid_amount, status, insurer_name, discharge_date, is_flagged, created_at, updated_at)
         VALUES (1, 'John Doe', '10.00', '5.00', 'PAID', 'Acme', '2025-01-15', 0, 0, 0)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("INSERT INTO claim_details (claim_id, cpt_codes, denial_reason) VALUES (1, '99213', '')")
        .execute(&pool)
        .await?;
    sqlx::query("INSERT INTO notes (claim_id, note, created_at) VALUES (1, 'n', 0)")
        .execute(&pool)
        .await?;

    let orphan = sqlx::query("INSERT INTO claim_details (claim_id, cpt_codes) VALUES (2, 'x')")
        .execute(&pool)
        .await;
    assert!(orphan.is_err());

    sqlx::query("DELETE FROM claims WHERE id = 1")
        .execute(&pool)
        .await?;
    assert_eq!(util::count(&pool, "claim_details").await, 0);
    assert_eq!(util::count(&pool, "notes").await, 0);
    Ok(())
}
