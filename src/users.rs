use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::model::User;
use crate::time::now_ms;
use crate::{AppError, AppResult};

fn user_from_row(row: &SqliteRow) -> AppResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn create_user(pool: &SqlitePool, username: &str) -> AppResult<User> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::new("USERS/INVALID", "Username must not be blank"));
    }
    let now = now_ms();
    let res = sqlx::query("INSERT INTO users (username, created_at) VALUES (?, ?)")
        .bind(username)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::new("USERS/DUPLICATE", "Username already exists")
                    .with_context("username", username)
            }
            other => AppError::from(other).with_context("operation", "create_user"),
        })?;
    Ok(User {
        id: res.last_insert_rowid(),
        username: username.to_string(),
        created_at: now,
    })
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
    let row = sqlx::query("SELECT id, username, created_at FROM users WHERE username = ?")
        .bind(username.trim())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

/// Removes a user. Flags and notes they authored keep existing with a NULL
/// author.
pub async fn delete_user(pool: &SqlitePool, id: i64) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::new("USERS/NOT_FOUND", "User not found")
            .with_context("user_id", id.to_string()));
    }
    Ok(())
}
