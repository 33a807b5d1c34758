use sqlx::SqlitePool;

use crate::models::Credential;

/// Upserts the tenant's credential. An incoming null never clobbers a stored
/// value: a re-grant that omits `refresh_token` keeps the previous token.
pub async fn upsert_credential(
    pool: &SqlitePool,
    now_ms: i64,
    owner_id: &str,
    email: Option<&str>,
    refresh_token: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO credentials (owner_id, email, refresh_token, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(owner_id) DO UPDATE SET
             email = COALESCE(excluded.email, credentials.email),
             refresh_token = COALESCE(excluded.refresh_token, credentials.refresh_token)",
    )
    .bind(owner_id)
    .bind(email)
    .bind(refresh_token)
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_credential(
    pool: &SqlitePool,
    owner_id: &str,
) -> Result<Option<Credential>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM credentials WHERE owner_id = ?")
        .bind(owner_id)
        .fetch_optional(pool)
        .await
}

pub async fn touch_last_used(
    pool: &SqlitePool,
    owner_id: &str,
    now_ms: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE credentials SET last_used_at = ? WHERE owner_id = ?")
        .bind(now_ms)
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(())
}
