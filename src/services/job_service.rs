use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::ScheduledEmail;

pub struct NewJob<'a> {
    pub owner_id: &'a str,
    pub to_email: &'a str,
    pub subject: &'a str,
    pub body_text: Option<&'a str>,
    pub scheduled_for: i64,
    pub sequence_run_id: Option<&'a str>,
    pub step_id: Option<&'a str>,
    pub timezone: Option<&'a str>,
}

pub async fn insert_job(
    pool: &SqlitePool,
    now_ms: i64,
    job: NewJob<'_>,
) -> Result<ScheduledEmail, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    sqlx::query_as(
        "INSERT INTO scheduled_emails
            (id, owner_id, to_email, subject, body_text, scheduled_for, status, attempts,
             sequence_run_id, step_id, timezone, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 'scheduled', 0, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(&id)
    .bind(job.owner_id)
    .bind(job.to_email)
    .bind(job.subject)
    .bind(job.body_text)
    .bind(job.scheduled_for)
    .bind(job.sequence_run_id)
    .bind(job.step_id)
    .bind(job.timezone)
    .bind(now_ms)
    .bind(now_ms)
    .fetch_one(pool)
    .await
}

/// Atomically claims up to `batch` due jobs: earliest `scheduled_for` first,
/// ties broken by insertion order. The selection and the flip to `claimed`
/// are one statement, executed under SQLite's writer lock, so two concurrent
/// claims cannot return overlapping rows.
pub async fn claim_due_batch(
    pool: &SqlitePool,
    now_ms: i64,
    batch: i64,
) -> Result<Vec<ScheduledEmail>, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct ClaimedRow {
        rowid: i64,
        #[sqlx(flatten)]
        job: ScheduledEmail,
    }

    let mut rows: Vec<ClaimedRow> = sqlx::query_as(
        "UPDATE scheduled_emails
            SET status = 'claimed', updated_at = ?
          WHERE id IN (
                SELECT id FROM scheduled_emails
                 WHERE status = 'scheduled' AND scheduled_for <= ?
                 ORDER BY scheduled_for ASC, rowid ASC
                 LIMIT ?)
         RETURNING rowid, *",
    )
    .bind(now_ms)
    .bind(now_ms)
    .bind(batch)
    .fetch_all(pool)
    .await?;
    // RETURNING order is unspecified; restore the claim order.
    rows.sort_by_key(|r| (r.job.scheduled_for, r.rowid));
    Ok(rows.into_iter().map(|r| r.job).collect())
}

/// Terminal success. The `claimed` guard keeps terminal rows terminal even
/// if a stale caller retries the transition.
pub async fn mark_sent(
    pool: &SqlitePool,
    now_ms: i64,
    job_id: &str,
    message_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE scheduled_emails
            SET status = 'sent', message_id = ?, updated_at = ?
          WHERE id = ? AND status = 'claimed'",
    )
    .bind(message_id)
    .bind(now_ms)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Terminal failure, with the attempt counter and truncated error persisted.
pub async fn mark_failed(
    pool: &SqlitePool,
    now_ms: i64,
    job_id: &str,
    attempts: i64,
    last_error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE scheduled_emails
            SET status = 'failed', attempts = ?, last_error = ?, updated_at = ?
          WHERE id = ? AND status = 'claimed'",
    )
    .bind(attempts)
    .bind(truncate_error(last_error))
    .bind(now_ms)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Puts a failed-but-retryable job back on the queue at `scheduled_for`.
pub async fn reschedule_retry(
    pool: &SqlitePool,
    now_ms: i64,
    job_id: &str,
    attempts: i64,
    scheduled_for: i64,
    last_error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE scheduled_emails
            SET status = 'scheduled', attempts = ?, scheduled_for = ?, last_error = ?,
                updated_at = ?
          WHERE id = ? AND status = 'claimed'",
    )
    .bind(attempts)
    .bind(scheduled_for)
    .bind(truncate_error(last_error))
    .bind(now_ms)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_job(pool: &SqlitePool, job_id: &str) -> Result<Option<ScheduledEmail>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM scheduled_emails WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await
}

/// Exponential backoff: 2^(n+1) minutes off the pre-increment attempt count.
pub fn retry_delay_ms(prev_attempts: i64) -> i64 {
    let exp = (prev_attempts + 1).clamp(1, 20) as u32;
    (1i64 << exp) * 60_000
}

pub fn truncate_error(err: &str) -> String {
    err.chars().take(1000).collect()
}
