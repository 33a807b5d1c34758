use chrono::DateTime;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::gmail::{MailProvider, SendOutcome};
use crate::models::{EmailEvent, RunStatus, ScheduledEmail, SequenceRun, SequenceStep};
use crate::services::{job_service, reply_service};
use crate::services::job_service::NewJob;

const DAY_MS: i64 = 86_400_000;

pub async fn list_steps(
    pool: &SqlitePool,
    sequence_id: &str,
) -> Result<Vec<SequenceStep>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM sequence_steps WHERE sequence_id = ? ORDER BY step_order ASC",
    )
    .bind(sequence_id)
    .fetch_all(pool)
    .await
}

pub struct StepInput {
    pub step_order: Option<i64>,
    pub subject: String,
    pub body_text: Option<String>,
    pub delay_days: Option<i64>,
}

fn validate_step(order: Option<i64>, delay_days: Option<i64>) -> ApiResult<()> {
    if matches!(order, Some(o) if o < 1) {
        return Err(ApiError::validation("step_order must be >= 1"));
    }
    if matches!(delay_days, Some(d) if d < 0) {
        return Err(ApiError::validation("delay_days must be >= 0"));
    }
    Ok(())
}

fn map_insert_error(e: sqlx::Error) -> ApiError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::Conflict("step_order already exists for this sequence".to_string())
        }
        _ => e.into(),
    }
}

/// Bulk insert. A duplicate `step_order` anywhere in the batch rolls the
/// whole transaction back and surfaces as a conflict.
pub async fn insert_steps(
    pool: &SqlitePool,
    now_ms: i64,
    sequence_id: &str,
    steps: Vec<StepInput>,
) -> ApiResult<Vec<SequenceStep>> {
    if steps.is_empty() {
        return Err(ApiError::validation("steps must not be empty"));
    }
    for step in &steps {
        validate_step(step.step_order, step.delay_days)?;
    }

    let mut next_order: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(step_order), 0) FROM sequence_steps WHERE sequence_id = ?",
    )
    .bind(sequence_id)
    .fetch_one(pool)
    .await?;

    let mut tx = pool.begin().await?;
    let mut rows = Vec::with_capacity(steps.len());
    for step in steps {
        let order = match step.step_order {
            Some(o) => o,
            None => {
                next_order += 1;
                next_order
            }
        };
        let row: SequenceStep = sqlx::query_as(
            "INSERT INTO sequence_steps
                (id, sequence_id, step_order, subject, body_text, delay_days,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(sequence_id)
        .bind(order)
        .bind(&step.subject)
        .bind(&step.body_text)
        .bind(step.delay_days.unwrap_or(0))
        .bind(now_ms)
        .bind(now_ms)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;
        rows.push(row);
    }
    tx.commit().await?;
    Ok(rows)
}

pub struct UpsertStepInput {
    pub id: Option<String>,
    pub sequence_id: String,
    pub step_order: Option<i64>,
    pub subject: String,
    pub body_text: Option<String>,
    pub delay_days: Option<i64>,
}

pub async fn upsert_step(
    pool: &SqlitePool,
    now_ms: i64,
    input: UpsertStepInput,
) -> ApiResult<SequenceStep> {
    validate_step(input.step_order, input.delay_days)?;

    if let Some(id) = &input.id {
        let row: Option<SequenceStep> = sqlx::query_as(
            "UPDATE sequence_steps
                SET subject = ?, body_text = ?,
                    step_order = COALESCE(?, step_order),
                    delay_days = COALESCE(?, delay_days),
                    updated_at = ?
              WHERE id = ? AND sequence_id = ?
              RETURNING *",
        )
        .bind(&input.subject)
        .bind(&input.body_text)
        .bind(input.step_order)
        .bind(input.delay_days)
        .bind(now_ms)
        .bind(id)
        .bind(&input.sequence_id)
        .fetch_optional(pool)
        .await
        .map_err(map_insert_error)?;
        return row.ok_or_else(|| ApiError::NotFound("step".to_string()));
    }

    let steps = insert_steps(
        pool,
        now_ms,
        &input.sequence_id,
        vec![StepInput {
            step_order: input.step_order,
            subject: input.subject,
            body_text: input.body_text,
            delay_days: input.delay_days,
        }],
    )
    .await?;
    Ok(steps.into_iter().next().expect("one step inserted"))
}

pub struct StartSequenceInput {
    pub sequence_id: String,
    pub owner_id: String,
    pub recipients: Vec<String>,
    pub first_send_time: Option<String>,
    pub timezone: Option<String>,
}

/// Materializes one run per recipient entry (duplicates included, by
/// design) and schedules the first step for each. A store error aborts
/// mid-list; already-created runs and jobs are left in place.
pub async fn start_sequence(
    pool: &SqlitePool,
    now_ms: i64,
    default_timezone: &str,
    input: StartSequenceInput,
) -> ApiResult<(Vec<SequenceRun>, Vec<ScheduledEmail>)> {
    let steps = list_steps(pool, &input.sequence_id).await?;
    let first_step = steps
        .first()
        .ok_or_else(|| ApiError::validation("sequence has no steps"))?;

    let recipients = if input.recipients.is_empty() {
        sqlx::query_scalar::<_, String>(
            "SELECT email FROM sequence_recipients WHERE sequence_id = ? ORDER BY rowid ASC",
        )
        .bind(&input.sequence_id)
        .fetch_all(pool)
        .await?
    } else {
        input.recipients
    };
    if recipients.is_empty() {
        return Err(ApiError::validation("no recipients for sequence"));
    }

    let first_send_ms = match input.first_send_time.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|_| ApiError::validation("first_send_time must be RFC 3339"))?
            .timestamp_millis(),
        None => now_ms,
    };
    let timezone = input.timezone.as_deref().unwrap_or(default_timezone);

    let mut runs = Vec::with_capacity(recipients.len());
    let mut jobs = Vec::with_capacity(recipients.len());
    for recipient in &recipients {
        let run: SequenceRun = sqlx::query_as(
            "INSERT INTO sequence_runs
                (id, sequence_id, owner_id, recipient_email, status, current_step,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, 'active', 0, ?, ?)
             RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&input.sequence_id)
        .bind(&input.owner_id)
        .bind(recipient)
        .bind(now_ms)
        .bind(now_ms)
        .fetch_one(pool)
        .await?;

        let job = job_service::insert_job(
            pool,
            now_ms,
            NewJob {
                owner_id: &input.owner_id,
                to_email: recipient,
                subject: &first_step.subject,
                body_text: first_step.body_text.as_deref(),
                scheduled_for: first_send_ms,
                sequence_run_id: Some(&run.id),
                step_id: Some(&first_step.id),
                timezone: Some(timezone),
            },
        )
        .await?;
        runs.push(run);
        jobs.push(job);
    }
    Ok((runs, jobs))
}

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<SequenceRun>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM sequence_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await
}

async fn set_run_status(
    pool: &SqlitePool,
    now_ms: i64,
    run_id: &str,
    status: RunStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sequence_runs SET status = ?, updated_at = ? WHERE id = ? AND status = 'active'",
    )
    .bind(status)
    .bind(now_ms)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Audit trail for a run, oldest first.
pub async fn events_for_run(
    pool: &SqlitePool,
    run_id: &str,
) -> Result<Vec<EmailEvent>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM email_events WHERE sequence_run_id = ?
         ORDER BY created_at ASC, rowid ASC",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
}

pub async fn record_event(
    pool: &SqlitePool,
    now_ms: i64,
    sequence_run_id: Option<&str>,
    step_id: Option<&str>,
    status: &str,
    message_id: Option<&str>,
    last_error: Option<&str>,
    sent_at: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO email_events
            (id, sequence_run_id, step_id, status, message_id, last_error, sent_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(sequence_run_id)
    .bind(step_id)
    .bind(status)
    .bind(message_id)
    .bind(last_error.map(job_service::truncate_error))
    .bind(sent_at)
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(())
}

/// Post-send state machine. Runs after `job` was marked `sent`: appends the
/// audit event, advances the run, consults the reply gate, and either stops
/// the run, completes it, or schedules the next step.
pub async fn advance_run(
    pool: &SqlitePool,
    provider: &dyn MailProvider,
    now_ms: i64,
    job: &ScheduledEmail,
    outcome: &SendOutcome,
    refresh_token: &str,
) -> Result<(), sqlx::Error> {
    record_event(
        pool,
        now_ms,
        job.sequence_run_id.as_deref(),
        job.step_id.as_deref(),
        "sent",
        outcome.message_id.as_deref(),
        None,
        Some(now_ms),
    )
    .await?;

    let Some(run_id) = job.sequence_run_id.as_deref() else {
        return Ok(());
    };
    let Some(run) = get_run(pool, run_id).await? else {
        warn!(run_id, "job references a missing run");
        return Ok(());
    };
    if run.status != RunStatus::Active {
        return Ok(());
    }

    let step: Option<SequenceStep> = match job.step_id.as_deref() {
        Some(step_id) => {
            sqlx::query_as("SELECT * FROM sequence_steps WHERE id = ?")
                .bind(step_id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };
    let Some(step) = step else {
        warn!(run_id, step_id = ?job.step_id, "job references a missing step");
        return Ok(());
    };

    // Watermark for the reply gate: the run's last_sent_at as it was before
    // this send.
    let since_ms = run.last_sent_at.unwrap_or(0);

    sqlx::query(
        "UPDATE sequence_runs
            SET current_step = ?, last_sent_at = ?,
                thread_id = COALESCE(thread_id, ?), updated_at = ?
          WHERE id = ?",
    )
    .bind(step.step_order)
    .bind(now_ms)
    .bind(outcome.thread_id.as_deref())
    .bind(now_ms)
    .bind(run_id)
    .execute(pool)
    .await?;

    // Read back for the canonical thread id (first-write-wins).
    let Some(run) = get_run(pool, run_id).await? else {
        return Ok(());
    };

    if let Some(thread_id) = run.thread_id.as_deref() {
        if reply_service::has_reply(provider, refresh_token, thread_id, &run.recipient_email, since_ms)
            .await
        {
            set_run_status(pool, now_ms, run_id, RunStatus::Stopped).await?;
            return Ok(());
        }
    }

    let next: Option<SequenceStep> = sqlx::query_as(
        "SELECT * FROM sequence_steps
          WHERE sequence_id = ? AND step_order > ?
          ORDER BY step_order ASC LIMIT 1",
    )
    .bind(&step.sequence_id)
    .bind(step.step_order)
    .fetch_optional(pool)
    .await?;

    let Some(next) = next else {
        set_run_status(pool, now_ms, run_id, RunStatus::Completed).await?;
        return Ok(());
    };

    job_service::insert_job(
        pool,
        now_ms,
        NewJob {
            owner_id: &job.owner_id,
            to_email: &run.recipient_email,
            subject: &next.subject,
            body_text: next.body_text.as_deref(),
            scheduled_for: now_ms + next.delay_days * DAY_MS,
            sequence_run_id: Some(run_id),
            step_id: Some(&next.id),
            timezone: job.timezone.as_deref(),
        },
    )
    .await?;
    Ok(())
}
