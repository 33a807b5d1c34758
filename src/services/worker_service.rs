use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::gmail::{message, MailProvider};
use crate::models::ScheduledEmail;
use crate::services::{credential_service, job_service, sequence_service};

#[derive(Debug, Default, Serialize)]
pub struct WorkerSummary {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<JobFailure>,
}

#[derive(Debug, Serialize)]
pub struct JobFailure {
    pub job_id: String,
    pub error: String,
}

/// One worker invocation: claim a batch, process each job in order, report
/// per-job outcomes. Always returns a summary; per-job errors never abort
/// the batch.
pub async fn run_scheduled_jobs(
    pool: &SqlitePool,
    provider: &dyn MailProvider,
    clock: &dyn Clock,
    config: &Config,
) -> Result<WorkerSummary, sqlx::Error> {
    let now_ms = clock.now_ms();
    let jobs = job_service::claim_due_batch(pool, now_ms, config.job_batch_size).await?;
    let mut summary = WorkerSummary {
        claimed: jobs.len(),
        ..Default::default()
    };
    if jobs.is_empty() {
        return Ok(summary);
    }

    for job in jobs {
        process_job(pool, provider, clock, config, &job, &mut summary).await;
    }
    info!(
        claimed = summary.claimed,
        sent = summary.sent,
        failed = summary.failed,
        skipped = summary.skipped,
        "worker tick complete"
    );
    Ok(summary)
}

async fn process_job(
    pool: &SqlitePool,
    provider: &dyn MailProvider,
    clock: &dyn Clock,
    config: &Config,
    job: &ScheduledEmail,
    summary: &mut WorkerSummary,
) {
    let now_ms = clock.now_ms();

    let credential = match credential_service::get_credential(pool, &job.owner_id).await {
        Ok(c) => c,
        Err(e) => {
            fail_or_retry(pool, clock, config, job, &e.to_string(), summary).await;
            return;
        }
    };
    let Some(refresh_token) = credential.as_ref().and_then(|c| c.refresh_token.clone()) else {
        if let Err(e) =
            job_service::mark_failed(pool, now_ms, &job.id, job.attempts, "no_refresh_token").await
        {
            warn!(job_id = %job.id, error = %e, "failed to persist no_refresh_token failure");
        }
        record_failure_event(pool, now_ms, job, "no_refresh_token").await;
        summary.failed += 1;
        summary.failures.push(JobFailure {
            job_id: job.id.clone(),
            error: "no_refresh_token".to_string(),
        });
        return;
    };

    let from = credential
        .as_ref()
        .and_then(|c| c.email.clone())
        .unwrap_or_else(|| config.email_from.clone());
    let raw = message::encode_raw(&message::build_rfc5322(
        &from,
        &job.to_email,
        &job.subject,
        job.body_text.as_deref(),
    ));

    match provider.send_raw(&refresh_token, &raw).await {
        Ok(outcome) => {
            let now_ms = clock.now_ms();
            match job_service::mark_sent(pool, now_ms, &job.id, outcome.message_id.as_deref()).await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(job_id = %job.id, "job left claimed state before sent update");
                    summary.skipped += 1;
                    return;
                }
                Err(e) => {
                    // The provider accepted the message; the job stalls in
                    // `claimed` rather than risking a duplicate send.
                    warn!(job_id = %job.id, error = %e, "sent update failed after provider accept");
                    summary.failed += 1;
                    summary.failures.push(JobFailure {
                        job_id: job.id.clone(),
                        error: e.to_string(),
                    });
                    return;
                }
            }
            if let Err(e) = credential_service::touch_last_used(pool, &job.owner_id, now_ms).await {
                warn!(owner_id = %job.owner_id, error = %e, "failed to touch credential");
            }
            summary.sent += 1;

            if job.sequence_run_id.is_some() {
                if let Err(e) =
                    sequence_service::advance_run(pool, provider, now_ms, job, &outcome, &refresh_token)
                        .await
                {
                    // Post-send errors never revert the sent job; the run may
                    // stall until an operator intervenes.
                    warn!(job_id = %job.id, error = %e, "post-send sequence advance failed");
                    record_failure_event(pool, clock.now_ms(), job, &e.to_string()).await;
                }
            }
        }
        Err(e) => {
            fail_or_retry(pool, clock, config, job, &e.to_string(), summary).await;
        }
    }
}

/// Retry policy: with `n` prior attempts, reschedule at `now + 2^(n+1)`
/// minutes while `n + 1` stays under the attempt cap, else fail terminally.
async fn fail_or_retry(
    pool: &SqlitePool,
    clock: &dyn Clock,
    config: &Config,
    job: &ScheduledEmail,
    error: &str,
    summary: &mut WorkerSummary,
) {
    let now_ms = clock.now_ms();
    let attempts = job.attempts + 1;
    let result = if attempts < config.max_send_attempts {
        let next_at = now_ms + job_service::retry_delay_ms(job.attempts);
        job_service::reschedule_retry(pool, now_ms, &job.id, attempts, next_at, error).await
    } else {
        job_service::mark_failed(pool, now_ms, &job.id, attempts, error).await
    };
    if let Err(e) = result {
        // Failure-path write failures are logged and swallowed; the row only
        // comes back if it reverted to `scheduled`.
        warn!(job_id = %job.id, error = %e, "failed to persist retry state");
    }
    record_failure_event(pool, now_ms, job, error).await;
    summary.failed += 1;
    summary.failures.push(JobFailure {
        job_id: job.id.clone(),
        error: job_service::truncate_error(error),
    });
}

async fn record_failure_event(pool: &SqlitePool, now_ms: i64, job: &ScheduledEmail, error: &str) {
    if job.sequence_run_id.is_none() {
        return;
    }
    if let Err(e) = sequence_service::record_event(
        pool,
        now_ms,
        job.sequence_run_id.as_deref(),
        job.step_id.as_deref(),
        "failed",
        None,
        Some(error),
        None,
    )
    .await
    {
        warn!(job_id = %job.id, error = %e, "failed to append failure event");
    }
}
