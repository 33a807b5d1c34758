use serde::{Deserialize, Serialize};

/// Lifecycle of a scheduled email. Only `scheduled` rows are claimable;
/// `sent` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Claimed,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduledEmail {
    pub id: String,
    pub owner_id: String,
    pub to_email: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub scheduled_for: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub message_id: Option<String>,
    pub sequence_run_id: Option<String>,
    pub step_id: Option<String>,
    pub timezone: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
