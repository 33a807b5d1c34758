use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Stopped,
    Completed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SequenceStep {
    pub id: String,
    pub sequence_id: String,
    pub step_order: i64,
    pub subject: String,
    pub body_text: Option<String>,
    pub delay_days: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-recipient execution of a sequence. `current_step` is the order of the
/// most recently sent step (0 before any send). `thread_id` is set on the
/// first successful send and never overwritten.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SequenceRun {
    pub id: String,
    pub sequence_id: String,
    pub owner_id: String,
    pub recipient_email: String,
    pub status: RunStatus,
    pub current_step: i64,
    pub thread_id: Option<String>,
    pub last_sent_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Append-only audit row, one per send attempt bound to a run/step.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EmailEvent {
    pub id: String,
    pub sequence_run_id: Option<String>,
    pub step_id: Option<String>,
    pub status: String,
    pub message_id: Option<String>,
    pub last_error: Option<String>,
    pub sent_at: Option<i64>,
    pub created_at: i64,
}
