use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::models::{ScheduledEmail, SequenceRun};
use crate::services::sequence_service::{self, StartSequenceInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartSequenceRequest {
    pub sequence_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
    #[serde(default)]
    pub first_send_time: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartSequenceResponse {
    pub ok: bool,
    pub runs: Vec<SequenceRun>,
    pub jobs: Vec<ScheduledEmail>,
}

/// POST /api/start_sequence - materialize one run per recipient and schedule
/// the first step for each
pub async fn start_sequence(
    State(state): State<AppState>,
    Json(req): Json<StartSequenceRequest>,
) -> ApiResult<(StatusCode, Json<StartSequenceResponse>)> {
    if req.sequence_id.trim().is_empty() {
        return Err(ApiError::validation("sequence_id is required"));
    }
    if req.owner_id.trim().is_empty() {
        return Err(ApiError::validation("owner_id is required"));
    }

    let (runs, jobs) = sequence_service::start_sequence(
        &state.pool,
        state.clock.now_ms(),
        &state.config.default_timezone,
        StartSequenceInput {
            sequence_id: req.sequence_id.trim().to_string(),
            owner_id: req.owner_id.trim().to_string(),
            recipients: req.recipients.unwrap_or_default(),
            first_send_time: req.first_send_time,
            timezone: req.timezone,
        },
    )
    .await?;
    info!(
        sequence_id = %req.sequence_id,
        runs = runs.len(),
        "sequence started"
    );
    Ok((
        StatusCode::CREATED,
        Json(StartSequenceResponse {
            ok: true,
            runs,
            jobs,
        }),
    ))
}
