use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::SequenceStep;
use crate::services::sequence_service::{self, StepInput, UpsertStepInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StepBody {
    pub step_order: Option<i64>,
    pub subject: String,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub delay_days: Option<i64>,
}

/// Accepts either a `steps` array or the fields of a single step inline.
#[derive(Debug, Deserialize)]
pub struct CreateStepsRequest {
    pub sequence_id: String,
    #[serde(default)]
    pub steps: Option<Vec<StepBody>>,
    #[serde(default)]
    pub step_order: Option<i64>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub delay_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateStepsResponse {
    pub ok: bool,
    pub inserted: usize,
    pub rows: Vec<SequenceStep>,
}

/// POST /api/steps - bulk create steps for a sequence
pub async fn create_steps(
    State(state): State<AppState>,
    Json(req): Json<CreateStepsRequest>,
) -> ApiResult<Json<CreateStepsResponse>> {
    let sequence_id = parse_sequence_id(&req.sequence_id)?;

    let inputs: Vec<StepInput> = match req.steps {
        Some(steps) => steps
            .into_iter()
            .map(|s| StepInput {
                step_order: s.step_order,
                subject: s.subject,
                body_text: s.body_text,
                delay_days: s.delay_days,
            })
            .collect(),
        None => {
            let subject = req
                .subject
                .ok_or_else(|| ApiError::validation("subject or steps[] is required"))?;
            vec![StepInput {
                step_order: req.step_order,
                subject,
                body_text: req.body_text,
                delay_days: req.delay_days,
            }]
        }
    };

    let rows =
        sequence_service::insert_steps(&state.pool, state.clock.now_ms(), &sequence_id, inputs)
            .await?;
    Ok(Json(CreateStepsResponse {
        ok: true,
        inserted: rows.len(),
        rows,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpsertStepRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub sequence_id: String,
    #[serde(default)]
    pub step_order: Option<i64>,
    pub subject: String,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub delay_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UpsertStepResponse {
    pub ok: bool,
    pub step: SequenceStep,
}

/// POST /api/sequence_step_upsert - insert or update one step
pub async fn upsert_step(
    State(state): State<AppState>,
    Json(req): Json<UpsertStepRequest>,
) -> ApiResult<Json<UpsertStepResponse>> {
    let sequence_id = parse_sequence_id(&req.sequence_id)?;
    let step = sequence_service::upsert_step(
        &state.pool,
        state.clock.now_ms(),
        UpsertStepInput {
            id: req.id,
            sequence_id,
            step_order: req.step_order,
            subject: req.subject,
            body_text: req.body_text,
            delay_days: req.delay_days,
        },
    )
    .await?;
    Ok(Json(UpsertStepResponse { ok: true, step }))
}

fn parse_sequence_id(raw: &str) -> ApiResult<String> {
    let id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::validation("sequence_id must be a UUID"))?;
    Ok(id.to_string())
}
