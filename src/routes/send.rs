use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::gmail::message;
use crate::services::credential_service;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub owner_id: String,
    pub to: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub ok: bool,
    pub message_id: Option<String>,
}

/// POST /send_email - one-shot send outside any sequence
pub async fn send_email(
    State(state): State<AppState>,
    Json(req): Json<SendEmailRequest>,
) -> ApiResult<Json<SendEmailResponse>> {
    if req.owner_id.trim().is_empty() {
        return Err(ApiError::validation("owner_id is required"));
    }
    if req.to.trim().is_empty() {
        return Err(ApiError::validation("to is required"));
    }

    let credential = credential_service::get_credential(&state.pool, &req.owner_id).await?;
    let Some(refresh_token) = credential.as_ref().and_then(|c| c.refresh_token.clone()) else {
        return Err(ApiError::NoRefreshToken);
    };

    let from = credential
        .as_ref()
        .and_then(|c| c.email.clone())
        .unwrap_or_else(|| state.config.email_from.clone());
    let raw = message::encode_raw(&message::build_rfc5322(
        &from,
        req.to.trim(),
        req.subject.as_deref().unwrap_or(""),
        req.body_text.as_deref(),
    ));

    let outcome = state.provider.send_raw(&refresh_token, &raw).await?;
    credential_service::touch_last_used(&state.pool, &req.owner_id, state.clock.now_ms()).await?;
    info!(owner_id = %req.owner_id, to = %req.to, "one-shot email sent");
    Ok(Json(SendEmailResponse {
        ok: true,
        message_id: outcome.message_id,
    }))
}
