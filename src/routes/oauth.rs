use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::oauth;
use crate::services::credential_service;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub owner_id: String,
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub ok: bool,
    pub auth_url: String,
    pub state: String,
}

/// POST /oauth/start - begin the offline-consent flow for a tenant
pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> ApiResult<Json<StartResponse>> {
    if req.owner_id.trim().is_empty() {
        return Err(ApiError::validation("owner_id is required"));
    }
    let now_ms = state.clock.now_ms();
    // Opportunistic sweep; expired tickets are also rejected at consume time.
    oauth::purge_expired_states(&state.pool, now_ms).await?;
    let nonce = oauth::create_state(
        &state.pool,
        now_ms,
        req.owner_id.trim(),
        req.return_url.as_deref(),
    )
    .await?;
    let auth_url = oauth::auth_url(&state.config, &nonce);
    Ok(Json(StartResponse {
        ok: true,
        auth_url,
        state: nonce,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// GET /oauth2/callback - provider redirect target. Consumes the state
/// ticket, exchanges the code, binds the credential to the tenant, and
/// bounces the browser back to the caller's return URL.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Response> {
    let now_ms = state.clock.now_ms();
    let ticket = oauth::consume_state(&state.pool, now_ms, &query.state).await?;

    let grant = state
        .provider
        .exchange_code(&query.code)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    let email = grant.id_token.as_deref().and_then(oauth::id_token_email);

    credential_service::upsert_credential(
        &state.pool,
        now_ms,
        &ticket.owner_id,
        email.as_deref(),
        grant.refresh_token.as_deref(),
    )
    .await?;
    info!(owner_id = %ticket.owner_id, connected = email.as_deref().unwrap_or(""), "oauth grant stored");

    let base = ticket
        .return_url
        .filter(|u| !u.is_empty())
        .or_else(|| {
            let front = state.config.frontend_return.clone();
            (!front.is_empty()).then_some(front)
        });
    match base {
        Some(base) => {
            let mut url = url::Url::parse(&base)
                .map_err(|_| ApiError::validation("return_url is not a valid URL"))?;
            url.query_pairs_mut()
                .append_pair("status", "success")
                .append_pair("owner_id", &ticket.owner_id);
            Ok((
                StatusCode::FOUND,
                [(header::LOCATION, url.to_string())],
            )
                .into_response())
        }
        None => Ok(Json(json!({ "ok": true, "owner_id": ticket.owner_id })).into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub owner_id: String,
}

/// GET /status - is this tenant connected?
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let credential = credential_service::get_credential(&state.pool, &query.owner_id).await?;
    let body = match credential {
        Some(c) => json!({
            "ok": true,
            "connected": c.refresh_token.is_some(),
            "email": c.email,
            "created_at": c.created_at,
        }),
        None => json!({ "ok": true, "connected": false }),
    };
    Ok(Json(body))
}
