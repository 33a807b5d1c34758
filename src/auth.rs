use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::AppState;

/// Gate for the tenant-facing routes. Accepts `Authorization: Bearer <key>`
/// or the legacy `kaptiv_api_key` header.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = presented_key(req.headers()).ok_or(ApiError::Unauthorized)?;
    if !constant_time_eq(presented, &state.config.api_key) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let token = value.to_str().ok()?.strip_prefix("Bearer ")?.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }
    headers.get("kaptiv_api_key")?.to_str().ok()
}

/// Comparison that does not leak the match length through timing.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
