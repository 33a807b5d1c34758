use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::AppState;

pub mod oauth;
pub mod send;
pub mod sequences;
pub mod steps;
pub mod worker;

pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/oauth/start", post(oauth::start))
        .route("/status", get(oauth::status))
        .route("/send_email", post(send::send_email))
        .route("/api/steps", post(steps::create_steps))
        .route("/api/sequence_step_upsert", post(steps::upsert_step))
        .route("/api/start_sequence", post(sequences::start_sequence))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/oauth2/callback", get(oauth::callback))
        .route("/api/run_scheduled_jobs", get(worker::run_scheduled_jobs))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}
