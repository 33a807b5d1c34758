mod common;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::*;
use kaptiv_sequencer::gmail::TokenGrant;
use kaptiv_sequencer::routes;
use kaptiv_sequencer::services::sequence_service;

const BEARER: (&str, &str) = ("authorization", "Bearer test-api-key");

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let req = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn fake_id_token(email: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"RS256\",\"typ\":\"JWT\"}");
    let payload = URL_SAFE_NO_PAD.encode(json!({ "email": email, "sub": "123" }).to_string());
    format!("{header}.{payload}.signature")
}

#[tokio::test]
async fn healthz_is_public() {
    let (state, _provider, _clock) = test_state().await;
    let app = routes::app(state);
    let (status, _, body) = request(&app, "GET", "/healthz", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn api_key_is_required_on_protected_routes() {
    let (state, _provider, _clock) = test_state().await;
    let app = routes::app(state);

    let (status, _, body) = request(
        &app,
        "POST",
        "/oauth/start",
        &[],
        Some(json!({ "owner_id": "t1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("auth"));

    let (status, _, _) = request(
        &app,
        "POST",
        "/oauth/start",
        &[("authorization", "Bearer wrong-key")],
        Some(json!({ "owner_id": "t1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The legacy header is accepted as an alternative to the bearer form.
    let (status, _, _) = request(
        &app,
        "POST",
        "/oauth/start",
        &[("kaptiv_api_key", "test-api-key")],
        Some(json!({ "owner_id": "t1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn oauth_flow_connects_tenant_and_rejects_replay() {
    let (state, provider, _clock) = test_state().await;
    let app = routes::app(state);

    let (status, _, body) = request(
        &app,
        "POST",
        "/oauth/start",
        &[BEARER],
        Some(json!({ "owner_id": "t1", "return_url": "https://app.example/done" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let nonce = body["state"].as_str().unwrap().to_string();
    let auth_url = body["auth_url"].as_str().unwrap();
    assert!(auth_url.contains("access_type=offline"));
    assert!(auth_url.contains("prompt=consent"));
    assert!(auth_url.contains(&nonce));

    provider.set_grant(TokenGrant {
        access_token: "at-1".to_string(),
        refresh_token: Some("rt-xyz".to_string()),
        id_token: Some(fake_id_token("t1@gmail.test")),
    });

    let uri = format!("/oauth2/callback?code=c1&state={nonce}");
    let (status, headers, _) = request(&app, "GET", &uri, &[], None).await;
    assert_eq!(status, StatusCode::FOUND);
    let location = headers[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://app.example/done"));
    assert!(location.contains("status=success"));
    assert!(location.contains("owner_id=t1"));

    let (status, _, body) = request(&app, "GET", "/status?owner_id=t1", &[BEARER], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], json!(true));
    assert_eq!(body["email"], json!("t1@gmail.test"));

    // Replay of the same state nonce.
    let (status, _, body) = request(&app, "GET", &uri, &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation"));
    assert_eq!(body["detail"], json!("Invalid or expired state"));
}

#[tokio::test]
async fn expired_oauth_state_is_rejected_without_exchange() {
    let (state, _provider, clock) = test_state().await;
    let app = routes::app(state);

    let (_, _, body) = request(
        &app,
        "POST",
        "/oauth/start",
        &[BEARER],
        Some(json!({ "owner_id": "t1" })),
    )
    .await;
    let nonce = body["state"].as_str().unwrap().to_string();

    clock.advance(16 * MINUTE);
    // No grant is scripted: reaching the exchange would turn this into a 500.
    let uri = format!("/oauth2/callback?code=c1&state={nonce}");
    let (status, _, body) = request(&app, "GET", &uri, &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!("Invalid or expired state"));
}

#[tokio::test]
async fn bulk_steps_insert_and_conflict() {
    let (state, _provider, _clock) = test_state().await;
    let pool = state.pool.clone();
    let app = routes::app(state);
    let seq = Uuid::new_v4().to_string();

    let (status, _, body) = request(
        &app,
        "POST",
        "/api/steps",
        &[("kaptiv_api_key", "test-api-key")],
        Some(json!({
            "sequence_id": seq,
            "steps": [
                { "step_order": 1, "subject": "Intro" },
                { "step_order": 2, "subject": "Follow up", "delay_days": 3 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], json!(2));

    // A duplicate order anywhere in the batch rejects the whole batch.
    let (status, _, body) = request(
        &app,
        "POST",
        "/api/steps",
        &[("kaptiv_api_key", "test-api-key")],
        Some(json!({
            "sequence_id": seq,
            "steps": [
                { "step_order": 2, "subject": "Dup" },
                { "step_order": 5, "subject": "Never lands" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("conflict"));
    let steps = sequence_service::list_steps(&pool, &seq).await.unwrap();
    assert_eq!(steps.len(), 2);

    let (status, _, body) = request(
        &app,
        "POST",
        "/api/steps",
        &[BEARER],
        Some(json!({ "sequence_id": "not-a-uuid", "subject": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation"));
}

#[tokio::test]
async fn step_upsert_inserts_then_updates() {
    let (state, _provider, _clock) = test_state().await;
    let app = routes::app(state);
    let seq = Uuid::new_v4().to_string();

    let (status, _, body) = request(
        &app,
        "POST",
        "/api/sequence_step_upsert",
        &[BEARER],
        Some(json!({ "sequence_id": seq, "subject": "First" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["step_order"], json!(1));
    let step_id = body["step"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = request(
        &app,
        "POST",
        "/api/sequence_step_upsert",
        &[BEARER],
        Some(json!({
            "id": step_id,
            "sequence_id": seq,
            "subject": "First, revised",
            "delay_days": 4
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["id"], json!(step_id));
    assert_eq!(body["step"]["subject"], json!("First, revised"));
    assert_eq!(body["step"]["delay_days"], json!(4));

    let (status, _, body) = request(
        &app,
        "POST",
        "/api/sequence_step_upsert",
        &[BEARER],
        Some(json!({
            "id": Uuid::new_v4().to_string(),
            "sequence_id": seq,
            "subject": "Ghost"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("not_found"));
}

#[tokio::test]
async fn start_sequence_returns_created_runs() {
    let (state, _provider, _clock) = test_state().await;
    let pool = state.pool.clone();
    let app = routes::app(state);
    let seq = Uuid::new_v4().to_string();
    seed_steps(&pool, &seq, &[(1, 0), (2, 1)]).await;

    let (status, _, body) = request(
        &app,
        "POST",
        "/api/start_sequence",
        &[BEARER],
        Some(json!({
            "sequence_id": seq,
            "owner_id": "t1",
            "recipients": ["a@x.com", "b@x.com"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["runs"].as_array().unwrap().len(), 2);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 2);

    let (status, _, body) = request(
        &app,
        "POST",
        "/api/start_sequence",
        &[BEARER],
        Some(json!({
            "sequence_id": Uuid::new_v4().to_string(),
            "owner_id": "t1",
            "recipients": ["a@x.com"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation"));
}

#[tokio::test]
async fn worker_route_requires_its_own_secret() {
    let (state, _provider, _clock) = test_state().await;
    let pool = state.pool.clone();
    let app = routes::app(state);

    seed_credential(&pool, "t1", Some("rt-1")).await;
    let seq = Uuid::new_v4().to_string();
    seed_steps(&pool, &seq, &[(1, 0)]).await;
    let (status, _, _) = request(
        &app,
        "POST",
        "/api/start_sequence",
        &[BEARER],
        Some(json!({ "sequence_id": seq, "owner_id": "t1", "recipients": ["a@x.com"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = request(&app, "GET", "/api/run_scheduled_jobs", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = request(
        &app,
        "GET",
        "/api/run_scheduled_jobs",
        &[("x-worker-secret", "nope")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = request(
        &app,
        "GET",
        "/api/run_scheduled_jobs",
        &[("x-worker-secret", "test-worker-secret")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["claimed"], json!(1));
    assert_eq!(body["summary"]["sent"], json!(1));

    // The query form works for triggers that cannot set headers.
    let (status, _, body) = request(
        &app,
        "GET",
        "/api/run_scheduled_jobs?secret=test-worker-secret",
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["claimed"], json!(0));
}

#[tokio::test]
async fn wrong_method_is_405() {
    let (state, _provider, _clock) = test_state().await;
    let app = routes::app(state);
    let (status, _, _) = request(&app, "POST", "/api/run_scheduled_jobs", &[], None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn one_shot_send_email() {
    let (state, provider, _clock) = test_state().await;
    let pool = state.pool.clone();
    let app = routes::app(state);

    // Not connected yet.
    let (status, _, body) = request(
        &app,
        "POST",
        "/send_email",
        &[BEARER],
        Some(json!({ "owner_id": "t1", "to": "c@x.com", "subject": "Hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("no_refresh_token"));

    seed_credential(&pool, "t1", Some("rt-1")).await;
    let (status, _, body) = request(
        &app,
        "POST",
        "/send_email",
        &[BEARER],
        Some(json!({ "owner_id": "t1", "to": "c@x.com", "subject": "Hi", "body_text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert!(body["message_id"].as_str().is_some());

    let raws = provider.sent_raw.lock().unwrap().clone();
    assert_eq!(raws.len(), 1);
    let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raws[0].as_bytes()).unwrap()).unwrap();
    assert!(decoded.contains("To: c@x.com"));
    assert!(decoded.contains("Subject: Hi"));
    assert!(decoded.ends_with("\n\nhello"));

    provider.script_send_error("quota exceeded");
    let (status, _, body) = request(
        &app,
        "POST",
        "/send_email",
        &[BEARER],
        Some(json!({ "owner_id": "t1", "to": "c@x.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["error"], json!("send_error"));
}
