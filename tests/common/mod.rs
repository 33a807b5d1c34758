#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use kaptiv_sequencer::clock::Clock;
use kaptiv_sequencer::config::Config;
use kaptiv_sequencer::gmail::{
    MailProvider, MessageHeaders, ProviderError, SendOutcome, TokenGrant,
};
use kaptiv_sequencer::services::credential_service;
use kaptiv_sequencer::services::sequence_service::{self, StepInput};
use kaptiv_sequencer::AppState;

/// 2025-01-01T00:00:00Z
pub const T0: i64 = 1_735_689_600_000;
pub const MINUTE: i64 = 60_000;
pub const DAY: i64 = 86_400_000;

/// Single-connection in-memory pool: every handle sees the same database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::raw_sql(include_str!("../../migrations/0001_init.sql"))
        .execute(&pool)
        .await
        .expect("schema");
    pool
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        google_client_id: "test-client-id".to_string(),
        google_client_secret: "test-client-secret".to_string(),
        redirect_uri: "http://localhost:8080/oauth2/callback".to_string(),
        api_key: "test-api-key".to_string(),
        worker_secret: "test-worker-secret".to_string(),
        frontend_return: String::new(),
        email_from: "robot@kaptiv.test".to_string(),
        job_batch_size: 20,
        max_send_attempts: 5,
        default_timezone: "Asia/Singapore".to_string(),
        worker_tick_secs: 0,
    }
}

pub struct TestClock(Mutex<i64>);

impl TestClock {
    pub fn new(start_ms: i64) -> Self {
        TestClock(Mutex::new(start_ms))
    }

    pub fn set(&self, ms: i64) {
        *self.0.lock().unwrap() = ms;
    }

    pub fn advance(&self, ms: i64) {
        *self.0.lock().unwrap() += ms;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(*self.0.lock().unwrap()).expect("valid test time")
    }
}

/// Scripted provider. Sends succeed with generated ids unless errors are
/// queued; threads and headers are plain maps the test populates.
#[derive(Default)]
pub struct FakeProvider {
    pub send_script: Mutex<VecDeque<Result<SendOutcome, String>>>,
    pub sent_raw: Mutex<Vec<String>>,
    pub send_count: AtomicUsize,
    pub threads: Mutex<HashMap<String, Vec<String>>>,
    pub headers: Mutex<HashMap<String, MessageHeaders>>,
    pub grant: Mutex<Option<TokenGrant>>,
    pub list_fails: AtomicBool,
}

impl FakeProvider {
    pub fn script_send_error(&self, detail: &str) {
        self.send_script
            .lock()
            .unwrap()
            .push_back(Err(detail.to_string()));
    }

    pub fn script_send_outcome(&self, outcome: SendOutcome) {
        self.send_script.lock().unwrap().push_back(Ok(outcome));
    }

    pub fn set_grant(&self, grant: TokenGrant) {
        *self.grant.lock().unwrap() = Some(grant);
    }

    /// Registers a message in `thread_id` whose From/Date headers make it a
    /// reply from `from` at `date_ms`.
    pub fn add_thread_message(&self, thread_id: &str, message_id: &str, from: &str, date_ms: i64) {
        self.threads
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default()
            .push(message_id.to_string());
        let date = DateTime::from_timestamp_millis(date_ms)
            .expect("valid test time")
            .to_rfc2822();
        self.headers.lock().unwrap().insert(
            message_id.to_string(),
            MessageHeaders {
                from: Some(from.to_string()),
                date: Some(date),
            },
        );
    }
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn exchange_code(&self, _code: &str) -> Result<TokenGrant, ProviderError> {
        self.grant
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::Token("no grant scripted".to_string()))
    }

    async fn send_raw(&self, _refresh_token: &str, raw: &str) -> Result<SendOutcome, ProviderError> {
        self.sent_raw.lock().unwrap().push(raw.to_string());
        if let Some(scripted) = self.send_script.lock().unwrap().pop_front() {
            return scripted.map_err(ProviderError::Token);
        }
        let n = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendOutcome {
            message_id: Some(format!("m{n}")),
            thread_id: Some("thread-1".to_string()),
        })
    }

    async fn list_thread(
        &self,
        _refresh_token: &str,
        thread_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 500,
                body: "listing unavailable".to_string(),
            });
        }
        let mut ids = self
            .threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        ids.truncate(max_results as usize);
        Ok(ids)
    }

    async fn message_headers(
        &self,
        _refresh_token: &str,
        message_id: &str,
    ) -> Result<MessageHeaders, ProviderError> {
        Ok(self
            .headers
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub async fn test_state() -> (AppState, Arc<FakeProvider>, Arc<TestClock>) {
    let pool = test_pool().await;
    let provider = Arc::new(FakeProvider::default());
    let clock = Arc::new(TestClock::new(T0));
    let state = AppState {
        pool,
        config: Arc::new(test_config()),
        provider: provider.clone(),
        clock: clock.clone(),
    };
    (state, provider, clock)
}

pub async fn seed_credential(pool: &SqlitePool, owner_id: &str, refresh_token: Option<&str>) {
    credential_service::upsert_credential(
        pool,
        T0,
        owner_id,
        Some(&format!("{owner_id}@sender.test")),
        refresh_token,
    )
    .await
    .expect("seed credential");
}

/// Inserts steps `(step_order, delay_days)` with generated subjects.
pub async fn seed_steps(pool: &SqlitePool, sequence_id: &str, steps: &[(i64, i64)]) {
    let inputs = steps
        .iter()
        .map(|(order, delay)| StepInput {
            step_order: Some(*order),
            subject: format!("Step {order}"),
            body_text: Some(format!("Body of step {order}")),
            delay_days: Some(*delay),
        })
        .collect();
    sequence_service::insert_steps(pool, T0, sequence_id, inputs)
        .await
        .expect("seed steps");
}
