use std::sync::Arc;

use sqlx::SqlitePool;

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod gmail;
pub mod models;
pub mod oauth;
pub mod routes;
pub mod services;

use crate::clock::Clock;
use crate::config::Config;
use crate::gmail::MailProvider;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub provider: Arc<dyn MailProvider>,
    pub clock: Arc<dyn Clock>,
}

impl axum::extract::FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
