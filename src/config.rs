use anyhow::{Context, Result};
use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub redirect_uri: String,
    pub api_key: String,
    pub worker_secret: String,
    pub frontend_return: String,
    pub email_from: String,
    pub job_batch_size: i64,
    pub max_send_attempts: i64,
    pub default_timezone: String,
    /// 0 disables the in-process worker tick; an external trigger then owns
    /// `/api/run_scheduled_jobs`.
    pub worker_tick_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://kaptiv.db".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            google_client_id: env::var("GOOGLE_CLIENT_ID")
                .context("GOOGLE_CLIENT_ID must be set")?,
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET")
                .context("GOOGLE_CLIENT_SECRET must be set")?,
            redirect_uri: env::var("REDIRECT_URI").context("REDIRECT_URI must be set")?,
            api_key: env::var("KAPTIV_API_KEY").context("KAPTIV_API_KEY must be set")?,
            worker_secret: env::var("WORKER_SECRET").context("WORKER_SECRET must be set")?,
            frontend_return: env::var("FRONTEND_RETURN").unwrap_or_default(),
            email_from: env::var("EMAIL_FROM").unwrap_or_default(),
            job_batch_size: parse_var("JOB_BATCH_SIZE", 20)?,
            max_send_attempts: parse_var("MAX_SEND_ATTEMPTS", 5)?,
            default_timezone: env::var("DEFAULT_TIMEZONE")
                .unwrap_or_else(|_| "Asia/Singapore".to_string()),
            worker_tick_secs: parse_var("WORKER_TICK_SECS", 0)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("{name} must be numeric")),
        Err(_) => Ok(default),
    }
}
