use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use kaptiv_sequencer::clock::SystemClock;
use kaptiv_sequencer::config::Config;
use kaptiv_sequencer::gmail::GmailClient;
use kaptiv_sequencer::services::scheduler;
use kaptiv_sequencer::{db, routes, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kaptiv_sequencer=debug")),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::connect(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let provider = Arc::new(GmailClient::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.redirect_uri.clone(),
    ));

    let state = AppState {
        pool,
        config: config.clone(),
        provider,
        clock: Arc::new(SystemClock),
    };

    scheduler::start(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "kaptiv sequencer listening");
    axum::serve(listener, app).await?;
    Ok(())
}
