use std::time::Duration;

use tracing::{info, warn};

use crate::services::worker_service;
use crate::AppState;

/// Optional in-process worker tick. Disabled (`worker_tick_secs = 0`) when an
/// external trigger owns `/api/run_scheduled_jobs`; both paths share the same
/// worker entry point.
pub fn start(state: AppState) {
    let tick_secs = state.config.worker_tick_secs;
    if tick_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        loop {
            let tick_start = std::time::Instant::now();
            match worker_service::run_scheduled_jobs(
                &state.pool,
                state.provider.as_ref(),
                state.clock.as_ref(),
                &state.config,
            )
            .await
            {
                Ok(summary) if summary.claimed > 0 => {
                    info!(
                        claimed = summary.claimed,
                        sent = summary.sent,
                        failed = summary.failed,
                        "scheduled worker tick drained jobs"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scheduled worker tick failed"),
            }
            // sleep the remainder of the tick
            let elapsed = tick_start.elapsed();
            let sleep_ms = (tick_secs * 1000).saturating_sub(elapsed.as_millis() as u64);
            tokio::time::sleep(Duration::from_millis(sleep_ms.max(1))).await;
        }
    });
}
