use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};
use ridepool_settlement::SettlementEngine;

/// Runs a completion pass every `interval_seconds` until the process exits
pub async fn start_completion_worker(engine: Arc<SettlementEngine>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Completion worker started, running every {}s", interval_seconds);

    loop {
        ticker.tick().await;
        match engine.complete_expired_trips(None).await {
            Ok(summary) if summary.processed > 0 || summary.skipped > 0 => {
                info!("Completion pass finished: {:?}", summary);
            }
            Ok(_) => {}
            Err(e) => error!("Completion pass failed: {}", e),
        }
    }
}
