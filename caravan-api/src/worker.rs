use caravan_inventory::HoldManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Periodically expires lapsed holds and purges old tombstones. Reads already treat lapsed
/// holds as expired; the sweep keeps storage and subscribers in step without traffic.
pub async fn start_hold_sweeper(holds: Arc<HoldManager>, every: Duration) {
    info!("Hold sweeper started, running every {:?}", every);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match holds.sweep().await {
            Ok(report) => debug!(
                partitions = report.partitions,
                expired_units = report.expired_units,
                purged_holds = report.purged_holds,
                "sweep pass"
            ),
            Err(e) => error!("Hold sweep failed: {}", e),
        }
    }
}
