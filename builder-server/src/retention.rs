//! Periodic eviction of finished jobs.

use std::sync::Arc;
use std::time::Duration;

use builder::job_store::JobStore;
use chrono::Utc;
use tracing::{debug, info};

/// Evict terminal jobs older than `retention` every `retention / 4`, between one second and one hour.
pub fn start_sweeper(jobs: Arc<dyn JobStore>, retention: Duration) {
    let period = (retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(3600));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            sweep(jobs.as_ref(), retention);
        }
    });
    info!(retention_secs = retention.as_secs(), "job retention sweeper started");
}

fn sweep(jobs: &dyn JobStore, retention: Duration) -> usize {
    let cutoff = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age));
    let Some(cutoff) = cutoff else {
        debug!(
            retention_secs = retention.as_secs(),
            "retention beyond representable time, nothing to evict"
        );
        return 0;
    };
    let removed = jobs.remove_finished_before(cutoff);
    if removed > 0 {
        debug!(removed, "evicted finished jobs");
    }
    removed
}
