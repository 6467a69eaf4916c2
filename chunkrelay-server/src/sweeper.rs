use std::time::Duration;

use chunkrelay_blob::FinalizeGate;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically drop abandoned upload sessions and their staged blocks.
pub fn spawn_sweeper(gate: FinalizeGate, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(err) = gate.sweep_abandoned().await {
                tracing::warn!(error = %err, "session sweep failed");
            }
        }
    })
}
