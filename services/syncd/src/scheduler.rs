//! Fixed-interval scheduler. The only periodic task is the cleanup sweep;
//! it is submitted as an ordinary queue message so any worker can run it
//! and a missed tick just means the next one does the work.

use tracing::{info, warn};

use crate::queue::Task;
use crate::state::SharedState;

pub async fn run(state: SharedState) {
    let mut ticker = tokio::time::interval(state.config.cleanup_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(every = ?state.config.cleanup_every, "scheduler: started");

    loop {
        ticker.tick().await;
        match state.queue.enqueue(&Task::CleanupJobs).await {
            Ok(task_id) => info!(%task_id, "scheduler: cleanup enqueued"),
            Err(e) => warn!("scheduler: cleanup enqueue failed: {e:?}"),
        }
    }
}
