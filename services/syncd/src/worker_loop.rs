//! Per-queue worker loop: claim, run, ack. A background heartbeat keeps the
//! lease alive while a handler works; losing the heartbeat (crash) lets
//! another worker claim the task after the lease expires.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::ClaimedTask;
use crate::runner;
use crate::state::SharedState;

const POLL_EVERY: Duration = Duration::from_secs(2);
const HEARTBEAT_EVERY: Duration = Duration::from_secs(10);

fn worker_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "syncd".to_string())
}

pub async fn run(state: SharedState, queue: &'static str) {
    let wid = worker_id();
    info!(worker_id = %wid, queue, "worker: started");

    loop {
        match state.queue.claim(queue, &wid).await {
            Ok(Some(claimed)) => execute(&state, claimed, &wid).await,
            Ok(None) => sleep(POLL_EVERY).await,
            Err(e) => {
                warn!(queue, "worker: claim failed: {e:?}");
                sleep(POLL_EVERY).await;
            }
        }
    }
}

async fn execute(state: &SharedState, claimed: ClaimedTask, wid: &str) {
    info!(task_id = %claimed.id, task = claimed.task.name(), attempts = claimed.attempts, "worker: task started");

    let cancel = CancellationToken::new();
    let heartbeat_cancel = cancel.clone();
    let queue = state.queue.clone();
    let task_id = claimed.id;
    let hb_wid = wid.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => break,
                _ = sleep(HEARTBEAT_EVERY) => {
                    if let Err(e) = queue.heartbeat(task_id, &hb_wid).await {
                        warn!(task_id = %task_id, "worker: heartbeat failed: {e:?}");
                    }
                }
            }
        }
    });

    let outcome = runner::handle(state, &claimed.task).await;
    cancel.cancel();

    match outcome {
        Ok(()) => {
            if let Err(e) = state.queue.ack(claimed.id).await {
                error!(task_id = %claimed.id, "worker: ack failed: {e:?}");
            } else {
                info!(task_id = %claimed.id, task = claimed.task.name(), "worker: task done");
            }
        }
        Err(e) => {
            // Infrastructure failure: hand the message back for redelivery.
            error!(task_id = %claimed.id, "worker: task errored, requeueing: {e:?}");
            if let Err(retry_err) = state.queue.retry(claimed.id, &e.to_string()).await {
                error!(task_id = %claimed.id, "worker: requeue failed: {retry_err:?}");
            }
        }
    }
}
