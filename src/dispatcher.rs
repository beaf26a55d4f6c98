//! Shared delay dispatcher.
//!
//! One background task per process arms a timer for the earliest deadline
//! across all queues (delayed deliveries, visibility expiries, retention),
//! ticks the queues when it fires, and wakes the wait registries of queues
//! that gained eligible work. Sends and visibility changes re-arm it through
//! the manager so an earlier deadline shortens the sleep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::manager::QueueManager;

pub struct DelayDispatcher {
    task: JoinHandle<()>,
}

impl DelayDispatcher {
    pub fn spawn(manager: Arc<QueueManager>) -> Self {
        let task = tokio::spawn(run(manager));
        DelayDispatcher { task }
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn run(manager: Arc<QueueManager>) {
    loop {
        let now = manager.clock().now_millis();
        let mut earliest: Option<u64> = None;

        for handle in manager.all_handles().await {
            let (outcome, next) = {
                let mut queue = handle.queue.lock().await;
                let outcome = queue.tick(now);
                (outcome, queue.next_deadline(now))
            };
            if outcome.newly_eligible {
                debug!(queue = %handle.name, "tick freed messages, waking waiters");
                handle.waiters.wake_all();
            }
            if let Some(at) = next {
                earliest = Some(earliest.map_or(at, |e: u64| e.min(at)));
            }
        }

        let now = manager.clock().now_millis();
        match earliest {
            Some(at) if at > now => {
                let sleep = Duration::from_millis(at - now);
                let _ = tokio::time::timeout(sleep, manager.wait_for_rearm()).await;
            }
            Some(_) => {
                // A deadline landed while ticking; loop again immediately.
            }
            None => manager.wait_for_rearm().await,
        }
    }
}
