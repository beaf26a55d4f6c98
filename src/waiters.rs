//! Long-poll wait registry.
//!
//! Each queue owns one registry. A receive that found nothing parks here
//! until a send makes the queue non-empty, the scheduler tick frees a
//! message, the queue is deleted, or the poll deadline elapses. Wakeups may
//! be spurious; the parked receive re-checks under the queue lock and
//! re-parks.
//!
//! Missed-wakeup discipline: the receive loop creates the notified future
//! and enables it while still holding the queue lock. A send must take the
//! same lock to enqueue, so its wakeup is ordered strictly after the
//! waiter's registration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct WaitRegistry {
    notify: Notify,
    parked: AtomicUsize,
}

impl WaitRegistry {
    pub fn new() -> Self {
        WaitRegistry::default()
    }

    /// Future completing on the next wakeup. Call `enable` on the pinned
    /// future before releasing the queue lock.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wake every parked receive; each re-attempts under the queue's
    /// serialized context.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Number of receives currently parked, for logging and tests.
    pub fn parked(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }

    pub fn park(&self) -> ParkGuard<'_> {
        self.parked.fetch_add(1, Ordering::Relaxed);
        ParkGuard { registry: self }
    }

    /// Park until woken or until `timeout` elapses. Returns true when woken.
    /// Test convenience; the manager uses `notified` directly so it can
    /// register under the queue lock.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let notified = std::pin::pin!(self.notified());
        let _guard = self.park();
        tokio::time::timeout(timeout, notified).await.is_ok()
    }
}

pub struct ParkGuard<'a> {
    registry: &'a WaitRegistry,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        self.registry.parked.fetch_sub(1, Ordering::Relaxed);
    }
}
