use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source for every deadline in the broker, in epoch milliseconds.
///
/// The system variant reads the wall clock; the manual variant is advanced
/// explicitly so scheduler ticks are deterministic in tests.
#[derive(Debug, Clone)]
pub enum Clock {
    System,
    Manual(Arc<AtomicU64>),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System
    }

    pub fn manual(start_millis: u64) -> Self {
        Clock::Manual(Arc::new(AtomicU64::new(start_millis)))
    }

    pub fn now_millis(&self) -> u64 {
        match self {
            Clock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            Clock::Manual(t) => t.load(Ordering::SeqCst),
        }
    }

    /// Advance a manual clock. Invariant: never called on the system clock.
    pub fn advance(&self, delta_millis: u64) {
        match self {
            Clock::Manual(t) => {
                t.fetch_add(delta_millis, Ordering::SeqCst);
            }
            Clock::System => panic!("advance() requires a manual clock"),
        }
    }
}
