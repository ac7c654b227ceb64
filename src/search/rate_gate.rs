//! Per-target request pacing.
//!
//! Each remote target gets one gate shared by every worker thread. A worker
//! that arrives too early waits its turn instead of dropping the request, so
//! bursts of concurrent tracks spread out over the configured interval.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{Quota, RateLimiter};

use crate::protocol::CancelHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct RateGate {
    limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl RateGate {
    /// Builds a gate releasing one request per `interval`.
    pub fn new(interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(100));
        Self {
            limiter: RateLimiter::direct(
                Quota::with_period(interval)
                    .expect("valid limiter period")
                    .allow_burst(NonZeroU32::new(1).expect("non-zero limiter burst")),
            ),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Blocks until a slot opens or the batch is cancelled. Returns false
    /// only on cancellation.
    pub fn wait_for_slot(&self, cancel: &CancelHandle) -> bool {
        loop {
            if self.limiter.check().is_ok() {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RateGate;
    use crate::protocol::CancelHandle;
    use std::time::{Duration, Instant};

    #[test]
    fn test_first_acquire_is_immediate() {
        let gate = RateGate::new(Duration::from_secs(2));
        assert!(gate.try_acquire());
    }

    #[test]
    fn test_second_acquire_within_interval_is_denied() {
        let gate = RateGate::new(Duration::from_secs(2));
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[test]
    fn test_wait_for_slot_queues_until_interval_elapses() {
        let gate = RateGate::new(Duration::from_millis(150));
        let cancel = CancelHandle::new();
        assert!(gate.wait_for_slot(&cancel));

        let started = Instant::now();
        assert!(gate.wait_for_slot(&cancel));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_wait_for_slot_bails_out_on_cancel() {
        let gate = RateGate::new(Duration::from_secs(60));
        let cancel = CancelHandle::new();
        assert!(gate.wait_for_slot(&cancel));

        cancel.cancel();
        let started = Instant::now();
        assert!(!gate.wait_for_slot(&cancel));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
