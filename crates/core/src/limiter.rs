//! Slot pool used to spread requests over several rate-limited channels.
//!
//! Each slot tracks how many requests it issued in the current window and
//! when it was last used. Slots are handed out round-robin; a slot that is
//! too recent or has used up its window is skipped until it becomes
//! eligible again.

use crate::cancel::{CancelToken, Cancelled};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

/// Tuning for the slot pool. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Number of independent slots.
    pub slots: usize,
    /// Minimum gap between two requests on the same slot.
    pub min_interval_ms: u64,
    /// Length of the rolling window.
    pub window_ms: u64,
    /// Requests one slot may issue per window.
    pub max_requests_per_window: u32,
    /// Sleep between two eligibility checks while waiting.
    pub poll_interval_ms: u64,
    /// Give up waiting for a slot after this long.
    pub max_wait_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            min_interval_ms: 80,
            window_ms: 60_000,
            max_requests_per_window: 45,
            poll_interval_ms: 100,
            max_wait_ms: 90_000,
        }
    }
}

impl LimiterConfig {
    fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Reasons [`SlotPool::acquire`] returns without a slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("no slot became eligible within {0:?}")]
    Saturated(Duration),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Clone, Default)]
struct Slot {
    request_count: u32,
    in_flight: u32,
    window_start: Option<Instant>,
    last_request: Option<Instant>,
}

impl Slot {
    /// Apply the lazy window reset, then decide whether a request may go out.
    fn check(&mut self, now: Instant, config: &LimiterConfig) -> bool {
        let Some(last) = self.last_request else {
            return self.request_count + self.in_flight < config.max_requests_per_window;
        };
        let idle = now.saturating_duration_since(last);
        if idle < config.min_interval() {
            return false;
        }
        if idle > config.window() {
            self.request_count = 0;
            self.window_start = None;
        }
        self.request_count + self.in_flight < config.max_requests_per_window
    }
}

struct PoolState {
    slots: Vec<Slot>,
    cursor: usize,
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub id: usize,
    pub request_count: u32,
    pub in_flight: u32,
    pub window_start: Option<Instant>,
    pub last_request: Option<Instant>,
}

/// Round-robin pool of rate-limited slots.
///
/// All slot state sits behind a single lock so that checking eligibility and
/// reserving the slot happen in one step.
pub struct SlotPool {
    config: LimiterConfig,
    state: Mutex<PoolState>,
}

impl SlotPool {
    pub fn new(config: LimiterConfig) -> Self {
        let count = config.slots.max(1);
        Self {
            state: Mutex::new(PoolState {
                slots: vec![Slot::default(); count],
                // The first selection lands on slot 0.
                cursor: count - 1,
            }),
            config,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Whether `slot` could take a request at `now`. Applies the lazy window reset.
    pub fn is_eligible(&self, slot: usize, now: Instant) -> bool {
        let mut state = self.state.lock();
        match state.slots.get_mut(slot) {
            Some(s) => s.check(now, &self.config),
            None => false,
        }
    }

    /// Advance the cursor once and reserve that slot if it is eligible.
    pub fn try_acquire(&self, now: Instant) -> Option<SlotLease<'_>> {
        let mut state = self.state.lock();
        state.cursor = (state.cursor + 1) % state.slots.len();
        let id = state.cursor;
        let slot = &mut state.slots[id];
        if !slot.check(now, &self.config) {
            return None;
        }
        slot.in_flight += 1;
        slot.last_request = Some(now);
        trace!("reserved slot {id}");
        Some(SlotLease {
            pool: self,
            slot: id,
            settled: false,
        })
    }

    /// Wait until some slot is eligible and reserve it.
    /// Polls every `poll_interval_ms`, moving to the next slot each time.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<SlotLease<'_>, AcquireError> {
        let started = Instant::now();
        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        loop {
            cancel.checkpoint()?;
            if let Some(lease) = self.try_acquire(Instant::now()) {
                return Ok(lease);
            }
            let waited = started.elapsed();
            if waited >= max_wait {
                debug!("slot pool saturated after {waited:?}");
                return Err(AcquireError::Saturated(waited));
            }
            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .enumerate()
            .map(|(id, s)| SlotSnapshot {
                id,
                request_count: s.request_count,
                in_flight: s.in_flight,
                window_start: s.window_start,
                last_request: s.last_request,
            })
            .collect()
    }

    fn settle(&self, id: usize, how: Settlement) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let slot = &mut state.slots[id];
        slot.in_flight = slot.in_flight.saturating_sub(1);
        match how {
            Settlement::Success => {
                slot.request_count += 1;
                slot.last_request = Some(now);
                slot.window_start.get_or_insert(now);
            }
            Settlement::RateLimited => {
                slot.request_count = self.config.max_requests_per_window;
                slot.last_request = Some(now);
                slot.window_start.get_or_insert(now);
                debug!("slot {id} rate limited, parked until its window resets");
            }
            Settlement::Released => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Success,
    RateLimited,
    Released,
}

/// A reservation on one slot. Settle it with the outcome of the call; a lease
/// dropped without settling only gives its reservation back.
#[must_use = "a lease should be settled with the outcome of the request"]
pub struct SlotLease<'a> {
    pool: &'a SlotPool,
    slot: usize,
    settled: bool,
}

impl SlotLease<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The request went through: count it against the window.
    pub fn succeed(mut self) {
        self.finish(Settlement::Success);
    }

    /// The provider pushed back: take the slot out of rotation for the window.
    pub fn rate_limited(mut self) {
        self.finish(Settlement::RateLimited);
    }

    /// The request failed for another reason.
    pub fn fail(mut self) {
        self.finish(Settlement::Released);
    }

    fn finish(&mut self, how: Settlement) {
        if !self.settled {
            self.settled = true;
            self.pool.settle(self.slot, how);
        }
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        self.finish(Settlement::Released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(slots: usize, max: u32) -> LimiterConfig {
        LimiterConfig {
            slots,
            max_requests_per_window: max,
            ..LimiterConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rotates_round_robin() {
        let pool = SlotPool::new(config(3, 45));
        let now = Instant::now();
        let ids: Vec<usize> = (0..3)
            .map(|_| {
                let lease = pool.try_acquire(now).unwrap();
                let id = lease.slot();
                lease.succeed();
                id
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn enforces_min_interval() {
        let pool = SlotPool::new(config(1, 45));
        pool.try_acquire(Instant::now()).unwrap().succeed();
        assert!(!pool.is_eligible(0, Instant::now()));
        tokio::time::advance(Duration::from_millis(79)).await;
        assert!(!pool.is_eligible(0, Instant::now()));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(pool.is_eligible(0, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn defers_requests_beyond_window_capacity() {
        let pool = SlotPool::new(config(1, 45));
        let cancel = CancelToken::new();
        let started = Instant::now();
        let mut deferred = 0;
        for _ in 0..50 {
            let lease = pool.acquire(&cancel).await.unwrap();
            if started.elapsed() >= Duration::from_secs(60) {
                deferred += 1;
            }
            lease.succeed();
        }
        assert!(deferred >= 5, "only {deferred} requests were deferred");
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_idle_period() {
        let pool = SlotPool::new(config(1, 2));
        pool.try_acquire(Instant::now()).unwrap().succeed();
        tokio::time::advance(Duration::from_millis(100)).await;
        pool.try_acquire(Instant::now()).unwrap().succeed();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(pool.try_acquire(Instant::now()).is_none());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(pool.is_eligible(0, Instant::now()));
        assert_eq!(pool.snapshot()[0].request_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_slot_leaves_rotation() {
        let pool = SlotPool::new(config(2, 45));
        let cancel = CancelToken::new();
        let lease = pool.acquire(&cancel).await.unwrap();
        assert_eq!(lease.slot(), 0);
        lease.rate_limited();
        assert_eq!(pool.snapshot()[0].request_count, 45);
        for _ in 0..10 {
            let lease = pool.acquire(&cancel).await.unwrap();
            assert_eq!(lease.slot(), 1);
            lease.succeed();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_requests_count_against_capacity() {
        let pool = SlotPool::new(config(1, 1));
        let held = pool.try_acquire(Instant::now()).unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(pool.try_acquire(Instant::now()).is_none());
        drop(held);
        assert_eq!(pool.snapshot()[0].in_flight, 0);
        assert_eq!(pool.snapshot()[0].request_count, 0);
        assert!(pool.try_acquire(Instant::now()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_saturated() {
        let pool = SlotPool::new(LimiterConfig {
            max_wait_ms: 500,
            ..config(1, 1)
        });
        let cancel = CancelToken::new();
        pool.acquire(&cancel).await.unwrap().succeed();
        let err = pool.acquire(&cancel).await.err().unwrap();
        assert!(matches!(err, AcquireError::Saturated(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_waiting_when_cancelled() {
        let pool = SlotPool::new(config(1, 45));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = pool.acquire(&cancel).await.err().unwrap();
        assert_eq!(err, AcquireError::Cancelled(Cancelled::Requested));
    }
}
