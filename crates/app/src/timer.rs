//! The software timer — a named, epoch-ordered, one-shot timer queue.
//!
//! Every time-based behavior in the core runs through this scheduler:
//! schedule-rule boundaries, delayed enable/disable, motion reset
//! timers, and fade steps. The queue is an authoritative
//! `BTreeMap<expiration_ms, entry>`; correctness after any mutation is
//! re-derived from the map rather than from cached sleep targets, and a
//! [`Notify`] wakes the run loop so a newly created earlier deadline is
//! never slept past.
//!
//! Owner semantics: creating a timer replaces any existing timer for the
//! same owner, except for the [`OWNER_SCHEDULER`] and [`OWNER_API`]
//! owners, which may hold many entries concurrently (one per schedule
//! boundary, one per in-flight delayed API command).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tracing::{debug, error};

/// Owner of schedule-boundary timers; exempt from single-timer-per-owner.
pub const OWNER_SCHEDULER: &str = "scheduler";
/// Owner of API-created delayed commands; exempt from single-timer-per-owner.
pub const OWNER_API: &str = "api";

/// Above this delay the loop parks on a long preemptible sleep; below it,
/// it spins with short cooperative yields.
const LONG_SLEEP_THRESHOLD_MS: u64 = 1000;
const YIELD_MS: u64 = 10;
/// Bound on +1 ms collision probing before falling back to a slot past
/// the end of the queue.
const MAX_PROBES: u64 = 1000;

/// A timer callback. Must be short or hand further work back to the
/// scheduler; the run loop awaits callbacks one at a time.
pub type TimerCallback = std::sync::Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct TimerEntry {
    owner: String,
    callback: TimerCallback,
}

#[derive(Default)]
struct TimerState {
    map: BTreeMap<u64, TimerEntry>,
    /// Monotonic fallback slot used when probing exceeds [`MAX_PROBES`].
    fallback: u64,
}

/// The cooperative timer scheduler.
pub struct SoftwareTimer {
    state: Mutex<TimerState>,
    wake: Notify,
    epoch_base_ms: u64,
    started: tokio::time::Instant,
}

impl Default for SoftwareTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareTimer {
    /// Create a scheduler anchored to the current wall clock.
    ///
    /// Elapsed time is measured with [`tokio::time::Instant`] so the
    /// queue keeps working under a paused test clock.
    #[must_use]
    pub fn new() -> Self {
        let epoch_base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(0))
            .unwrap_or(0);
        Self {
            state: Mutex::new(TimerState::default()),
            wake: Notify::new(),
            epoch_base_ms,
            started: tokio::time::Instant::now(),
        }
    }

    /// Current epoch milliseconds as seen by this scheduler.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.epoch_base_ms.saturating_add(elapsed)
    }

    /// Create a one-shot timer firing `period_ms` from now.
    pub fn create(&self, period_ms: u64, callback: TimerCallback, owner: &str) {
        self.create_at(self.now_ms().saturating_add(period_ms), callback, owner);
    }

    /// Create a one-shot timer at an absolute epoch deadline.
    ///
    /// If the slot is taken the expiration is probed upward 1 ms at a
    /// time (bounded), preserving creation order among identical
    /// requests. Unless `owner` is exempt, existing entries for the same
    /// owner are removed first.
    pub fn create_at(&self, expiration_ms: u64, callback: TimerCallback, owner: &str) {
        {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if owner != OWNER_SCHEDULER && owner != OWNER_API {
                state.map.retain(|_, entry| entry.owner != owner);
            }
            let mut slot = expiration_ms;
            let mut probes = 0;
            while state.map.contains_key(&slot) {
                probes += 1;
                if probes > MAX_PROBES {
                    // Pathological clustering: jump past everything.
                    let past_end = state
                        .map
                        .last_key_value()
                        .map_or(slot, |(last, _)| last.saturating_add(1));
                    slot = past_end.max(state.fallback.saturating_add(1));
                    break;
                }
                slot += 1;
            }
            state.fallback = state.fallback.max(slot);
            debug!(owner, expiration_ms = slot, "timer created");
            state.map.insert(
                slot,
                TimerEntry {
                    owner: owner.to_string(),
                    callback,
                },
            );
        }
        // The loop may be parked on a later deadline; make it re-derive
        // its sleep target from the map.
        self.wake.notify_one();
    }

    /// Convenience wrapper building the boxed callback from an async
    /// closure.
    pub fn schedule<F, Fut>(&self, period_ms: u64, owner: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.create(period_ms, std::sync::Arc::new(move || f().boxed()), owner);
    }

    /// Like [`Self::schedule`] with an absolute epoch deadline.
    pub fn schedule_at<F, Fut>(&self, expiration_ms: u64, owner: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.create_at(expiration_ms, std::sync::Arc::new(move || f().boxed()), owner);
    }

    /// Remove all timers belonging to `owner`. Safe when none exist.
    pub fn cancel(&self, owner: &str) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = state.map.len();
        state.map.retain(|_, entry| entry.owner != owner);
        if state.map.len() != before {
            debug!(owner, removed = before - state.map.len(), "timers canceled");
        }
        drop(state);
        self.wake.notify_one();
    }

    /// Number of live entries for `owner`.
    #[must_use]
    pub fn pending(&self, owner: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.map.values().filter(|e| e.owner == owner).count()
    }

    /// All live expirations, ascending.
    #[must_use]
    pub fn expirations(&self) -> Vec<u64> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.map.keys().copied().collect()
    }

    /// The cooperative run loop. Runs forever; spawn it once per node.
    ///
    /// Each wake it executes every due callback in ascending expiration
    /// order, then parks until the next deadline (preemptible by
    /// [`Self::create_at`]) or until a timer exists at all. A callback
    /// panic is contained and logged; the loop continues.
    pub async fn run(&self) {
        loop {
            let due = self.take_due();
            for (expiration, entry) in due {
                debug!(owner = %entry.owner, expiration, "timer fired");
                let callback = std::sync::Arc::clone(&entry.callback);
                if let Err(err) = tokio::spawn(callback()).await {
                    error!(owner = %entry.owner, %err, "timer callback panicked");
                }
            }

            let next = {
                let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                state.map.first_key_value().map(|(k, _)| *k)
            };
            match next {
                None => self.wake.notified().await,
                Some(next) => {
                    let delay = next.saturating_sub(self.now_ms());
                    if delay > LONG_SLEEP_THRESHOLD_MS {
                        tokio::select! {
                            () = tokio::time::sleep(Duration::from_millis(delay)) => {}
                            () = self.wake.notified() => {}
                        }
                    } else if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay.min(YIELD_MS))).await;
                    }
                }
            }
        }
    }

    /// Atomically remove and return every entry due at or before now.
    /// Entries canceled concurrently simply no longer appear.
    fn take_due(&self) -> BTreeMap<u64, TimerEntry> {
        let now = self.now_ms();
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let later = state.map.split_off(&now.saturating_add(1));
        std::mem::replace(&mut state.map, later)
    }
}

impl std::fmt::Debug for SoftwareTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("SoftwareTimer")
            .field("pending", &state.map.len())
            .finish()
    }
}
