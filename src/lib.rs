//! Hierarchical timing-wheel timer.
//!
//! Schedules large numbers of delayed, cancellable tasks and fires them in
//! expiration order with O(1) amortized insert/cancel/advance, instead of
//! the O(log n) of heap-based timers. Built for workloads tracking tens of
//! thousands of concurrent timeouts — heartbeats, retries, lease
//! expirations — without per-timer allocation churn.
//!
//! The structure is passive: no threads, no clock reads. A driver calls
//! [`WheelTimer::advance_clock`] with its own non-decreasing timestamps, and
//! due tasks execute synchronously on that thread. Delays beyond a level's
//! 64-slot span overflow into lazily created coarser levels; when a coarse
//! bucket comes due its contents cascade back down into finer slots, so
//! every task eventually fires within one tick of its expiration.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
//! use tierwheel::{TimerTask, WheelTimer};
//!
//! struct Heartbeat {
//!     id: AtomicU64,
//!     beats: AtomicUsize,
//! }
//!
//! impl TimerTask for Heartbeat {
//!     fn set_id(&self, id: u64) {
//!         self.id.store(id, Ordering::SeqCst);
//!     }
//!
//!     fn id(&self) -> u64 {
//!         self.id.load(Ordering::SeqCst)
//!     }
//!
//!     fn execute(&self) {
//!         self.beats.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let timer = WheelTimer::new("heartbeats", 0);
//! let beat = Arc::new(Heartbeat {
//!     id: AtomicU64::new(0),
//!     beats: AtomicUsize::new(0),
//! });
//!
//! timer.add(beat.clone(), 250);
//! assert!(!timer.advance_clock(100));
//! assert!(timer.advance_clock(250));
//! assert_eq!(beat.beats.load(Ordering::SeqCst), 1);
//! ```

mod arena;
mod bucket;
mod queue;
mod timer;
mod wheel;

pub use queue::{DelayQueue, Delayed, NegativeDelay};
pub use timer::WheelTimer;

/// A caller-owned task schedulable on a [`WheelTimer`].
///
/// The timer assigns the id at schedule time via [`set_id`](Self::set_id)
/// and later uses [`id`](Self::id) to resolve cancellations; callers must
/// store it faithfully and never mutate it themselves.
///
/// [`execute`](Self::execute) runs at most once per successful schedule,
/// synchronously on whichever thread is advancing the clock (or on the
/// scheduling thread, for sub-tick delays), with the timer's lock held.
/// Implementations must not call back into the same timer from `execute`.
pub trait TimerTask: Send + Sync {
    fn set_id(&self, id: u64);

    fn id(&self) -> u64;

    fn execute(&self);
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::TimerTask;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    pub(crate) struct RecordingTask {
        id: AtomicU64,
        fired: AtomicUsize,
    }

    impl RecordingTask {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                id: AtomicU64::new(0),
                fired: AtomicUsize::new(0),
            })
        }

        pub(crate) fn fire_count(&self) -> usize {
            self.fired.load(Ordering::SeqCst)
        }
    }

    impl TimerTask for RecordingTask {
        fn set_id(&self, id: u64) {
            self.id.store(id, Ordering::SeqCst);
        }

        fn id(&self) -> u64 {
            self.id.load(Ordering::SeqCst)
        }

        fn execute(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) struct PanickingTask {
        id: AtomicU64,
    }

    impl PanickingTask {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                id: AtomicU64::new(0),
            })
        }
    }

    impl TimerTask for PanickingTask {
        fn set_id(&self, id: u64) {
            self.id.store(id, Ordering::SeqCst);
        }

        fn id(&self) -> u64 {
            self.id.load(Ordering::SeqCst)
        }

        fn execute(&self) {
            panic!("task failure");
        }
    }
}
