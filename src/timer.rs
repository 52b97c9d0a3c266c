use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::{EntryArena, EntryCell, Key, TaskCell};
use crate::bucket::{self, Bucket};
use crate::queue::DelayQueue;
use crate::wheel::Wheel;
use crate::TimerTask;

struct TimerInner {
    arena: EntryArena,
    registry: HashMap<u64, Key>,
    next_id: u64,
    curr_ms: i64,
    wheel: Wheel,
}

/// Hierarchical timing-wheel timer.
///
/// A passive structure: it holds no threads and reads no clocks. Callers
/// schedule with [`add`](WheelTimer::add), cancel with
/// [`remove`](WheelTimer::remove), and drive time forward with
/// [`advance_clock`](WheelTimer::advance_clock) using their own
/// non-decreasing notion of "now".
///
/// One coarse lock serializes scheduling, cancellation, and advancement
/// against each other; the delay queue and each wheel bucket carry their own
/// independent locks. Entry and wrapper cells are pooled and recycled, so a
/// steady schedule/fire workload stops allocating once warmed up.
pub struct WheelTimer {
    name: String,
    counter: Arc<AtomicI64>,
    queue: Arc<DelayQueue<Arc<Bucket>>>,
    inner: Mutex<TimerInner>,
}

impl WheelTimer {
    /// Create a timer starting at `start_ms`, with its own live-task
    /// counter.
    pub fn new(name: impl Into<String>, start_ms: i64) -> Self {
        Self::with_counter(name, start_ms, Arc::new(AtomicI64::new(0)))
    }

    /// Create a timer sharing an externally owned live-task counter, for
    /// callers aggregating diagnostics across several timers.
    pub fn with_counter(
        name: impl Into<String>,
        start_ms: i64,
        counter: Arc<AtomicI64>,
    ) -> Self {
        debug_assert!(start_ms >= 0, "start_ms must be non-negative");
        let queue = Arc::new(DelayQueue::new());
        let wheel = Wheel::new(start_ms, Arc::clone(&queue), Arc::clone(&counter));
        Self {
            name: name.into(),
            counter,
            queue,
            inner: Mutex::new(TimerInner {
                arena: EntryArena::new(),
                registry: HashMap::new(),
                next_id: 0,
                curr_ms: start_ms,
                wheel,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedule `task` to execute `delay_ms` from the timer's current time.
    ///
    /// Assigns the task its id, then either parks it in a wheel bucket or —
    /// when the delay is below one tick — executes it immediately on the
    /// calling thread.
    pub fn add(&self, task: Arc<dyn TimerTask>, delay_ms: i64) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.wrapping_add(1);
        let id = inner.next_id;
        task.set_id(id);
        let expiration_ms = inner.curr_ms.saturating_add(delay_ms);
        tracing::trace!(timer = %self.name, task_id = id, delay_ms, "scheduling task");

        let TimerInner {
            ref mut arena,
            ref mut registry,
            ref mut wheel,
            ..
        } = *inner;
        let task_key = arena.tasks.insert(TaskCell {
            task: Some(task),
            entry: None,
        });
        let entry_key = arena.entries.insert(EntryCell::new(expiration_ms, task_key));
        if let Some(cell) = arena.tasks.get_mut(task_key) {
            cell.entry = Some(entry_key);
        }
        registry.insert(id, entry_key);
        add_or_fire(arena, wheel, registry, entry_key);
    }

    /// Cancel a previously scheduled task.
    ///
    /// Returns true if the task was still pending. A task that was never
    /// added, already fired, or already removed is a no-op.
    pub fn remove(&self, task: &dyn TimerTask) -> bool {
        let mut inner = self.inner.lock();
        let id = task.id();
        let TimerInner {
            ref mut arena,
            ref mut registry,
            ..
        } = *inner;
        let Some(&entry_key) = registry.get(&id) else {
            return false;
        };
        let task_key = arena.entries.get(entry_key).and_then(|cell| cell.task_cell);
        if let Some(task_key) = task_key {
            cancel_task_cell(arena, task_key);
        }
        recycle(arena, entry_key, task_key);
        registry.remove(&id);
        tracing::trace!(timer = %self.name, task_id = id, "cancelled task");
        true
    }

    /// Advance the timer's clock to `bound_ms`, firing every task whose
    /// expiration is at or before it.
    ///
    /// Pops due buckets from the delay queue; each popped bucket first
    /// advances the wheel hierarchy to its expiration, then re-dispatches
    /// its entries — cascading them into finer buckets, executing the due
    /// ones on this thread, discarding the cancelled ones. Returns whether
    /// any bucket was processed.
    ///
    /// Successive bounds must be non-decreasing.
    pub fn advance_clock(&self, bound_ms: i64) -> bool {
        let mut inner = self.inner.lock();
        inner.curr_ms = bound_ms;
        let mut advanced = false;
        while let Some(bucket) = self.queue.poll_expired(bound_ms) {
            advanced = true;
            let TimerInner {
                ref mut arena,
                ref mut registry,
                ref mut wheel,
                ..
            } = *inner;
            wheel.advance_clock(bucket.expiration());
            bucket.flush(arena, |arena, key| {
                add_or_fire(arena, wheel, registry, key);
            });
        }
        if advanced {
            tracing::trace!(timer = %self.name, bound_ms, "advanced clock");
        }
        advanced
    }

    /// Live-task count, for diagnostics. Not used for firing correctness.
    pub fn pending(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Visit every task still parked in the wheel, skipping cancelled
    /// entries. Inspection only; the timer lock is held for the duration.
    pub fn for_each_pending(&self, mut visit: impl FnMut(&Arc<dyn TimerTask>)) {
        let inner = self.inner.lock();
        inner.wheel.for_each(&inner.arena, &mut visit);
    }

    /// Tear down: drain the delay queue unconditionally, cancelling every
    /// remaining task without executing it. Also runs on drop; idempotent.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        let mut dropped = 0usize;
        while let Some(bucket) = self.queue.poll() {
            let TimerInner {
                ref mut arena,
                ref mut registry,
                ..
            } = *inner;
            bucket.flush(arena, |arena, key| {
                let task_key = arena.entries.get(key).and_then(|cell| cell.task_cell);
                if let Some(task_key) = task_key {
                    if let Some(task) = cancel_task_cell(arena, task_key) {
                        registry.remove(&task.id());
                    }
                }
                recycle(arena, key, task_key);
                dropped += 1;
            });
        }
        inner.registry.clear();
        if dropped > 0 {
            tracing::debug!(timer = %self.name, dropped, "disposed timer");
        }
    }

    #[cfg(test)]
    fn allocated_cells(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.arena.entries.allocated(), inner.arena.tasks.allocated())
    }
}

impl Drop for WheelTimer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Shared add-or-fire dispatch used by `add` and by bucket flushes during
/// advancement.
///
/// When the wheel reports the entry belongs in no bucket, a live entry is
/// due: deregister it, cancel its wrapper, and execute the task on this
/// thread. Due or cancelled, both cells return to their pools afterwards.
fn add_or_fire(
    arena: &mut EntryArena,
    wheel: &mut Wheel,
    registry: &mut HashMap<u64, Key>,
    key: Key,
) {
    if wheel.add(arena, key) {
        return;
    }
    let task_key = arena.entries.get(key).and_then(|cell| cell.task_cell);
    if !arena.is_cancelled(key) {
        if let Some(task_key) = task_key {
            if let Some(task) = cancel_task_cell(arena, task_key) {
                registry.remove(&task.id());
                run_task(&task);
            }
        }
    }
    recycle(arena, key, task_key);
}

/// Cancel a task wrapper: detach its entry from whatever bucket holds it,
/// clear both cross-references, and hand back the task.
fn cancel_task_cell(arena: &mut EntryArena, task_key: Key) -> Option<Arc<dyn TimerTask>> {
    let entry_key = arena.tasks.get(task_key)?.entry;
    if let Some(entry_key) = entry_key {
        bucket::detach(arena, entry_key);
    }
    let cell = arena.tasks.get_mut(task_key)?;
    cell.entry = None;
    cell.task.take()
}

fn recycle(arena: &mut EntryArena, entry_key: Key, task_key: Option<Key>) {
    arena.entries.remove(entry_key);
    if let Some(task_key) = task_key {
        arena.tasks.remove(task_key);
    }
}

fn run_task(task: &Arc<dyn TimerTask>) {
    let task_id = task.id();
    if catch_unwind(AssertUnwindSafe(|| task.execute())).is_err() {
        tracing::error!(task_id, "timer task panicked during execute");
    }
}
