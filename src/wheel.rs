use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use crate::arena::{EntryArena, Key};
use crate::bucket::{self, Bucket};
use crate::queue::DelayQueue;
use crate::TimerTask;

pub(crate) const WHEEL_BITS: u32 = 6;
pub(crate) const WHEEL_SIZE: usize = 1 << WHEEL_BITS;
const SLOT_MASK: i64 = WHEEL_SIZE as i64 - 1;

/// One level of the hierarchical wheel: 64 buckets spanning
/// `tick * 64` milliseconds, with a lazily created coarser level above it.
///
/// The base level ticks at 1ms; level `k` ticks at `1 << 6k` ms, so slot
/// arithmetic is pure shift-and-mask. Buckets are allocated once and owned
/// by their level for the wheel's entire lifetime.
pub(crate) struct Wheel {
    tick_ms: i64,
    interval_ms: i64,
    level: u32,
    shift: u32,
    current_time: i64,
    buckets: Vec<Arc<Bucket>>,
    overflow: Option<Box<Wheel>>,
    queue: Arc<DelayQueue<Arc<Bucket>>>,
    counter: Arc<AtomicI64>,
}

impl Wheel {
    pub(crate) fn new(
        start_ms: i64,
        queue: Arc<DelayQueue<Arc<Bucket>>>,
        counter: Arc<AtomicI64>,
    ) -> Self {
        Self::with_level(0, start_ms, queue, counter)
    }

    fn with_level(
        level: u32,
        start_ms: i64,
        queue: Arc<DelayQueue<Arc<Bucket>>>,
        counter: Arc<AtomicI64>,
    ) -> Self {
        let shift = level * WHEEL_BITS;
        let tick_ms = 1i64 << shift;
        // Level 10 would shift past i64; the top level absorbs every longer
        // delay instead of recursing further.
        let interval_ms = if shift + WHEEL_BITS >= 63 {
            i64::MAX
        } else {
            1i64 << (shift + WHEEL_BITS)
        };
        let buckets = (0..WHEEL_SIZE)
            .map(|_| Arc::new(Bucket::new(Arc::clone(&counter))))
            .collect();

        Self {
            tick_ms,
            interval_ms,
            level,
            shift,
            current_time: start_ms - start_ms % tick_ms,
            buckets,
            overflow: None,
            queue,
            counter,
        }
    }

    /// Place an entry in the hierarchy.
    ///
    /// Returns false — the fire-now signal — if the entry is already
    /// cancelled or already due at this level's granularity. Otherwise the
    /// entry lands in a bucket at this or a coarser level and true is
    /// returned.
    pub(crate) fn add(&mut self, arena: &mut EntryArena, key: Key) -> bool {
        if arena.is_cancelled(key) {
            return false;
        }
        let Some(expiration_ms) = arena.entries.get(key).map(|cell| cell.expiration_ms) else {
            return false;
        };
        if expiration_ms - self.current_time < self.tick_ms {
            return false;
        }
        self.place(arena, key, expiration_ms);
        true
    }

    /// Bucket placement shared with wheel-to-wheel cascading, which has
    /// already performed the cancelled/due checks.
    fn place(&mut self, arena: &mut EntryArena, key: Key, expiration_ms: i64) {
        let delay = expiration_ms - self.current_time;
        if delay < self.interval_ms {
            let slot = ((delay >> self.shift) & SLOT_MASK) as usize;
            let bucket = &self.buckets[slot];
            bucket::add(bucket, arena, key);

            let armed = (slot as i64) * self.tick_ms + self.current_time;
            if bucket.set_expiration(armed) {
                // armed >= current_time >= 0, always a valid queue key
                let _ = self.queue.offer(Arc::clone(bucket));
            }
        } else {
            if self.overflow.is_none() {
                self.overflow = Some(Box::new(Wheel::with_level(
                    self.level + 1,
                    self.current_time,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.counter),
                )));
            }
            if let Some(overflow) = self.overflow.as_deref_mut() {
                overflow.place(arena, key, expiration_ms);
            }
        }
    }

    /// Advance this level's clock to `time_ms` floored to a tick boundary,
    /// propagating the advanced time upward. A no-op for anything less than
    /// one tick ahead, so non-increasing inputs are harmless.
    pub(crate) fn advance_clock(&mut self, time_ms: i64) {
        if time_ms >= self.current_time + self.tick_ms {
            self.current_time = time_ms - time_ms % self.tick_ms;
            if let Some(overflow) = self.overflow.as_deref_mut() {
                overflow.advance_clock(self.current_time);
            }
        }
    }

    /// Visit every live task currently parked in the hierarchy.
    pub(crate) fn for_each(&self, arena: &EntryArena, visit: &mut impl FnMut(&Arc<dyn TimerTask>)) {
        for bucket in &self.buckets {
            bucket.for_each(arena, &mut *visit);
        }
        if let Some(overflow) = &self.overflow {
            overflow.for_each(arena, visit);
        }
    }

    #[cfg(test)]
    fn current_time_ms(&self) -> i64 {
        self.current_time
    }

    #[cfg(test)]
    fn overflow_level(&self) -> Option<&Wheel> {
        self.overflow.as_deref()
    }
}
