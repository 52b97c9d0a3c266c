use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Item with a comparable delay key, expressed as an absolute timestamp in
/// milliseconds.
pub trait Delayed {
    fn delay_ms(&self) -> i64;
}

impl<T: Delayed + ?Sized> Delayed for Arc<T> {
    fn delay_ms(&self) -> i64 {
        (**self).delay_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delay must be non-negative, got {0}ms")]
pub struct NegativeDelay(pub i64);

struct QueueEntry<T> {
    key: i64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior on top of BinaryHeap; ties break
        // FIFO by offer sequence.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner<T> {
    heap: BinaryHeap<QueueEntry<T>>,
    seq: u64,
}

/// Thread-safe min-priority queue over items exposing a delay key.
///
/// The key is snapshotted when the item is offered and orders the heap; the
/// conditional pop re-reads the item's live key, so an item whose key moved
/// later while it sat in the heap is held back until its new key comes due.
/// Items whose key changes are expected to be re-offered as well.
///
/// There is no blocking dequeue. [`DelayQueue::poll_expired`] is a
/// non-blocking conditional pop; callers drive time forward themselves.
pub struct DelayQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                seq: 0,
            }),
        }
    }

    /// Insert an item keyed by its current delay.
    ///
    /// Fails synchronously if the key is negative; the queue is left
    /// untouched.
    pub fn offer(&self, item: T) -> Result<(), NegativeDelay>
    where
        T: Delayed,
    {
        let key = item.delay_ms();
        if key < 0 {
            return Err(NegativeDelay(key));
        }
        let mut inner = self.inner.lock();
        let seq = inner.seq;
        inner.seq += 1;
        inner.heap.push(QueueEntry { key, seq, item });
        Ok(())
    }

    /// Non-mutating read of the minimum item.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().heap.peek().map(|e| e.item.clone())
    }

    /// Key of the minimum item, if any.
    pub fn peek_key(&self) -> Option<i64> {
        self.inner.lock().heap.peek().map(|e| e.key)
    }

    /// Pop the minimum item only if its live key is `<= bound_ms`; otherwise
    /// the queue is left untouched.
    pub fn poll_expired(&self, bound_ms: i64) -> Option<T>
    where
        T: Delayed,
    {
        let mut inner = self.inner.lock();
        let due = inner
            .heap
            .peek()
            .is_some_and(|first| first.item.delay_ms() <= bound_ms);
        if due {
            inner.heap.pop().map(|entry| entry.item)
        } else {
            None
        }
    }

    /// Unconditional pop of the minimum item.
    pub fn poll(&self) -> Option<T> {
        self.inner.lock().heap.pop().map(|e| e.item)
    }

    pub fn clear(&self) {
        self.inner.lock().heap.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }
}
