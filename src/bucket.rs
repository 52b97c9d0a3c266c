use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::{EntryArena, Key};
use crate::queue::Delayed;
use crate::TimerTask;

/// Expiration value of a bucket that is not currently armed.
pub(crate) const UNSET_EXPIRATION: i64 = -1;

struct LinkState {
    head: Option<Key>,
    tail: Option<Key>,
}

/// One wheel slot: a doubly-linked list of arena entries sharing an
/// expiration window, plus the atomically swapped expiration used as the
/// delay-queue sort key.
///
/// Each bucket has its own lock, independent of every other bucket and of
/// the timer's lock. The lock guards the head/tail pair and the link fields
/// of the entries currently in the list. Buckets are created once per wheel
/// level and reused for the wheel's entire lifetime; a flush empties the
/// list and disarms the expiration so the same bucket serves the next
/// revolution.
pub(crate) struct Bucket {
    expiration_ms: AtomicI64,
    counter: Arc<AtomicI64>,
    list: Mutex<LinkState>,
}

impl Bucket {
    pub(crate) fn new(counter: Arc<AtomicI64>) -> Self {
        Self {
            expiration_ms: AtomicI64::new(UNSET_EXPIRATION),
            counter,
            list: Mutex::new(LinkState {
                head: None,
                tail: None,
            }),
        }
    }

    /// Unlink an entry. No-op unless the entry currently belongs to this
    /// bucket.
    pub(crate) fn remove(&self, arena: &mut EntryArena, key: Key) {
        let mut list = self.list.lock();
        let (prev, next) = {
            let Some(cell) = arena.entries.get(key) else {
                return;
            };
            match &cell.bucket {
                Some(owner) if std::ptr::eq(Arc::as_ptr(owner), self) => (cell.prev, cell.next),
                _ => return,
            }
        };
        match prev {
            Some(prev_key) => {
                if let Some(prev_cell) = arena.entries.get_mut(prev_key) {
                    prev_cell.next = next;
                }
            }
            None => list.head = next,
        }
        match next {
            Some(next_key) => {
                if let Some(next_cell) = arena.entries.get_mut(next_key) {
                    next_cell.prev = prev;
                }
            }
            None => list.tail = prev,
        }
        if let Some(cell) = arena.entries.get_mut(key) {
            cell.prev = None;
            cell.next = None;
            cell.bucket = None;
        }
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }

    /// Drain the list head-first, fully unlinking each entry before handing
    /// it to the visitor, then disarm the expiration.
    ///
    /// Unlink-before-visit means the visitor may re-add the entry to any
    /// bucket (including this one) without corrupting the traversal.
    pub(crate) fn flush(&self, arena: &mut EntryArena, mut visit: impl FnMut(&mut EntryArena, Key)) {
        loop {
            let head = self.list.lock().head;
            match head {
                Some(key) => {
                    self.remove(arena, key);
                    visit(arena, key);
                }
                None => break,
            }
        }
        self.expiration_ms
            .store(UNSET_EXPIRATION, Ordering::SeqCst);
    }

    /// Read-only traversal of the live tasks in this bucket, skipping
    /// cancelled entries.
    pub(crate) fn for_each(&self, arena: &EntryArena, mut visit: impl FnMut(&Arc<dyn TimerTask>)) {
        let list = self.list.lock();
        let mut cursor = list.head;
        while let Some(key) = cursor {
            let Some(cell) = arena.entries.get(key) else {
                break;
            };
            cursor = cell.next;
            if arena.is_cancelled(key) {
                continue;
            }
            let task = cell
                .task_cell
                .and_then(|task_key| arena.tasks.get(task_key))
                .and_then(|task_cell| task_cell.task.as_ref());
            if let Some(task) = task {
                visit(task);
            }
        }
    }

    /// Swap the expiration; true iff the value changed. The owning wheel
    /// re-offers the bucket to the delay queue exactly when this reports a
    /// change, so a bucket already due at the same timestamp is never queued
    /// twice.
    #[inline]
    pub(crate) fn set_expiration(&self, expiration_ms: i64) -> bool {
        self.expiration_ms.swap(expiration_ms, Ordering::SeqCst) != expiration_ms
    }

    #[inline]
    pub(crate) fn expiration(&self) -> i64 {
        self.expiration_ms.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn len(&self, arena: &EntryArena) -> usize {
        let list = self.list.lock();
        let mut count = 0;
        let mut cursor = list.head;
        while let Some(key) = cursor {
            count += 1;
            cursor = arena.entries.get(key).and_then(|cell| cell.next);
        }
        count
    }
}

impl Delayed for Bucket {
    fn delay_ms(&self) -> i64 {
        self.expiration()
    }
}

/// Append an entry at the tail of `bucket`, unlinking it from any prior
/// bucket first. Re-adding an entry already in the same bucket relinks it
/// without duplication.
pub(crate) fn add(bucket: &Arc<Bucket>, arena: &mut EntryArena, key: Key) {
    loop {
        detach(arena, key);

        let mut list = bucket.list.lock();
        let tail = list.tail;
        let Some(cell) = arena.entries.get_mut(key) else {
            return;
        };
        if cell.bucket.is_some() {
            // Claimed again between the detach and taking our lock.
            continue;
        }
        cell.bucket = Some(Arc::clone(bucket));
        cell.prev = tail;
        cell.next = None;
        match tail {
            Some(tail_key) => {
                if let Some(tail_cell) = arena.entries.get_mut(tail_key) {
                    tail_cell.next = Some(key);
                }
            }
            None => list.head = Some(key),
        }
        list.tail = Some(key);
        bucket.counter.fetch_add(1, Ordering::SeqCst);
        return;
    }
}

/// Remove an entry from whatever bucket currently claims it, repeating until
/// no bucket does. Tolerates the entry being relocated between buckets while
/// the cancellation is in flight.
pub(crate) fn detach(arena: &mut EntryArena, key: Key) {
    loop {
        let Some(owner) = arena.entries.get(key).and_then(|cell| cell.bucket.clone()) else {
            return;
        };
        owner.remove(arena, key);
    }
}
