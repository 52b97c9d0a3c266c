use std::sync::Arc;

use crate::bucket::Bucket;
use crate::TimerTask;

/// Generation-checked handle into a [`Pool`].
///
/// A key is only valid while the slot it names holds the value it was issued
/// for; freeing the slot bumps the generation and every outstanding key for
/// it goes stale. Stale keys resolve to `None`, never to a recycled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

struct PoolSlot<T> {
    generation: u32,
    value: Option<T>,
}

/// Growable slab with a LIFO free-index stack.
///
/// Freed slots keep their storage and are reused most-recently-freed first,
/// so a steady schedule/fire workload stops allocating once warmed up.
pub(crate) struct Pool<T> {
    slots: Vec<PoolSlot<T>>,
    free: Vec<u32>,
}

impl<T> Pool<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> Key {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Key {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(PoolSlot {
            generation: 0,
            value: Some(value),
        });
        Key {
            index,
            generation: 0,
        }
    }

    /// Free the slot named by `key`, returning its value. Stale or already
    /// freed keys are a no-op.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation || slot.value.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        slot.value.take()
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    /// Number of slots ever allocated, live or free.
    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.slots.len()
    }
}

/// Scheduling record: absolute expiration plus the intrusive list state.
///
/// `prev`/`next` are only meaningful while `bucket` is set; the owning
/// bucket's lock guards all three.
pub(crate) struct EntryCell {
    pub(crate) expiration_ms: i64,
    pub(crate) task_cell: Option<Key>,
    pub(crate) bucket: Option<Arc<Bucket>>,
    pub(crate) prev: Option<Key>,
    pub(crate) next: Option<Key>,
}

impl EntryCell {
    pub(crate) fn new(expiration_ms: i64, task_cell: Key) -> Self {
        Self {
            expiration_ms,
            task_cell: Some(task_cell),
            bucket: None,
            prev: None,
            next: None,
        }
    }
}

/// Pooled wrapper owning the caller's task reference and the back-reference
/// to its current entry.
pub(crate) struct TaskCell {
    pub(crate) task: Option<Arc<dyn TimerTask>>,
    pub(crate) entry: Option<Key>,
}

/// The two pools behind the timer: entries and task wrappers.
pub(crate) struct EntryArena {
    pub(crate) entries: Pool<EntryCell>,
    pub(crate) tasks: Pool<TaskCell>,
}

impl EntryArena {
    pub(crate) fn new() -> Self {
        Self {
            entries: Pool::new(),
            tasks: Pool::new(),
        }
    }

    /// Structural cancellation check.
    ///
    /// An entry is cancelled when its task cell no longer names it as the
    /// current entry AND no longer holds a task. There is no cancelled flag;
    /// a stale key on either side of the pair classifies the same way, which
    /// keeps freshly recycled cells inert.
    pub(crate) fn is_cancelled(&self, entry_key: Key) -> bool {
        let Some(entry) = self.entries.get(entry_key) else {
            return true;
        };
        let Some(task_key) = entry.task_cell else {
            return true;
        };
        let Some(task_cell) = self.tasks.get(task_key) else {
            return true;
        };
        task_cell.entry != Some(entry_key) && task_cell.task.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::RecordingTask;

    // ==================== Pool ====================

    #[test]
    fn test_insert_get_remove() {
        let mut pool: Pool<u32> = Pool::new();

        let key = pool.insert(42);
        assert_eq!(pool.get(key), Some(&42));
        assert_eq!(pool.len(), 1);

        assert_eq!(pool.remove(key), Some(42));
        assert_eq!(pool.get(key), None);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_stale_key_after_reuse() {
        let mut pool: Pool<u32> = Pool::new();

        let old = pool.insert(1);
        pool.remove(old);
        let new = pool.insert(2);

        // Same slot, different generation.
        assert_ne!(old, new);
        assert_eq!(pool.get(old), None);
        assert_eq!(pool.get(new), Some(&2));
        assert_eq!(pool.remove(old), None);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_free_list_lifo_reuse() {
        let mut pool: Pool<u32> = Pool::new();

        let keys: Vec<_> = (0..3).map(|i| pool.insert(i)).collect();
        for key in &keys {
            pool.remove(*key);
        }

        // Last freed slot is handed out first.
        let reused = pool.insert(100);
        assert_eq!(pool.get(reused), Some(&100));
        assert_eq!(pool.allocated(), 3);
    }

    #[test]
    fn test_allocated_stays_flat_under_churn() {
        let mut pool: Pool<u32> = Pool::new();

        for i in 0..1000 {
            let key = pool.insert(i);
            pool.remove(key);
        }

        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_double_remove_is_noop() {
        let mut pool: Pool<u32> = Pool::new();

        let key = pool.insert(7);
        assert_eq!(pool.remove(key), Some(7));
        assert_eq!(pool.remove(key), None);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_get_mut() {
        let mut pool: Pool<u32> = Pool::new();

        let key = pool.insert(1);
        if let Some(value) = pool.get_mut(key) {
            *value = 9;
        }
        assert_eq!(pool.get(key), Some(&9));
    }

    // ==================== Cancelled Predicate ====================

    fn bound_pair(arena: &mut EntryArena) -> (Key, Key) {
        let task_key = arena.tasks.insert(TaskCell {
            task: Some(RecordingTask::new()),
            entry: None,
        });
        let entry_key = arena.entries.insert(EntryCell::new(100, task_key));
        if let Some(cell) = arena.tasks.get_mut(task_key) {
            cell.entry = Some(entry_key);
        }
        (entry_key, task_key)
    }

    #[test]
    fn test_bound_entry_is_not_cancelled() {
        let mut arena = EntryArena::new();
        let (entry_key, _) = bound_pair(&mut arena);

        assert!(!arena.is_cancelled(entry_key));
    }

    #[test]
    fn test_fully_cleared_pair_is_cancelled() {
        let mut arena = EntryArena::new();
        let (entry_key, task_key) = bound_pair(&mut arena);

        let cell = arena.tasks.get_mut(task_key).unwrap();
        cell.entry = None;
        cell.task = None;

        assert!(arena.is_cancelled(entry_key));
    }

    #[test]
    fn test_entry_displaced_but_task_present_is_not_cancelled() {
        // The predicate is a conjunction: a task cell pointed at a newer
        // entry but still holding its task does not cancel the old entry.
        let mut arena = EntryArena::new();
        let (entry_key, task_key) = bound_pair(&mut arena);

        arena.tasks.get_mut(task_key).unwrap().entry = None;

        assert!(!arena.is_cancelled(entry_key));
    }

    #[test]
    fn test_stale_entry_key_is_cancelled() {
        let mut arena = EntryArena::new();
        let (entry_key, _) = bound_pair(&mut arena);

        arena.entries.remove(entry_key);

        assert!(arena.is_cancelled(entry_key));
    }

    #[test]
    fn test_recycled_task_cell_is_cancelled() {
        let mut arena = EntryArena::new();
        let (entry_key, task_key) = bound_pair(&mut arena);

        // Task cell freed and its slot reused by an unrelated schedule.
        arena.tasks.remove(task_key);
        let _other = arena.tasks.insert(TaskCell {
            task: Some(RecordingTask::new()),
            entry: None,
        });

        assert!(arena.is_cancelled(entry_key));
    }
}
