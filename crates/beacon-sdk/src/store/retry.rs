//! Bounded, persisted retry queue.
//!
//! A capacity-bounded FIFO of failed records of one type. Mutations append
//! and persist under the same lock, so a crash recovers to either the old or
//! the new list, never a partial one.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{KeyValueStore, KeyValueStoreExt};

/// Default capacity; oldest entries are evicted first on overflow.
pub const DEFAULT_MAX_STORAGE_SIZE: usize = 100;

pub struct RetryQueue<T> {
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    max_storage_size: usize,
    items: Mutex<Vec<T>>,
}

impl<T> RetryQueue<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Create a queue bound to `storage_key`, restoring any persisted
    /// contents from a previous process.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        storage_key: impl Into<String>,
        max_storage_size: usize,
    ) -> Self {
        let storage_key = storage_key.into();
        let items = match store.get_json::<Vec<T>>(&storage_key) {
            Ok(Some(items)) => items,
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(key = %storage_key, %err, "failed to restore retry queue");
                Vec::new()
            }
        };
        Self {
            store,
            storage_key,
            max_storage_size,
            items: Mutex::new(items),
        }
    }

    /// Append one record and persist.
    pub fn push(&self, item: T) {
        self.append(vec![item]);
    }

    /// Atomically take the current contents and clear storage. Used before a
    /// bulk-resend attempt; pair with [`RetryQueue::restore`] on failure.
    pub fn drain_all(&self) -> Vec<T> {
        let mut items = self.items.lock().unwrap();
        let snapshot = std::mem::take(&mut *items);
        self.persist(&items);
        snapshot
    }

    /// Re-append a failed drain snapshot. Records queued since the drain are
    /// untouched; the snapshot is appended subject to the same capacity
    /// bound.
    pub fn restore(&self, records: Vec<T>) {
        self.append(records);
    }

    /// Non-destructive read for diagnostics and tests.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    fn append(&self, records: Vec<T>) {
        let mut items = self.items.lock().unwrap();
        items.extend(records);
        if items.len() > self.max_storage_size {
            let excess = items.len() - self.max_storage_size;
            items.drain(..excess);
        }
        self.persist(&items);
    }

    fn persist(&self, items: &[T]) {
        if let Err(err) = self.store.set_json(&self.storage_key, &items) {
            tracing::warn!(key = %self.storage_key, %err, "failed to persist retry queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyValueStore;

    fn queue(max: usize) -> (Arc<MemoryKeyValueStore>, RetryQueue<String>) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let queue = RetryQueue::new(store.clone(), "failed_events", max);
        (store, queue)
    }

    #[test]
    fn test_push_is_bounded_with_oldest_first_eviction() {
        let (_, queue) = queue(3);
        for i in 0..10 {
            queue.push(format!("event-{i}"));
            assert!(queue.len() <= 3);
        }
        // The most recently pushed records survive.
        assert_eq!(queue.snapshot(), vec!["event-7", "event-8", "event-9"]);
    }

    #[test]
    fn test_drain_then_restore_round_trips() {
        let (_, queue) = queue(10);
        queue.push("a".to_string());
        queue.push("b".to_string());

        let snapshot = queue.drain_all();
        assert_eq!(snapshot, vec!["a", "b"]);
        assert!(queue.is_empty());

        // Simulated bulk-send failure: put the snapshot back.
        queue.restore(snapshot.clone());
        assert_eq!(queue.snapshot(), snapshot);
    }

    #[test]
    fn test_records_queued_during_drain_survive_restore() {
        let (_, queue) = queue(10);
        queue.push("old".to_string());

        let snapshot = queue.drain_all();
        queue.push("new".to_string());
        queue.restore(snapshot);

        assert_eq!(queue.snapshot(), vec!["new", "old"]);
    }

    #[test]
    fn test_contents_survive_restart() {
        let store = Arc::new(MemoryKeyValueStore::new());
        {
            let queue: RetryQueue<String> = RetryQueue::new(store.clone(), "q", 10);
            queue.push("persisted".to_string());
        }
        let revived: RetryQueue<String> = RetryQueue::new(store, "q", 10);
        assert_eq!(revived.snapshot(), vec!["persisted"]);
    }

    #[test]
    fn test_drain_clears_persisted_state() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let queue: RetryQueue<String> = RetryQueue::new(store.clone(), "q", 10);
        queue.push("x".to_string());
        queue.drain_all();

        let revived: RetryQueue<String> = RetryQueue::new(store, "q", 10);
        assert!(revived.is_empty());
    }
}
