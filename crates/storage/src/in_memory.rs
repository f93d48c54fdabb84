use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::storage_trait::{CheckpointStore, Delivery, QueueBroker, StorageError};

#[derive(Debug, Default)]
struct QueueState {
    next_tag: u64,
    ready: BTreeMap<u64, Vec<u8>>,
    unacked: BTreeMap<u64, Vec<u8>>,
}

/// Volatile backend. Clones share the same data, which lets tests simulate a
/// process restart by handing a clone to a fresh watcher.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    checkpoints: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every in-flight delivery ready again, as a broker does when the
    /// consuming connection drops.
    pub fn recover_unacked(&self) -> Result<(), StorageError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queues"))?;
        for state in queues.values_mut() {
            let unacked = std::mem::take(&mut state.unacked);
            state.ready.extend(unacked);
        }
        Ok(())
    }

    /// Payloads of the ready messages of `queue`, oldest first.
    pub fn snapshot(&self, queue: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        let queues = self
            .queues
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queues"))?;
        Ok(queues
            .get(queue)
            .map(|q| q.ready.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl CheckpointStore for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let checkpoints = self
            .checkpoints
            .read()
            .map_err(|_| StorageError::LockPoisoned("checkpoints"))?;
        Ok(checkpoints.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| StorageError::LockPoisoned("checkpoints"))?;
        checkpoints.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn multi_set(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| StorageError::LockPoisoned("checkpoints"))?;
        for (key, value) in entries {
            checkpoints.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn save(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

impl QueueBroker for InMemoryStorage {
    fn declare(&self, queue: &str) -> Result<(), StorageError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queues"))?;
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), StorageError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queues"))?;
        let state = queues.entry(queue.to_string()).or_default();
        let tag = state.next_tag;
        state.next_tag += 1;
        state.ready.insert(tag, payload.to_vec());
        Ok(())
    }

    fn fetch(&self, queue: &str) -> Result<Option<Delivery>, StorageError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queues"))?;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some((tag, payload)) = state.ready.pop_first() else {
            return Ok(None);
        };
        state.unacked.insert(tag, payload.clone());
        Ok(Some(Delivery {
            queue: queue.to_string(),
            tag,
            payload,
        }))
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), StorageError> {
        self.reject(delivery, false)
    }

    fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), StorageError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queues"))?;
        let unknown = || StorageError::UnknownDelivery {
            queue: delivery.queue.clone(),
            tag: delivery.tag,
        };
        let state = queues.get_mut(&delivery.queue).ok_or_else(unknown)?;
        let payload = state.unacked.remove(&delivery.tag).ok_or_else(unknown)?;
        if requeue {
            state.ready.insert(delivery.tag, payload);
        }
        Ok(())
    }

    fn len(&self, queue: &str) -> Result<usize, StorageError> {
        let queues = self
            .queues
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queues"))?;
        Ok(queues.get(queue).map(|q| q.ready.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_with_ack() {
        let storage = InMemoryStorage::new();
        storage.publish("q", b"a").unwrap();
        storage.publish("q", b"b").unwrap();

        let first = storage.fetch("q").unwrap().unwrap();
        assert_eq!(first.payload, b"a");
        assert_eq!(storage.len("q").unwrap(), 1);

        let second = storage.fetch("q").unwrap().unwrap();
        assert_eq!(second.payload, b"b");
        assert!(storage.fetch("q").unwrap().is_none());

        storage.ack(&first).unwrap();
        storage.ack(&second).unwrap();
        assert!(storage.ack(&second).is_err());
    }

    #[test]
    fn test_requeue_keeps_position() {
        let storage = InMemoryStorage::new();
        storage.publish("q", b"a").unwrap();
        storage.publish("q", b"b").unwrap();

        let first = storage.fetch("q").unwrap().unwrap();
        storage.reject(&first, true).unwrap();
        assert_eq!(storage.fetch("q").unwrap().unwrap().payload, b"a");
    }

    #[test]
    fn test_unacked_redelivered_after_recovery() {
        let storage = InMemoryStorage::new();
        storage.publish("q", b"a").unwrap();
        let _lost = storage.fetch("q").unwrap().unwrap();

        let restarted = storage.clone();
        assert_eq!(restarted.len("q").unwrap(), 0);
        restarted.recover_unacked().unwrap();
        assert_eq!(restarted.snapshot("q").unwrap(), vec![b"a".to_vec()]);
    }

    #[test]
    fn test_multi_set() {
        let storage = InMemoryStorage::new();
        storage
            .multi_set(&[("a".to_string(), vec![1]), ("b".to_string(), vec![2])])
            .unwrap();
        assert_eq!(storage.get("b").unwrap(), Some(vec![2]));
        assert_eq!(storage.get("c").unwrap(), None);
    }
}
