use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("unknown delivery {tag} on queue {queue}")]
    UnknownDelivery { queue: String, tag: u64 },
}

/// Durable key-value store for watcher progress.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Writes every entry or none of them.
    fn multi_set(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError>;

    /// Forces buffered writes to disk.
    fn save(&self) -> Result<(), StorageError>;
}

/// A message handed out by [`QueueBroker::fetch`] and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// Durable FIFO queues with explicit acknowledgement.
///
/// A delivered message stays invisible to further `fetch` calls until it is
/// acked (removed) or rejected. Deliveries that were never acked become ready
/// again when the broker is reopened, so consumers see each message at least
/// once.
pub trait QueueBroker: Send + Sync {
    fn declare(&self, _queue: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), StorageError>;

    /// Non-blocking pop of the oldest ready message.
    fn fetch(&self, queue: &str) -> Result<Option<Delivery>, StorageError>;

    fn ack(&self, delivery: &Delivery) -> Result<(), StorageError>;

    /// Returns the message to its original position when `requeue` is set,
    /// otherwise discards it.
    fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), StorageError>;

    /// Number of ready (not in-flight) messages.
    fn len(&self, queue: &str) -> Result<usize, StorageError>;
}
