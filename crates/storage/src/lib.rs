mod checkpoint;
mod in_memory;
pub mod queue;
mod storage_trait;

#[cfg(feature = "rocksdb")]
mod rocksdb_impl;

pub use checkpoint::{keys, read_u64, write_u64, Checkpoint, CheckpointBatch};
pub use in_memory::InMemoryStorage;
pub use queue::{declare, Queue};
pub use storage_trait::{CheckpointStore, Delivery, QueueBroker, StorageError};

#[cfg(feature = "rocksdb")]
pub use rocksdb_impl::RocksDBStorage;

