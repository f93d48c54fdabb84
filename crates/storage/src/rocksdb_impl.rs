use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use tracing::debug;

use crate::storage_trait::{CheckpointStore, Delivery, QueueBroker, StorageError};

const CF_CHECKPOINTS: &str = "checkpoints";
const CF_QUEUES: &str = "queues";

/// Queue rows are keyed `<queue name> 0x00 <tag as big-endian u64>` so a
/// forward scan over the prefix yields messages in publish order.
const QUEUE_KEY_SEPARATOR: u8 = 0;

#[derive(Debug, Default)]
struct QueueCursor {
    next_tag: Option<u64>,
    unacked: BTreeSet<u64>,
}

pub struct RocksDBStorage {
    db: Arc<DB>,
    cursors: Mutex<HashMap<String, QueueCursor>>,
}

impl RocksDBStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_QUEUES, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::DatabaseError(format!("{} not found", name)))
    }

    fn queue_prefix(queue: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(queue.len() + 1);
        prefix.extend_from_slice(queue.as_bytes());
        prefix.push(QUEUE_KEY_SEPARATOR);
        prefix
    }

    fn encode_queue_key(queue: &str, tag: u64) -> Vec<u8> {
        let mut key = Self::queue_prefix(queue);
        key.extend_from_slice(&tag.to_be_bytes());
        key
    }

    fn decode_tag(prefix: &[u8], key: &[u8]) -> Option<u64> {
        if key.len() != prefix.len() + 8 || !key.starts_with(prefix) {
            return None;
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&key[prefix.len()..]);
        Some(u64::from_be_bytes(arr))
    }

    /// Ready rows of `queue` in publish order, skipping in-flight tags.
    fn scan_ready(
        &self,
        queue: &str,
        unacked: &BTreeSet<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, Vec<u8>)>, StorageError> {
        let cf = self.cf(CF_QUEUES)?;
        let prefix = Self::queue_prefix(queue);
        let mut out = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| StorageError::DatabaseError(e.to_string()))?;
            let Some(tag) = Self::decode_tag(&prefix, &key) else {
                break;
            };
            if unacked.contains(&tag) {
                continue;
            }
            out.push((tag, value.to_vec()));
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
        }

        Ok(out)
    }

    fn last_tag(&self, queue: &str) -> Result<Option<u64>, StorageError> {
        let cf = self.cf(CF_QUEUES)?;
        let prefix = Self::queue_prefix(queue);
        let upper = Self::encode_queue_key(queue, u64::MAX);

        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, _) = item.map_err(|e| StorageError::DatabaseError(e.to_string()))?;
                Ok(Self::decode_tag(&prefix, &key))
            }
            None => Ok(None),
        }
    }

    fn durable() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }
}

impl CheckpointStore for RocksDBStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        self.db
            .get_cf(cf, key.as_bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        self.db
            .put_cf(cf, key.as_bytes(), value)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn multi_set(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let mut batch = WriteBatch::default();
        for (key, value) in entries {
            batch.put_cf(cf, key.as_bytes(), value);
        }
        self.db
            .write_opt(batch, &Self::durable())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    fn save(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }
}

impl QueueBroker for RocksDBStorage {
    fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), StorageError> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queue cursors"))?;
        let cursor = cursors.entry(queue.to_string()).or_default();

        let tag = match cursor.next_tag {
            Some(tag) => tag,
            None => self.last_tag(queue)?.map(|t| t + 1).unwrap_or(0),
        };

        let cf = self.cf(CF_QUEUES)?;
        self.db
            .put_cf_opt(cf, Self::encode_queue_key(queue, tag), payload, &Self::durable())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        cursor.next_tag = Some(tag + 1);
        Ok(())
    }

    fn fetch(&self, queue: &str) -> Result<Option<Delivery>, StorageError> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queue cursors"))?;
        let cursor = cursors.entry(queue.to_string()).or_default();

        let Some((tag, payload)) = self
            .scan_ready(queue, &cursor.unacked, Some(1))?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        cursor.unacked.insert(tag);
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
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queue cursors"))?;
        let in_flight = cursors
            .get_mut(&delivery.queue)
            .map(|c| c.unacked.remove(&delivery.tag))
            .unwrap_or(false);
        if !in_flight {
            return Err(StorageError::UnknownDelivery {
                queue: delivery.queue.clone(),
                tag: delivery.tag,
            });
        }

        if !requeue {
            let cf = self.cf(CF_QUEUES)?;
            self.db
                .delete_cf_opt(
                    cf,
                    Self::encode_queue_key(&delivery.queue, delivery.tag),
                    &Self::durable(),
                )
                .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        }

        debug!(queue = %delivery.queue, tag = delivery.tag, requeue, "delivery settled");
        Ok(())
    }

    fn len(&self, queue: &str) -> Result<usize, StorageError> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|_| StorageError::LockPoisoned("queue cursors"))?;
        let empty = BTreeSet::new();
        let unacked = cursors.get(queue).map(|c| &c.unacked).unwrap_or(&empty);
        Ok(self.scan_ready(queue, unacked, None)?.len())
    }
}
