use std::collections::BTreeMap;

use tssbridge_types::{BlockNumber, ChainId, EpochId};

use crate::storage_trait::{CheckpointStore, StorageError};

pub mod keys {
    use tssbridge_types::{ChainId, EpochId};

    pub fn block(chain: ChainId) -> String {
        format!("{}:block", chain)
    }

    pub fn foreign_nonce(chain: ChainId, epoch: EpochId) -> String {
        format!("{}:foreignNonce:{}", chain, epoch)
    }

    pub fn last_transaction_block(chain: ChainId) -> String {
        format!("{}:lastTransactionBlock", chain)
    }

    pub fn active_epoch(chain: ChainId) -> String {
        format!("{}:activeEpoch", chain)
    }

    /// Step reached by the startup filter of `queue`.
    pub fn queue_filter(queue: &str) -> String {
        format!("queueFilter:{}", queue)
    }
}

fn encode_u64(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        StorageError::DeserializationFailed(format!("expected 8 bytes, got {}", bytes.len()))
    })?;
    Ok(u64::from_le_bytes(arr))
}

pub fn read_u64(store: &dyn CheckpointStore, key: &str) -> Result<Option<u64>, StorageError> {
    store.get(key)?.map(|bytes| decode_u64(&bytes)).transpose()
}

/// Writes a single value and forces it to disk.
pub fn write_u64(store: &dyn CheckpointStore, key: &str, value: u64) -> Result<(), StorageError> {
    store.set(key, &encode_u64(value))?;
    store.save()
}

/// Persisted progress of one watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Last fully processed block; `None` until the first batch completes.
    pub last_block: Option<BlockNumber>,
    pub foreign_nonce: BTreeMap<EpochId, u64>,
    pub last_transaction_block: BlockNumber,
    pub active_epoch: bool,
}

impl Checkpoint {
    /// Loads the checkpoint of `chain`, including the nonce counters of `epochs`.
    pub fn load(
        store: &dyn CheckpointStore,
        chain: ChainId,
        epochs: &[EpochId],
    ) -> Result<Self, StorageError> {
        let mut foreign_nonce = BTreeMap::new();
        for &epoch in epochs {
            if let Some(nonce) = read_u64(store, &keys::foreign_nonce(chain, epoch))? {
                foreign_nonce.insert(epoch, nonce);
            }
        }

        Ok(Self {
            last_block: read_u64(store, &keys::block(chain))?,
            foreign_nonce,
            last_transaction_block: read_u64(store, &keys::last_transaction_block(chain))?
                .unwrap_or(0),
            active_epoch: read_u64(store, &keys::active_epoch(chain))?.unwrap_or(0) != 0,
        })
    }
}

/// Collects checkpoint fields and writes them as one atomic unit.
#[derive(Debug, Clone)]
pub struct CheckpointBatch {
    chain: ChainId,
    entries: Vec<(String, Vec<u8>)>,
}

impl CheckpointBatch {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            entries: Vec::new(),
        }
    }

    pub fn last_block(mut self, block: BlockNumber) -> Self {
        self.entries.push((keys::block(self.chain), encode_u64(block)));
        self
    }

    pub fn foreign_nonce(mut self, epoch: EpochId, nonce: u64) -> Self {
        self.entries
            .push((keys::foreign_nonce(self.chain, epoch), encode_u64(nonce)));
        self
    }

    pub fn last_transaction_block(mut self, block: BlockNumber) -> Self {
        self.entries
            .push((keys::last_transaction_block(self.chain), encode_u64(block)));
        self
    }

    pub fn active_epoch(mut self, active: bool) -> Self {
        self.entries
            .push((keys::active_epoch(self.chain), encode_u64(active as u64)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn commit(self, store: &dyn CheckpointStore) -> Result<(), StorageError> {
        store.multi_set(&self.entries)?;
        store.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStorage;

    #[test]
    fn test_missing_checkpoint_defaults() {
        let storage = InMemoryStorage::new();
        let checkpoint = Checkpoint::load(&storage, ChainId::Home, &[1]).unwrap();
        assert_eq!(checkpoint, Checkpoint::default());
    }

    #[test]
    fn test_batch_round_trip() {
        let storage = InMemoryStorage::new();
        CheckpointBatch::new(ChainId::Home)
            .last_block(120)
            .foreign_nonce(2, 5)
            .last_transaction_block(118)
            .active_epoch(true)
            .commit(&storage)
            .unwrap();

        let checkpoint = Checkpoint::load(&storage, ChainId::Home, &[1, 2]).unwrap();
        assert_eq!(checkpoint.last_block, Some(120));
        assert_eq!(checkpoint.foreign_nonce.get(&2), Some(&5));
        assert_eq!(checkpoint.foreign_nonce.get(&1), None);
        assert_eq!(checkpoint.last_transaction_block, 118);
        assert!(checkpoint.active_epoch);

        // chains do not share keys
        let side = Checkpoint::load(&storage, ChainId::Side, &[2]).unwrap();
        assert_eq!(side.last_block, None);
    }

    #[test]
    fn test_single_value_write() {
        let storage = InMemoryStorage::new();
        let key = keys::queue_filter("signQueue");
        assert_eq!(read_u64(&storage, &key).unwrap(), None);
        write_u64(&storage, &key, 2).unwrap();
        assert_eq!(read_u64(&storage, &key).unwrap(), Some(2));
    }

    #[test]
    fn test_corrupt_value_is_an_error() {
        let storage = InMemoryStorage::new();
        storage.set(&keys::block(ChainId::Home), &[1, 2, 3]).unwrap();
        assert!(Checkpoint::load(&storage, ChainId::Home, &[]).is_err());
    }
}
