// In-process stand-ins for the home and side chains used by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use tssbridge_storage::InMemoryStorage;
use tssbridge_types::{Address, BlockNumber, ChainId, EpochId, H256};
use tssbridge_watcher::abi::{event_topic, uint_word};
use tssbridge_watcher::events::signatures;
use tssbridge_watcher::{
    signing_hash, BridgeReader, ChainClient, ChainConfig, CompressedKeyHex,
    ForeignAddressEncoder, Log, LogFilter, SharedDbReader, Stores, TransactionInfo,
};

pub const BRIDGE: &str = "0x00000000000000000000000000000000000000aa";
pub const SHARED_DB: &str = "0x00000000000000000000000000000000000000bb";

pub const A: Address = [0x0a; 20];
pub const B: Address = [0x0b; 20];
pub const C: Address = [0x0c; 20];
pub const OUTSIDER: Address = [0x0d; 20];

pub const ONE_TOKEN: u64 = 1_000_000_000_000_000_000;

#[derive(Default)]
struct ChainData {
    head: BlockNumber,
    logs: Vec<Log>,
    transactions: HashMap<H256, TransactionInfo>,
}

/// A chain whose logs and head are set by the test.
#[derive(Default)]
pub struct MockChain {
    data: Mutex<ChainData>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_head(&self, head: BlockNumber) {
        self.data.lock().unwrap().head = head;
    }

    pub fn push_log(&self, log: Log) {
        let mut data = self.data.lock().unwrap();
        data.head = data.head.max(log.block_number);
        data.logs.push(log);
    }

    pub fn add_transaction(&self, tx: TransactionInfo) {
        self.data.lock().unwrap().transactions.insert(tx.hash, tx);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<BlockNumber> {
        Ok(self.data.lock().unwrap().head)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let data = self.data.lock().unwrap();
        let mut logs: Vec<Log> = data
            .logs
            .iter()
            .filter(|log| log.address == filter.address)
            .filter(|log| log.block_number >= filter.from_block && log.block_number <= filter.to_block)
            .filter(|log| match &filter.topic0 {
                Some(topics) => log.topics.first().map_or(false, |t| topics.contains(t)),
                None => true,
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn get_transaction(&self, hash: &H256) -> Result<TransactionInfo> {
        self.data
            .lock()
            .unwrap()
            .transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| anyhow!("unknown transaction"))
    }

    async fn block_timestamp(&self, block: BlockNumber) -> Result<u64> {
        Ok(1_700_000_000 + block * 5)
    }

    async fn call(&self, _to: &Address, _data: &[u8], _block: Option<BlockNumber>) -> Result<Vec<u8>> {
        Err(anyhow!("contract views are mocked separately"))
    }
}

/// Bridge contract views keyed by epoch.
pub struct MockBridge {
    pub validators: Mutex<HashMap<EpochId, Vec<Address>>>,
    pub thresholds: Mutex<HashMap<EpochId, u16>>,
    pub range_size: u16,
    pub custody_key: SigningKey,
}

impl MockBridge {
    pub fn new(range_size: u16) -> Arc<Self> {
        Arc::new(Self {
            validators: Mutex::new(HashMap::new()),
            thresholds: Mutex::new(HashMap::new()),
            range_size,
            custody_key: SigningKey::from_bytes(&[3u8; 32].into()).unwrap(),
        })
    }

    pub fn set_epoch(&self, epoch: EpochId, validators: Vec<Address>, threshold: u16) {
        self.validators.lock().unwrap().insert(epoch, validators);
        self.thresholds.lock().unwrap().insert(epoch, threshold);
    }
}

#[async_trait]
impl BridgeReader for MockBridge {
    async fn validators(&self, epoch: EpochId) -> Result<Vec<Address>> {
        Ok(self
            .validators
            .lock()
            .unwrap()
            .get(&epoch)
            .cloned()
            .unwrap_or_default())
    }

    async fn threshold(&self, epoch: EpochId) -> Result<u16> {
        Ok(self.thresholds.lock().unwrap().get(&epoch).copied().unwrap_or(0))
    }

    async fn range_size(&self) -> Result<u16> {
        Ok(self.range_size)
    }

    async fn epoch_key(&self, _epoch: EpochId) -> Result<(H256, H256)> {
        let point = self.custody_key.verifying_key().to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(point.x().unwrap());
        y.copy_from_slice(point.y().unwrap());
        Ok((x, y))
    }
}

/// Signature storage where the count of each message grows at given blocks.
/// Messages belong to epoch 1 unless set otherwise.
#[derive(Default)]
pub struct MockSharedDb {
    counts: Mutex<HashMap<H256, Vec<(BlockNumber, u64)>>>,
    epochs: Mutex<HashMap<H256, EpochId>>,
}

impl MockSharedDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, msg_hash: H256, block: BlockNumber, count: u64) {
        self.counts
            .lock()
            .unwrap()
            .entry(msg_hash)
            .or_default()
            .push((block, count));
    }

    pub fn set_message_epoch(&self, msg_hash: H256, epoch: EpochId) {
        self.epochs.lock().unwrap().insert(msg_hash, epoch);
    }

    fn count_at(&self, msg_hash: &H256, block: BlockNumber) -> u64 {
        self.counts
            .lock()
            .unwrap()
            .get(msg_hash)
            .and_then(|history| {
                history
                    .iter()
                    .filter(|(b, _)| *b <= block)
                    .map(|(_, count)| *count)
                    .max()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl SharedDbReader for MockSharedDb {
    async fn signature_count(&self, msg_hash: &H256, block: BlockNumber) -> Result<u64> {
        Ok(self.count_at(msg_hash, block))
    }

    async fn signatures(&self, msg_hash: &H256, block: BlockNumber) -> Result<Vec<Vec<u8>>> {
        let count = self.count_at(msg_hash, block);
        Ok((0..count).map(|i| vec![i as u8; 65]).collect())
    }

    async fn message(&self, msg_hash: &H256, _block: BlockNumber) -> Result<Vec<u8>> {
        Ok(msg_hash[..4].to_vec())
    }

    async fn message_epoch(&self, msg_hash: &H256, _block: BlockNumber) -> Result<EpochId> {
        Ok(self.epochs.lock().unwrap().get(msg_hash).copied().unwrap_or(1))
    }
}

// Helper to build a log of `signature` with all fields in data
pub fn log(address: &str, block_number: u64, log_index: u64, signature: &str, words: &[H256]) -> Log {
    let mut transaction_hash = [0u8; 32];
    transaction_hash[..8].copy_from_slice(&block_number.to_be_bytes());
    transaction_hash[8..16].copy_from_slice(&log_index.to_be_bytes());
    Log {
        address: tssbridge_types::parse_address(address).unwrap(),
        topics: vec![event_topic(signature)],
        data: words.iter().flat_map(|w| w.iter().copied()).collect(),
        block_number,
        log_index,
        transaction_hash,
    }
}

pub fn epoch_start(block: u64, epoch: EpochId) -> Log {
    log(
        BRIDGE,
        block,
        0,
        signatures::EPOCH_START,
        &[uint_word(epoch as u64), [1; 32], [2; 32]],
    )
}

pub fn range_size_changed(block: u64, size: u16) -> Log {
    log(BRIDGE, block, 0, signatures::RANGE_SIZE_CHANGED, &[uint_word(size as u64)])
}

pub fn new_signature(block: u64, log_index: u64, signer: Address, msg_hash: H256) -> Log {
    let mut signer_word = [0u8; 32];
    signer_word[12..].copy_from_slice(&signer);
    log(
        SHARED_DB,
        block,
        log_index,
        signatures::NEW_SIGNATURE,
        &[signer_word, msg_hash],
    )
}

pub fn requester_key() -> SigningKey {
    SigningKey::from_bytes(&[9u8; 32].into()).unwrap()
}

pub fn requester_address() -> String {
    CompressedKeyHex.encode(requester_key().verifying_key())
}

/// An exchange of `tokens` whole tokens at `block` and the transaction that
/// emitted it, signed by the requester key.
pub fn signed_exchange(block: u64, tokens: u64) -> (Log, TransactionInfo) {
    let log = log(
        BRIDGE,
        block,
        1,
        signatures::EXCHANGE_REQUEST,
        &[uint_word(tokens * ONE_TOKEN), uint_word(block)],
    );

    let mut tx = TransactionInfo {
        hash: log.transaction_hash,
        tx_type: 2,
        chain_id: Some(1337),
        nonce: block,
        max_priority_fee_per_gas: Some(1),
        max_fee_per_gas: Some(1_000_000_000),
        gas: 100_000,
        to: Some(log.address),
        input: log.data.clone(),
        ..Default::default()
    };
    let (prehash, _) = signing_hash(&tx).unwrap();
    let (signature, recovery_id) = requester_key().sign_prehash_recoverable(&prehash).unwrap();
    let bytes = signature.to_bytes();
    tx.r.copy_from_slice(&bytes[..32]);
    tx.s.copy_from_slice(&bytes[32..]);
    tx.v = recovery_id.is_y_odd() as u64;

    (log, tx)
}

/// Adds an exchange of `tokens` whole tokens at `block`, sent by the requester key.
pub fn push_exchange(chain: &MockChain, block: u64, tokens: u64) {
    let (log, tx) = signed_exchange(block, tokens);
    chain.add_transaction(tx);
    chain.push_log(log);
}

pub fn chain_config(chain: ChainId, contract: &str, start_block: u64, max_fetch: u64) -> ChainConfig {
    ChainConfig {
        chain,
        rpc_url: "http://127.0.0.1:0".to_string(),
        contract_address: contract.to_string(),
        start_block,
        max_fetch_range_size: max_fetch,
        poll_interval_ms: 10,
        rpc_timeout_seconds: 1,
        retry_delay_ms: 10,
        retry_max_delay_ms: 10,
    }
}

/// Routes watcher logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn stores(storage: &Arc<InMemoryStorage>) -> Stores {
    Stores {
        checkpoints: storage.clone(),
        broker: storage.clone(),
    }
}
