use anyhow::Result;
use async_trait::async_trait;
use tssbridge_types::{Address, BlockNumber, H256};

/// An event log, already filtered of `removed` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: BlockNumber,
    pub log_index: u64,
    pub transaction_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    /// Matches any of these topic0 values; `None` matches every event.
    pub topic0: Option<Vec<H256>>,
}

/// One entry of an EIP-2930 access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<H256>,
}

/// The fields of a mined transaction needed to rebuild its signing payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionInfo {
    pub hash: H256,
    /// 0 legacy, 1 access list, 2 dynamic fee.
    pub tx_type: u8,
    pub chain_id: Option<u64>,
    pub nonce: u64,
    pub gas_price: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub gas: u64,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: H256,
    pub input: Vec<u8>,
    pub access_list: Vec<AccessListItem>,
    pub v: u64,
    pub r: H256,
    pub s: H256,
}

/// Read access to one chain. Implementations retry transport failures
/// internally; an `Err` means the reply itself was unusable.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<BlockNumber>;

    /// Logs ordered by (block, log index).
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;

    async fn get_transaction(&self, hash: &H256) -> Result<TransactionInfo>;

    /// Block timestamp in seconds.
    async fn block_timestamp(&self, block: BlockNumber) -> Result<u64>;

    /// `eth_call` against the given block, or the latest one.
    async fn call(&self, to: &Address, data: &[u8], block: Option<BlockNumber>) -> Result<Vec<u8>>;
}
