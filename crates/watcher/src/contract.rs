use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tssbridge_types::{signature::SIGNATURE_SIZE, Address, BlockNumber, EpochId, H256};

use crate::abi::{self, uint_word};
use crate::chain_client::ChainClient;

/// View functions of the home bridge contract.
#[async_trait]
pub trait BridgeReader: Send + Sync {
    async fn validators(&self, epoch: EpochId) -> Result<Vec<Address>>;
    async fn threshold(&self, epoch: EpochId) -> Result<u16>;
    async fn range_size(&self) -> Result<u16>;
    /// Affine coordinates of the epoch's custody key.
    async fn epoch_key(&self, epoch: EpochId) -> Result<(H256, H256)>;
}

/// View functions of the side chain signature storage, read at a given block.
#[async_trait]
pub trait SharedDbReader: Send + Sync {
    async fn signature_count(&self, msg_hash: &H256, block: BlockNumber) -> Result<u64>;
    async fn signatures(&self, msg_hash: &H256, block: BlockNumber) -> Result<Vec<Vec<u8>>>;
    async fn message(&self, msg_hash: &H256, block: BlockNumber) -> Result<Vec<u8>>;
    /// Epoch whose validators sign `msg_hash`, recorded with the message.
    async fn message_epoch(&self, msg_hash: &H256, block: BlockNumber) -> Result<EpochId>;
}

pub struct BridgeContract {
    client: Arc<dyn ChainClient>,
    address: Address,
}

impl BridgeContract {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn view(&self, signature: &str, args: &[H256]) -> Result<Vec<u8>> {
        self.client
            .call(&self.address, &abi::encode_call(signature, args), None)
            .await
    }
}

#[async_trait]
impl BridgeReader for BridgeContract {
    async fn validators(&self, epoch: EpochId) -> Result<Vec<Address>> {
        let data = self
            .view("getValidators(uint16)", &[uint_word(epoch as u64)])
            .await?;
        Ok(abi::decode_address_array(&data)?)
    }

    async fn threshold(&self, epoch: EpochId) -> Result<u16> {
        let data = self
            .view("getThreshold(uint16)", &[uint_word(epoch as u64)])
            .await?;
        let value = abi::decode_uint(&data)?;
        u16::try_from(value).map_err(|_| anyhow!("threshold {} out of range", value))
    }

    async fn range_size(&self) -> Result<u16> {
        let value = abi::decode_uint(&self.view("getRangeSize()", &[]).await?)?;
        u16::try_from(value).map_err(|_| anyhow!("range size {} out of range", value))
    }

    async fn epoch_key(&self, epoch: EpochId) -> Result<(H256, H256)> {
        let x = self.view("getX(uint16)", &[uint_word(epoch as u64)]).await?;
        let y = self.view("getY(uint16)", &[uint_word(epoch as u64)]).await?;
        let word = |data: &[u8]| -> Result<H256> {
            abi::words(data)?
                .first()
                .copied()
                .ok_or_else(|| anyhow!("empty key coordinate"))
        };
        Ok((word(&x)?, word(&y)?))
    }
}

pub struct SharedDbContract {
    client: Arc<dyn ChainClient>,
    address: Address,
}

impl SharedDbContract {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self { client, address }
    }

    async fn view_at(&self, signature: &str, msg_hash: &H256, block: BlockNumber) -> Result<Vec<u8>> {
        self.client
            .call(&self.address, &abi::encode_call(signature, &[*msg_hash]), Some(block))
            .await
    }
}

/// Splits concatenated `r || s || v` signatures.
pub fn split_signatures(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    if data.len() % SIGNATURE_SIZE != 0 {
        return Err(anyhow!(
            "signature blob of {} bytes is not a multiple of {}",
            data.len(),
            SIGNATURE_SIZE
        ));
    }
    Ok(data.chunks(SIGNATURE_SIZE).map(<[u8]>::to_vec).collect())
}

#[async_trait]
impl SharedDbReader for SharedDbContract {
    async fn signature_count(&self, msg_hash: &H256, block: BlockNumber) -> Result<u64> {
        let data = self
            .view_at("getSignaturesCount(bytes32)", msg_hash, block)
            .await?;
        Ok(abi::decode_uint(&data)?)
    }

    async fn signatures(&self, msg_hash: &H256, block: BlockNumber) -> Result<Vec<Vec<u8>>> {
        let data = self.view_at("getSignatures(bytes32)", msg_hash, block).await?;
        split_signatures(&abi::decode_bytes(&data)?)
    }

    async fn message(&self, msg_hash: &H256, block: BlockNumber) -> Result<Vec<u8>> {
        let data = self.view_at("getSignData(bytes32)", msg_hash, block).await?;
        Ok(abi::decode_bytes(&data)?)
    }

    async fn message_epoch(&self, msg_hash: &H256, block: BlockNumber) -> Result<EpochId> {
        let data = self.view_at("getSignEpoch(bytes32)", msg_hash, block).await?;
        let value = abi::decode_uint(&data)?;
        EpochId::try_from(value).map_err(|_| anyhow!("epoch {} out of range", value))
    }
}
