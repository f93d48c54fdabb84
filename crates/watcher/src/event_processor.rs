use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::warn;
use tssbridge_types::{party_count, Address, BlockNumber, Epoch, EpochId, H256};

use crate::chain_client::{ChainClient, Log};
use crate::contract::BridgeReader;
use crate::events::BridgeEvent;
use crate::state::WatcherState;
use crate::tx_recovery::{key_from_coordinates, recover_sender_key, ForeignAddressEncoder};

/// A bridge event together with the contract and chain data needed to act on
/// it, so dispatching needs no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEvent {
    NewEpoch {
        old_epoch: EpochId,
        new_epoch: EpochId,
        validators: Vec<Address>,
        threshold: u16,
    },
    NewEpochCancelled {
        epoch: EpochId,
        validators: Vec<Address>,
    },
    NewFundsTransfer {
        old_epoch: EpochId,
        new_epoch: EpochId,
        /// Custody address of the new epoch; only resolved for participants.
        recipient: Option<String>,
    },
    Exchange {
        value: u128,
        nonce: u32,
        /// Foreign address of the requester; only resolved for participants.
        recipient: Option<String>,
    },
    EpochStart {
        epoch: Epoch,
        timestamp_ms: u64,
    },
    EpochEnd {
        epoch: EpochId,
        timestamp_ms: u64,
    },
    EpochClose {
        epoch: EpochId,
    },
    ForceSign,
    RangeSizeChanged {
        range_size: u16,
    },
    Unknown {
        topic0: Option<H256>,
    },
}

/// Fetches what each bridge event needs from the contract and the chain.
pub struct EventProcessor {
    client: Arc<dyn ChainClient>,
    bridge: Arc<dyn BridgeReader>,
    encoder: Arc<dyn ForeignAddressEncoder>,
}

impl EventProcessor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        bridge: Arc<dyn BridgeReader>,
        encoder: Arc<dyn ForeignAddressEncoder>,
    ) -> Self {
        Self {
            client,
            bridge,
            encoder,
        }
    }

    pub async fn block_time_ms(&self, block: BlockNumber) -> Result<u64> {
        Ok(self.client.block_timestamp(block).await?.saturating_mul(1000))
    }

    async fn validators(&self, epoch: EpochId) -> Result<Vec<Address>> {
        let validators = self.bridge.validators(epoch).await?;
        if party_count(&validators).is_none() {
            bail!(
                "epoch {} has {} validators, more than a signing round can address",
                epoch,
                validators.len()
            );
        }
        Ok(validators)
    }

    pub async fn epoch(&self, id: EpochId) -> Result<Epoch> {
        Ok(Epoch {
            id,
            validators: self.validators(id).await?,
            threshold: self.bridge.threshold(id).await?,
            ..Default::default()
        })
    }

    async fn custody_address(&self, epoch: EpochId) -> Result<String> {
        let (x, y) = self.bridge.epoch_key(epoch).await?;
        Ok(self.encoder.encode(&key_from_coordinates(&x, &y)?))
    }

    /// Foreign address of the account that sent `tx_hash`. A transaction the
    /// node cannot return yet is an error; a signature no key can be recovered
    /// from is `None`, since every validator sees the same bytes.
    async fn requester_address(&self, block: BlockNumber, tx_hash: &H256) -> Result<Option<String>> {
        let tx = self.client.get_transaction(tx_hash).await?;
        match recover_sender_key(&tx) {
            Ok(key) => Ok(Some(self.encoder.encode(&key))),
            Err(e) => {
                warn!(
                    block,
                    tx = %hex::encode(tx_hash),
                    "exchange skipped, sender key cannot be recovered: {}",
                    e
                );
                Ok(None)
            }
        }
    }

    pub async fn resolve(
        &self,
        state: &WatcherState,
        log: &Log,
        event: BridgeEvent,
    ) -> Result<ResolvedEvent> {
        let block = log.block_number;
        Ok(match event {
            BridgeEvent::NewEpoch {
                old_epoch,
                new_epoch,
            } => ResolvedEvent::NewEpoch {
                old_epoch,
                new_epoch,
                validators: self.validators(new_epoch).await?,
                threshold: self.bridge.threshold(new_epoch).await?,
            },
            BridgeEvent::NewEpochCancelled { epoch } => ResolvedEvent::NewEpochCancelled {
                epoch,
                validators: self.validators(epoch).await?,
            },
            BridgeEvent::NewFundsTransfer {
                old_epoch,
                new_epoch,
            } => {
                let recipient = if state.is_current_validator {
                    Some(self.custody_address(new_epoch).await?)
                } else {
                    None
                };
                ResolvedEvent::NewFundsTransfer {
                    old_epoch,
                    new_epoch,
                    recipient,
                }
            }
            BridgeEvent::ExchangeRequest { value, nonce } => {
                let recipient = if state.is_current_validator {
                    self.requester_address(block, &log.transaction_hash).await?
                } else {
                    None
                };
                ResolvedEvent::Exchange {
                    value,
                    nonce,
                    recipient,
                }
            }
            BridgeEvent::EpochStart { epoch, .. } => ResolvedEvent::EpochStart {
                epoch: self.epoch(epoch).await?,
                timestamp_ms: self.block_time_ms(block).await?,
            },
            BridgeEvent::EpochEnd { epoch } => ResolvedEvent::EpochEnd {
                epoch,
                timestamp_ms: self.block_time_ms(block).await?,
            },
            BridgeEvent::EpochClose { epoch } => ResolvedEvent::EpochClose { epoch },
            BridgeEvent::ForceSign => ResolvedEvent::ForceSign,
            BridgeEvent::RangeSizeChanged { range_size } => {
                ResolvedEvent::RangeSizeChanged { range_size }
            }
            BridgeEvent::Unknown { topic0 } => ResolvedEvent::Unknown { topic0 },
        })
    }
}
