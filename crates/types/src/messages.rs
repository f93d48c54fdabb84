use serde::{Deserialize, Serialize};

use crate::constants::queues;
use crate::{serde_hex, BlockNumber, EpochId, H256};

/// Work queues the watchers publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkQueue {
    Keygen,
    KeygenCancel,
    Sign,
    Exchange,
    EpochTimeIntervals,
    Relay,
}

impl WorkQueue {
    /// Queues fed by the home chain watcher.
    pub const HOME: [WorkQueue; 5] = [
        WorkQueue::Keygen,
        WorkQueue::KeygenCancel,
        WorkQueue::Sign,
        WorkQueue::Exchange,
        WorkQueue::EpochTimeIntervals,
    ];

    pub const ALL: [WorkQueue; 6] = [
        WorkQueue::Keygen,
        WorkQueue::KeygenCancel,
        WorkQueue::Sign,
        WorkQueue::Exchange,
        WorkQueue::EpochTimeIntervals,
        WorkQueue::Relay,
    ];

    pub fn from_name(name: &str) -> Option<WorkQueue> {
        Self::ALL.into_iter().find(|queue| queue.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkQueue::Keygen => queues::KEYGEN,
            WorkQueue::KeygenCancel => queues::KEYGEN_CANCEL,
            WorkQueue::Sign => queues::SIGN,
            WorkQueue::Exchange => queues::EXCHANGE,
            WorkQueue::EpochTimeIntervals => queues::EPOCH_TIME_INTERVALS,
            WorkQueue::Relay => queues::RELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeygenRequest {
    pub epoch: EpochId,
    pub block_number: BlockNumber,
    pub threshold: u16,
    pub parties: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeygenCancel {
    pub epoch: EpochId,
    pub block_number: BlockNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub epoch: EpochId,
    pub block_number: BlockNumber,
    pub nonce: u64,
    pub threshold: u16,
    pub parties: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_epoch: Option<EpochId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_epoch: Option<EpochId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub epoch: EpochId,
    pub block_number: BlockNumber,
    pub recipient: String,
    /// Amount in the destination chain's base unit.
    pub value: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochTimeInterval {
    pub epoch: EpochId,
    pub block_number: BlockNumber,
    /// Milliseconds since the unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prolonged_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub epoch: EpochId,
    pub block_number: BlockNumber,
    #[serde(with = "serde_hex::h256")]
    pub msg_hash: H256,
    #[serde(with = "serde_hex::bytes")]
    pub message: Vec<u8>,
    #[serde(with = "serde_hex::bytes_vec")]
    pub signatures: Vec<Vec<u8>>,
}

/// A unit of work for a downstream worker. Serializes as the bare payload of
/// its variant; the queue a message sits on determines how to read it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WorkMessage {
    Keygen(KeygenRequest),
    KeygenCancel(KeygenCancel),
    Sign(SignRequest),
    Exchange(ExchangeRequest),
    EpochTimeInterval(EpochTimeInterval),
    Relay(RelayRequest),
}

impl WorkMessage {
    pub fn queue(&self) -> WorkQueue {
        match self {
            WorkMessage::Keygen(_) => WorkQueue::Keygen,
            WorkMessage::KeygenCancel(_) => WorkQueue::KeygenCancel,
            WorkMessage::Sign(_) => WorkQueue::Sign,
            WorkMessage::Exchange(_) => WorkQueue::Exchange,
            WorkMessage::EpochTimeInterval(_) => WorkQueue::EpochTimeIntervals,
            WorkMessage::Relay(_) => WorkQueue::Relay,
        }
    }

    pub fn block_number(&self) -> BlockNumber {
        match self {
            WorkMessage::Keygen(m) => m.block_number,
            WorkMessage::KeygenCancel(m) => m.block_number,
            WorkMessage::Sign(m) => m.block_number,
            WorkMessage::Exchange(m) => m.block_number,
            WorkMessage::EpochTimeInterval(m) => m.block_number,
            WorkMessage::Relay(m) => m.block_number,
        }
    }

    pub fn epoch(&self) -> EpochId {
        match self {
            WorkMessage::Keygen(m) => m.epoch,
            WorkMessage::KeygenCancel(m) => m.epoch,
            WorkMessage::Sign(m) => m.epoch,
            WorkMessage::Exchange(m) => m.epoch,
            WorkMessage::EpochTimeInterval(m) => m.epoch,
            WorkMessage::Relay(m) => m.epoch,
        }
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Reads a payload taken from `queue`.
    pub fn from_slice(queue: WorkQueue, bytes: &[u8]) -> serde_json::Result<Self> {
        Ok(match queue {
            WorkQueue::Keygen => WorkMessage::Keygen(serde_json::from_slice(bytes)?),
            WorkQueue::KeygenCancel => WorkMessage::KeygenCancel(serde_json::from_slice(bytes)?),
            WorkQueue::Sign => WorkMessage::Sign(serde_json::from_slice(bytes)?),
            WorkQueue::Exchange => WorkMessage::Exchange(serde_json::from_slice(bytes)?),
            WorkQueue::EpochTimeIntervals => {
                WorkMessage::EpochTimeInterval(serde_json::from_slice(bytes)?)
            }
            WorkQueue::Relay => WorkMessage::Relay(serde_json::from_slice(bytes)?),
        })
    }
}
