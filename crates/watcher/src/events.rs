//! Typed view of the bridge and shared storage event logs.

use std::sync::OnceLock;

use tssbridge_types::{Address, EpochId, H256};

use crate::abi::{self, DecodeError};
use crate::chain_client::Log;

pub mod signatures {
    pub const NEW_EPOCH: &str = "NewEpoch(uint16,uint16)";
    pub const NEW_EPOCH_CANCELLED: &str = "NewEpochCancelled(uint16)";
    pub const NEW_FUNDS_TRANSFER: &str = "NewFundsTransfer(uint16,uint16)";
    pub const EXCHANGE_REQUEST: &str = "ExchangeRequest(uint96,uint32)";
    pub const EPOCH_START: &str = "EpochStart(uint16,uint256,uint256)";
    pub const EPOCH_END: &str = "EpochEnd(uint16)";
    pub const EPOCH_CLOSE: &str = "EpochClose(uint16)";
    pub const FORCE_SIGN: &str = "ForceSign()";
    pub const RANGE_SIZE_CHANGED: &str = "RangeSizeChanged(uint16)";
    pub const NEW_SIGNATURE: &str = "NewSignature(address,bytes32)";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    NewEpoch,
    NewEpochCancelled,
    NewFundsTransfer,
    ExchangeRequest,
    EpochStart,
    EpochEnd,
    EpochClose,
    ForceSign,
    RangeSizeChanged,
}

fn bridge_topics() -> &'static [(H256, Kind)] {
    static TOPICS: OnceLock<Vec<(H256, Kind)>> = OnceLock::new();
    TOPICS.get_or_init(|| {
        use signatures::*;
        [
            (NEW_EPOCH, Kind::NewEpoch),
            (NEW_EPOCH_CANCELLED, Kind::NewEpochCancelled),
            (NEW_FUNDS_TRANSFER, Kind::NewFundsTransfer),
            (EXCHANGE_REQUEST, Kind::ExchangeRequest),
            (EPOCH_START, Kind::EpochStart),
            (EPOCH_END, Kind::EpochEnd),
            (EPOCH_CLOSE, Kind::EpochClose),
            (FORCE_SIGN, Kind::ForceSign),
            (RANGE_SIZE_CHANGED, Kind::RangeSizeChanged),
        ]
        .into_iter()
        .map(|(signature, kind)| (abi::event_topic(signature), kind))
        .collect()
    })
}

pub fn topic_of(signature: &str) -> H256 {
    abi::event_topic(signature)
}

/// Event emitted by the home bridge contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    NewEpoch { old_epoch: EpochId, new_epoch: EpochId },
    NewEpochCancelled { epoch: EpochId },
    NewFundsTransfer { old_epoch: EpochId, new_epoch: EpochId },
    ExchangeRequest { value: u128, nonce: u32 },
    EpochStart { epoch: EpochId, key_x: H256, key_y: H256 },
    EpochEnd { epoch: EpochId },
    EpochClose { epoch: EpochId },
    ForceSign,
    RangeSizeChanged { range_size: u16 },
    Unknown { topic0: Option<H256> },
}

/// Indexed topics after topic0 followed by the data words.
fn fields(log: &Log) -> Result<Vec<H256>, DecodeError> {
    let mut fields: Vec<H256> = log.topics.iter().skip(1).copied().collect();
    fields.extend(abi::words(&log.data)?);
    Ok(fields)
}

fn at(fields: &[H256], i: usize) -> Result<&H256, DecodeError> {
    fields.get(i).ok_or(DecodeError::MissingField(i))
}

impl BridgeEvent {
    pub fn decode(log: &Log) -> Result<Self, DecodeError> {
        let Some(topic0) = log.topics.first() else {
            return Ok(BridgeEvent::Unknown { topic0: None });
        };
        let Some(kind) = bridge_topics()
            .iter()
            .find(|(topic, _)| topic == topic0)
            .map(|(_, kind)| *kind)
        else {
            return Ok(BridgeEvent::Unknown {
                topic0: Some(*topic0),
            });
        };

        let f = fields(log)?;
        let epoch = |i| abi::word_to_u16(at(&f, i)?);

        Ok(match kind {
            Kind::NewEpoch => BridgeEvent::NewEpoch {
                old_epoch: epoch(0)?,
                new_epoch: epoch(1)?,
            },
            Kind::NewEpochCancelled => BridgeEvent::NewEpochCancelled { epoch: epoch(0)? },
            Kind::NewFundsTransfer => BridgeEvent::NewFundsTransfer {
                old_epoch: epoch(0)?,
                new_epoch: epoch(1)?,
            },
            Kind::ExchangeRequest => {
                let value = abi::word_to_u128(at(&f, 0)?)?;
                if value >> 96 != 0 {
                    return Err(DecodeError::Overflow(96));
                }
                BridgeEvent::ExchangeRequest {
                    value,
                    nonce: abi::word_to_u32(at(&f, 1)?)?,
                }
            }
            Kind::EpochStart => BridgeEvent::EpochStart {
                epoch: epoch(0)?,
                key_x: *at(&f, 1)?,
                key_y: *at(&f, 2)?,
            },
            Kind::EpochEnd => BridgeEvent::EpochEnd { epoch: epoch(0)? },
            Kind::EpochClose => BridgeEvent::EpochClose { epoch: epoch(0)? },
            Kind::ForceSign => BridgeEvent::ForceSign,
            Kind::RangeSizeChanged => BridgeEvent::RangeSizeChanged {
                range_size: epoch(0)?,
            },
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::NewEpoch { .. } => "NewEpoch",
            BridgeEvent::NewEpochCancelled { .. } => "NewEpochCancelled",
            BridgeEvent::NewFundsTransfer { .. } => "NewFundsTransfer",
            BridgeEvent::ExchangeRequest { .. } => "ExchangeRequest",
            BridgeEvent::EpochStart { .. } => "EpochStart",
            BridgeEvent::EpochEnd { .. } => "EpochEnd",
            BridgeEvent::EpochClose { .. } => "EpochClose",
            BridgeEvent::ForceSign => "ForceSign",
            BridgeEvent::RangeSizeChanged { .. } => "RangeSizeChanged",
            BridgeEvent::Unknown { .. } => "Unknown",
        }
    }
}

/// Event emitted by the side chain shared storage contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedDbEvent {
    NewSignature { signer: Address, msg_hash: H256 },
    Unknown { topic0: Option<H256> },
}

impl SharedDbEvent {
    pub fn decode(log: &Log) -> Result<Self, DecodeError> {
        static TOPIC: OnceLock<H256> = OnceLock::new();
        let new_signature = TOPIC.get_or_init(|| topic_of(signatures::NEW_SIGNATURE));

        match log.topics.first() {
            Some(topic0) if topic0 == new_signature => {
                let f = fields(log)?;
                Ok(SharedDbEvent::NewSignature {
                    signer: abi::word_to_address(at(&f, 0)?)?,
                    msg_hash: *at(&f, 1)?,
                })
            }
            other => Ok(SharedDbEvent::Unknown {
                topic0: other.copied(),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::uint_word;

    #[test]
    fn test_decode_exchange_request() {
        let event = BridgeEvent::decode(&build::exchange(103, 5, 0)).unwrap();
        assert_eq!(event, BridgeEvent::ExchangeRequest { value: 5, nonce: 0 });
    }

    #[test]
    fn test_decode_indexed_fields() {
        // epoch indexed in a topic, nothing in data
        let mut log = build::log(7, 0, signatures::EPOCH_END, &[]);
        log.topics.push(uint_word(4));
        assert_eq!(
            BridgeEvent::decode(&log).unwrap(),
            BridgeEvent::EpochEnd { epoch: 4 }
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        let log = build::log(1, 0, "Paused()", &[]);
        assert!(matches!(
            BridgeEvent::decode(&log).unwrap(),
            BridgeEvent::Unknown { topic0: Some(_) }
        ));

        let truncated = build::log(1, 0, signatures::NEW_EPOCH, &[uint_word(1)]);
        assert_eq!(
            BridgeEvent::decode(&truncated),
            Err(DecodeError::MissingField(1))
        );

        let oversized = build::log(1, 0, signatures::EPOCH_CLOSE, &[uint_word(70_000)]);
        assert!(BridgeEvent::decode(&oversized).is_err());
    }

    #[test]
    fn test_decode_new_signature() {
        let mut signer = [0u8; 32];
        signer[12..].copy_from_slice(&[0x42; 20]);
        let log = build::log(9, 1, signatures::NEW_SIGNATURE, &[signer, [0x77; 32]]);
        assert_eq!(
            SharedDbEvent::decode(&log).unwrap(),
            SharedDbEvent::NewSignature {
                signer: [0x42; 20],
                msg_hash: [0x77; 32],
            }
        );
        let other = build::log(9, 2, signatures::FORCE_SIGN, &[]);
        assert!(matches!(
            SharedDbEvent::decode(&other).unwrap(),
            SharedDbEvent::Unknown { .. }
        ));
    }
}
