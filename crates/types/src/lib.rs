mod constants;
mod messages;
pub mod serde_hex;

pub use constants::*;
pub use messages::*;

use std::fmt;

pub type EpochId = u16;
pub type BlockNumber = u64;

pub type Address = [u8; constants::address::ADDRESS_SIZE];
pub type H256 = [u8; constants::hash::HASH_SIZE];

pub const ZERO_ADDRESS: Address = constants::address::ZERO_ADDRESS_BYTES;

/// Which side of the bridge a watcher tails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Home,
    Side,
}

impl ChainId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Home => "home",
            ChainId::Side => "side",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next unprocessed block of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cursor {
    pub chain: ChainId,
    pub block_number: BlockNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochPhase {
    Keygen,
    Ready,
    ClosingEpoch,
    Voting,
    FundsTransfer,
}

/// One generation of the validator set.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    pub id: EpochId,
    #[serde(with = "serde_hex::address_vec")]
    pub validators: Vec<Address>,
    pub threshold: u16,
    pub range_size: u16,
    pub active: bool,
    pub start_block: BlockNumber,
}

impl Epoch {
    pub fn contains(&self, address: &Address) -> bool {
        self.validators.iter().any(|v| v == address)
    }

    /// Size of the set. Sets read from the bridge are checked against
    /// [`party_count`] on arrival.
    pub fn parties(&self) -> u16 {
        party_count(&self.validators).unwrap_or(u16::MAX)
    }
}

/// Number of signing parties, if the set is small enough to be addressed.
pub fn party_count(validators: &[Address]) -> Option<u16> {
    u16::try_from(validators.len()).ok()
}

pub fn parse_address(s: &str) -> Result<Address, hex::FromHexError> {
    let mut out = ZERO_ADDRESS;
    hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
    Ok(out)
}

pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}
