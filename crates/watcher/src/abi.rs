//! Minimal Solidity ABI support for the handful of events and view functions
//! the watchers need.

use sha3::{Digest, Keccak256};
use thiserror::Error;
use tssbridge_types::{Address, H256};

const WORD: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing field {0}")]
    MissingField(usize),

    #[error("value does not fit in {0} bits")]
    Overflow(u32),

    #[error("data length {0} is not a multiple of 32")]
    Misaligned(usize),

    #[error("offset {0} out of bounds")]
    OutOfBounds(usize),

    #[error("invalid public key")]
    InvalidPublicKey,
}

pub fn keccak256(data: &[u8]) -> H256 {
    Keccak256::digest(data).into()
}

/// Topic 0 of an event with the given canonical signature.
pub fn event_topic(signature: &str) -> H256 {
    keccak256(signature.as_bytes())
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn uint_word(value: u64) -> H256 {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Calldata for a function taking only static arguments.
pub fn encode_call(signature: &str, args: &[H256]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    data
}

pub fn words(data: &[u8]) -> Result<Vec<H256>, DecodeError> {
    if data.len() % WORD != 0 {
        return Err(DecodeError::Misaligned(data.len()));
    }
    Ok(data
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

fn fits(word: &H256, bits: u32) -> Result<(), DecodeError> {
    let leading = WORD - (bits as usize / 8);
    if word[..leading].iter().any(|b| *b != 0) {
        return Err(DecodeError::Overflow(bits));
    }
    Ok(())
}

pub fn word_to_u64(word: &H256) -> Result<u64, DecodeError> {
    fits(word, 64)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(arr))
}

pub fn word_to_u128(word: &H256) -> Result<u128, DecodeError> {
    fits(word, 128)?;
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(arr))
}

pub fn word_to_u16(word: &H256) -> Result<u16, DecodeError> {
    let value = word_to_u64(word)?;
    u16::try_from(value).map_err(|_| DecodeError::Overflow(16))
}

pub fn word_to_u32(word: &H256) -> Result<u32, DecodeError> {
    let value = word_to_u64(word)?;
    u32::try_from(value).map_err(|_| DecodeError::Overflow(32))
}

pub fn word_to_address(word: &H256) -> Result<Address, DecodeError> {
    fits(word, 160)?;
    let mut address = [0u8; 20];
    address.copy_from_slice(&word[12..]);
    Ok(address)
}

fn word_at(data: &[u8], offset: usize) -> Result<H256, DecodeError> {
    let end = offset.checked_add(WORD).ok_or(DecodeError::OutOfBounds(offset))?;
    let slice = data.get(offset..end).ok_or(DecodeError::OutOfBounds(offset))?;
    let mut word = [0u8; WORD];
    word.copy_from_slice(slice);
    Ok(word)
}

fn usize_at(data: &[u8], offset: usize) -> Result<usize, DecodeError> {
    let value = word_to_u64(&word_at(data, offset)?)?;
    usize::try_from(value).map_err(|_| DecodeError::OutOfBounds(offset))
}

/// Single `uint` return value.
pub fn decode_uint(data: &[u8]) -> Result<u64, DecodeError> {
    word_to_u64(&word_at(data, 0)?)
}

/// Single `address[]` return value.
pub fn decode_address_array(data: &[u8]) -> Result<Vec<Address>, DecodeError> {
    let offset = usize_at(data, 0)?;
    let len = usize_at(data, offset)?;
    (0..len)
        .map(|i| word_to_address(&word_at(data, offset + WORD * (i + 1))?))
        .collect()
}

/// Single `bytes` return value.
pub fn decode_bytes(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let offset = usize_at(data, 0)?;
    let len = usize_at(data, offset)?;
    let start = offset + WORD;
    let end = start.checked_add(len).ok_or(DecodeError::OutOfBounds(start))?;
    data.get(start..end)
        .map(|bytes| bytes.to_vec())
        .ok_or(DecodeError::OutOfBounds(start))
}

#[cfg(test)]
pub(crate) mod encode {
    //! Encoders for the dynamic return types, used to fake contract replies.
    use super::*;

    pub fn address_array(addresses: &[Address]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&uint_word(32));
        out.extend_from_slice(&uint_word(addresses.len() as u64));
        for address in addresses {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(address);
            out.extend_from_slice(&word);
        }
        out
    }

    pub fn bytes(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&uint_word(32));
        out.extend_from_slice(&uint_word(data.len() as u64));
        out.extend_from_slice(data);
        let padding = (WORD - data.len() % WORD) % WORD;
        out.extend(std::iter::repeat(0u8).take(padding));
        out
    }
}
