//! Recovers the public key of the account that sent a home chain transaction
//! and maps it onto the foreign chain.

use anyhow::{anyhow, Result};
use k256::{
    ecdsa::{RecoveryId, Signature, VerifyingKey},
    EncodedPoint,
};
use rlp::RlpStream;
use sha3::{Digest, Keccak256};
use tssbridge_types::H256;

use crate::chain_client::TransactionInfo;

fn trim(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn append_common_tail(rlp: &mut RlpStream, tx: &TransactionInfo) {
    rlp.append(&tx.gas);
    match &tx.to {
        Some(to) => rlp.append(&to.as_slice()),
        None => rlp.append_empty_data(),
    };
    rlp.append(&trim(&tx.value)).append(&tx.input);
}

fn append_access_list(rlp: &mut RlpStream, tx: &TransactionInfo) {
    rlp.begin_list(tx.access_list.len());
    for item in &tx.access_list {
        rlp.begin_list(2);
        rlp.append(&item.address.as_slice());
        rlp.begin_list(item.storage_keys.len());
        for key in &item.storage_keys {
            rlp.append(&key.as_slice());
        }
    }
}

/// Keccak-256 of the payload the sender signed, and the recovery id encoded in `v`.
pub fn signing_hash(tx: &TransactionInfo) -> Result<(H256, RecoveryId)> {
    let (payload, parity) = match tx.tx_type {
        0 => {
            let eip155_chain = if tx.v >= 35 { Some((tx.v - 35) / 2) } else { None };
            let mut rlp = RlpStream::new_list(if eip155_chain.is_some() { 9 } else { 6 });
            rlp.append(&tx.nonce)
                .append(&tx.gas_price.ok_or_else(|| anyhow!("legacy tx without gasPrice"))?);
            append_common_tail(&mut rlp, tx);
            let parity = match eip155_chain {
                Some(chain_id) => {
                    rlp.append(&chain_id).append(&0u8).append(&0u8);
                    tx.v - (chain_id * 2 + 35)
                }
                None => tx
                    .v
                    .checked_sub(27)
                    .ok_or_else(|| anyhow!("invalid legacy v {}", tx.v))?,
            };
            (rlp.out().to_vec(), parity)
        }
        1 | 2 => {
            let chain_id = tx
                .chain_id
                .ok_or_else(|| anyhow!("typed tx without chainId"))?;
            let mut rlp = RlpStream::new_list(if tx.tx_type == 1 { 8 } else { 9 });
            rlp.append(&chain_id).append(&tx.nonce);
            if tx.tx_type == 1 {
                rlp.append(&tx.gas_price.ok_or_else(|| anyhow!("missing gasPrice"))?);
            } else {
                rlp.append(
                    &tx.max_priority_fee_per_gas
                        .ok_or_else(|| anyhow!("missing maxPriorityFeePerGas"))?,
                )
                .append(&tx.max_fee_per_gas.ok_or_else(|| anyhow!("missing maxFeePerGas"))?);
            }
            append_common_tail(&mut rlp, tx);
            append_access_list(&mut rlp, tx);

            let mut payload = vec![tx.tx_type];
            payload.extend_from_slice(&rlp.out());
            (payload, tx.v)
        }
        other => return Err(anyhow!("unsupported transaction type {}", other)),
    };

    let parity = u8::try_from(parity).map_err(|_| anyhow!("invalid v {}", tx.v))?;
    let recovery_id =
        RecoveryId::from_byte(parity).ok_or_else(|| anyhow!("invalid recovery id {}", parity))?;
    Ok((Keccak256::digest(&payload).into(), recovery_id))
}

pub fn recover_sender_key(tx: &TransactionInfo) -> Result<VerifyingKey> {
    let (prehash, mut recovery_id) = signing_hash(tx)?;
    let mut signature = Signature::from_scalars(tx.r, tx.s)
        .map_err(|e| anyhow!("malformed signature: {}", e))?;

    // Pre-homestead senders may use high s; recovery expects the normalized form.
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
        .map_err(|e| anyhow!("signature recovery failed: {}", e))
}

pub fn key_from_coordinates(x: &H256, y: &H256) -> Result<VerifyingKey> {
    let point = EncodedPoint::from_affine_coordinates(&(*x).into(), &(*y).into(), false);
    VerifyingKey::from_encoded_point(&point).map_err(|_| anyhow!("point is not on the curve"))
}

/// Turns a public key into an address of the foreign chain.
pub trait ForeignAddressEncoder: Send + Sync {
    fn encode(&self, key: &VerifyingKey) -> String;
}

/// Compressed SEC1 encoding in hex. Deployments plug in the foreign chain's
/// own address format.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressedKeyHex;

impl ForeignAddressEncoder for CompressedKeyHex {
    fn encode(&self, key: &VerifyingKey) -> String {
        hex::encode(key.to_encoded_point(true).as_bytes())
    }
}

/// Converts a home token amount to the foreign chain's base unit, rounding down.
pub fn convert_value(value: u128, home_decimals: u32, foreign_decimals: u32) -> Option<u64> {
    let converted = if home_decimals >= foreign_decimals {
        value / 10u128.checked_pow(home_decimals - foreign_decimals)?
    } else {
        value.checked_mul(10u128.checked_pow(foreign_decimals - home_decimals)?)?
    };
    u64::try_from(converted).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32].into()).unwrap()
    }

    fn unsigned(tx_type: u8) -> TransactionInfo {
        let mut value = [0u8; 32];
        value[31] = 5;
        TransactionInfo {
            hash: [1; 32],
            tx_type,
            chain_id: if tx_type == 0 { None } else { Some(1337) },
            nonce: 3,
            gas_price: Some(1_000_000_000),
            max_priority_fee_per_gas: if tx_type == 2 { Some(1) } else { None },
            max_fee_per_gas: if tx_type == 2 { Some(2_000_000_000) } else { None },
            gas: 90_000,
            to: Some([0xaa; 20]),
            value,
            input: vec![0xde, 0xad],
            ..Default::default()
        }
    }

    /// Signs `tx` in place, `v_of` maps the parity bit to the tx's `v`.
    fn sign(tx: &mut TransactionInfo, v_of: impl Fn(u64) -> u64) {
        // the parity in v is part of the payload for EIP-155, so settle v first
        tx.v = v_of(0);
        let (prehash, _) = signing_hash(tx).unwrap();
        let (signature, recovery_id) = signing_key().sign_prehash_recoverable(&prehash).unwrap();
        let bytes = signature.to_bytes();
        tx.r.copy_from_slice(&bytes[..32]);
        tx.s.copy_from_slice(&bytes[32..]);
        tx.v = v_of(recovery_id.is_y_odd() as u64);
    }

    #[test]
    fn test_recover_dynamic_fee_sender() {
        let mut tx = unsigned(2);
        sign(&mut tx, |parity| parity);
        let key = recover_sender_key(&tx).unwrap();
        assert_eq!(&key, signing_key().verifying_key());
    }

    #[test]
    fn test_recover_eip155_sender() {
        let mut tx = unsigned(0);
        sign(&mut tx, |parity| 1337 * 2 + 35 + parity);
        let key = recover_sender_key(&tx).unwrap();
        assert_eq!(&key, signing_key().verifying_key());
    }

    #[test]
    fn test_recover_access_list_sender() {
        let mut tx = unsigned(1);
        tx.access_list = vec![crate::chain_client::AccessListItem {
            address: [0xbb; 20],
            storage_keys: vec![[0x01; 32]],
        }];
        sign(&mut tx, |parity| parity);
        assert_eq!(&recover_sender_key(&tx).unwrap(), signing_key().verifying_key());
    }

    #[test]
    fn test_tampered_payload_recovers_other_key() {
        let mut tx = unsigned(2);
        sign(&mut tx, |parity| parity);
        tx.value[31] = 6;
        if let Ok(key) = recover_sender_key(&tx) {
            assert_ne!(&key, signing_key().verifying_key());
        }
    }

    #[test]
    fn test_unsupported_type() {
        assert!(signing_hash(&unsigned(3)).is_err());
    }

    #[test]
    fn test_compressed_key_encoding() {
        let key = signing_key();
        let encoded = CompressedKeyHex.encode(key.verifying_key());
        assert_eq!(encoded.len(), 66);
        assert!(encoded.starts_with("02") || encoded.starts_with("03"));

        let point = key.verifying_key().to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(point.x().unwrap());
        y.copy_from_slice(point.y().unwrap());
        assert_eq!(&key_from_coordinates(&x, &y).unwrap(), key.verifying_key());
        assert!(key_from_coordinates(&[0; 32], &[0; 32]).is_err());
    }

    #[test]
    fn test_convert_value() {
        // 1 token with 18 decimals is 1e8 base units with 8 decimals
        assert_eq!(convert_value(1_000_000_000_000_000_000, 18, 8), Some(100_000_000));
        assert_eq!(convert_value(9_999_999_999, 18, 8), Some(0));
        assert_eq!(convert_value(5, 8, 8), Some(5));
        assert_eq!(convert_value(5, 6, 8), Some(500));
        assert_eq!(convert_value(u128::MAX, 18, 8), None);
    }
}
