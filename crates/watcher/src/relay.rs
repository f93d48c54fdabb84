use tssbridge_types::{Address, H256};

/// The single validator expected to relay the signed message `msg_hash`:
/// `validators[msg_hash mod n]`. Every validator computes the same answer from
/// the same ordered set. `None` when no quorum of `threshold` can exist.
pub fn responsible_sender(msg_hash: &H256, validators: &[Address], threshold: u16) -> Option<Address> {
    let n = validators.len();
    if threshold == 0 || threshold as usize > n {
        return None;
    }
    let modulus = n as u128;
    let index = msg_hash
        .iter()
        .fold(0u128, |rem, byte| (rem * 256 + *byte as u128) % modulus);
    validators.get(index as usize).copied()
}
