//! The precompiled contracts the rollup supports: ecrecover, SHA-256 and
//! identity. SHA-256 charges the dedicated virtual counter.

use cdk_basic_types::{Address, H160};
use cdk_counters::{CounterKind, Counters};
use cdk_types::hasher::keccak256;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, SECP256K1,
};
use sha2::{Digest, Sha256};

pub const ECRECOVER: Address = H256_ADDRESS(1);
pub const SHA256: Address = H256_ADDRESS(2);
pub const IDENTITY: Address = H256_ADDRESS(4);

#[allow(non_snake_case)]
const fn H256_ADDRESS(last: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = last;
    H160(bytes)
}

const ECRECOVER_GAS: u64 = 3_000;
const SHA256_BASE_GAS: u64 = 60;
const SHA256_WORD_GAS: u64 = 12;
const IDENTITY_BASE_GAS: u64 = 15;
const IDENTITY_WORD_GAS: u64 = 3;
const SHA256_BLOCK_BYTES: u64 = 64;

pub fn is_precompile(address: Address) -> bool {
    matches!(address, a if a == ECRECOVER || a == SHA256 || a == IDENTITY)
}

/// Runs a precompile. Returns `(gas_cost, output)`; `None` output means the
/// call fails entirely (only on out-of-gas, checked by the caller via cost).
pub fn execute(address: Address, input: &[u8], counters: &mut Counters) -> (u64, Vec<u8>) {
    if address == ECRECOVER {
        (ECRECOVER_GAS, ecrecover(input))
    } else if address == SHA256 {
        let words = (input.len() as u64).div_ceil(32);
        counters.add(
            CounterKind::Sha256,
            (input.len() as u64 + 1).div_ceil(SHA256_BLOCK_BYTES),
        );
        (
            SHA256_BASE_GAS + SHA256_WORD_GAS * words,
            Sha256::digest(input).to_vec(),
        )
    } else if address == IDENTITY {
        let words = (input.len() as u64).div_ceil(32);
        (IDENTITY_BASE_GAS + IDENTITY_WORD_GAS * words, input.to_vec())
    } else {
        (0, Vec::new())
    }
}

fn ecrecover(input: &[u8]) -> Vec<u8> {
    let mut padded = [0u8; 128];
    let len = input.len().min(128);
    padded[..len].copy_from_slice(&input[..len]);

    let hash = &padded[0..32];
    let v = &padded[32..64];
    // v must be 27 or 28, left-padded with zeros.
    if v[..31].iter().any(|byte| *byte != 0) || (v[31] != 27 && v[31] != 28) {
        return Vec::new();
    }
    let Ok(recovery_id) = RecoveryId::from_i32((v[31] - 27) as i32) else {
        return Vec::new();
    };
    let Ok(signature) = RecoverableSignature::from_compact(&padded[64..128], recovery_id) else {
        return Vec::new();
    };
    let Ok(message) = Message::from_slice(hash) else {
        return Vec::new();
    };
    let Ok(public_key) = SECP256K1.recover_ecdsa(&message, &signature) else {
        return Vec::new();
    };
    let digest = keccak256(&public_key.serialize_uncompressed()[1..]);
    let mut output = vec![0u8; 32];
    output[12..].copy_from_slice(&digest.as_bytes()[12..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_echoes_input() {
        let mut counters = Counters::default();
        let (gas, output) = execute(IDENTITY, b"hello", &mut counters);
        assert_eq!(output, b"hello");
        assert_eq!(gas, IDENTITY_BASE_GAS + IDENTITY_WORD_GAS);
    }

    #[test]
    fn sha256_charges_the_counter() {
        let mut counters = Counters::default();
        let (_, output) = execute(SHA256, &[0u8; 200], &mut counters);
        assert_eq!(output.len(), 32);
        assert_eq!(counters.get(CounterKind::Sha256), 4);
    }

    #[test]
    fn ecrecover_rejects_bad_v() {
        let mut counters = Counters::default();
        let mut input = [0u8; 128];
        input[63] = 26;
        let (_, output) = execute(ECRECOVER, &input, &mut counters);
        assert!(output.is_empty());
    }
}
