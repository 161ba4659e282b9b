//! The state-commitment seam.
//!
//! Real trie math lives outside the executor; the node only needs a
//! deterministic commitment that changes exactly when state changes. The
//! shipped committer is a keccak fold over accounts and slots in key order.

use cdk_basic_types::H256;
use cdk_types::hasher::keccak256_concat;
use sha3::{Digest, Keccak256};

use crate::state::InMemoryState;

pub trait StateCommitment: Send + Sync {
    fn state_root(&self, state: &InMemoryState) -> H256;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeccakCommitment;

impl StateCommitment for KeccakCommitment {
    fn state_root(&self, state: &InMemoryState) -> H256 {
        let mut hasher = Keccak256::new();
        for (address, account) in state.sorted_accounts() {
            let storage_root = storage_root(state, address);
            let leaf = keccak256_concat([
                address.as_bytes(),
                &account.nonce.to_be_bytes(),
                &{
                    let mut balance = [0u8; 32];
                    account.balance.to_big_endian(&mut balance);
                    balance
                },
                account.code_hash().as_bytes(),
                storage_root.as_bytes(),
            ]);
            hasher.update(leaf.as_bytes());
        }
        H256::from_slice(hasher.finalize().as_slice())
    }
}

fn storage_root(state: &InMemoryState, address: cdk_basic_types::Address) -> H256 {
    let slots = state.sorted_storage(address);
    if slots.is_empty() {
        return H256::zero();
    }
    let mut hasher = Keccak256::new();
    for (key, value) in slots {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    H256::from_slice(hasher.finalize().as_slice())
}

#[cfg(test)]
mod tests {
    use cdk_basic_types::{Address, U256};

    use super::*;

    #[test]
    fn root_changes_with_state_and_reverts_back() {
        let committer = KeccakCommitment;
        let mut state = InMemoryState::new();
        let empty_root = committer.state_root(&state);

        let snapshot = state.snapshot();
        state.set_balance(Address::repeat_byte(1), U256::from(1u64));
        let with_account = committer.state_root(&state);
        assert_ne!(empty_root, with_account);

        state.revert_to_snapshot(snapshot);
        assert_eq!(committer.state_root(&state), empty_root);
    }

    #[test]
    fn storage_affects_root() {
        let committer = KeccakCommitment;
        let mut state = InMemoryState::new();
        state.set_balance(Address::repeat_byte(1), U256::from(1u64));
        let before = committer.state_root(&state);
        state.set_storage(
            Address::repeat_byte(1),
            H256::repeat_byte(2),
            H256::repeat_byte(3),
        );
        assert_ne!(committer.state_root(&state), before);
    }
}
