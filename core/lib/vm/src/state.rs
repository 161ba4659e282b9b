//! Journaled intra-block state.
//!
//! All mutations go through journaled setters so that any prefix of a block
//! can be rolled off: `snapshot()` marks a point, `revert_to_snapshot()`
//! replays the journal backwards to it. Snapshots nest; reverting to an
//! outer snapshot discards inner ones.

use std::collections::{BTreeMap, HashMap};

use cdk_basic_types::{Address, H256, U256};
use cdk_types::hasher::keccak256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub code: Vec<u8>,
}

impl Account {
    pub fn code_hash(&self) -> H256 {
        keccak256(&self.code)
    }

    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }
}

#[derive(Debug)]
enum JournalEntry {
    AccountCreated(Address),
    NonceChanged(Address, u64),
    BalanceChanged(Address, U256),
    CodeChanged(Address, Vec<u8>),
    StorageChanged(Address, H256, Option<H256>),
    BlockRootRecorded(u64),
}

/// Marker into the journal; produced by [`InMemoryState::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot(usize);

#[derive(Debug, Default)]
pub struct InMemoryState {
    accounts: HashMap<Address, Account>,
    storage: HashMap<Address, HashMap<H256, H256>>,
    /// State roots of sealed blocks, readable through `BLOCKHASH`.
    block_roots: BTreeMap<u64, H256>,
    journal: Vec<JournalEntry>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.journal.len())
    }

    pub fn revert_to_snapshot(&mut self, snapshot: Snapshot) {
        while self.journal.len() > snapshot.0 {
            match self.journal.pop().expect("journal shrank unexpectedly") {
                JournalEntry::AccountCreated(address) => {
                    self.accounts.remove(&address);
                    self.storage.remove(&address);
                }
                JournalEntry::NonceChanged(address, nonce) => {
                    self.account_mut_unjournaled(address).nonce = nonce;
                }
                JournalEntry::BalanceChanged(address, balance) => {
                    self.account_mut_unjournaled(address).balance = balance;
                }
                JournalEntry::CodeChanged(address, code) => {
                    self.account_mut_unjournaled(address).code = code;
                }
                JournalEntry::StorageChanged(address, key, old) => {
                    let slots = self.storage.entry(address).or_default();
                    match old {
                        Some(value) => {
                            slots.insert(key, value);
                        }
                        None => {
                            slots.remove(&key);
                        }
                    }
                }
                JournalEntry::BlockRootRecorded(number) => {
                    self.block_roots.remove(&number);
                }
            }
        }
    }

    /// Discards the journal, making the current contents the new baseline.
    pub fn commit(&mut self) {
        self.journal.clear();
    }

    pub fn exists(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    pub fn nonce(&self, address: Address) -> u64 {
        self.accounts.get(&address).map_or(0, |account| account.nonce)
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.accounts
            .get(&address)
            .map_or_else(U256::zero, |account| account.balance)
    }

    pub fn code(&self, address: Address) -> &[u8] {
        self.accounts
            .get(&address)
            .map_or(&[], |account| account.code.as_slice())
    }

    pub fn code_hash(&self, address: Address) -> H256 {
        match self.accounts.get(&address) {
            Some(account) => account.code_hash(),
            None => H256::zero(),
        }
    }

    pub fn storage(&self, address: Address, key: H256) -> H256 {
        self.storage
            .get(&address)
            .and_then(|slots| slots.get(&key))
            .copied()
            .unwrap_or_else(H256::zero)
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        let old = self.ensure_account(address).nonce;
        self.journal.push(JournalEntry::NonceChanged(address, old));
        self.account_mut_unjournaled(address).nonce = nonce;
    }

    pub fn increment_nonce(&mut self, address: Address) {
        let nonce = self.nonce(address);
        self.set_nonce(address, nonce + 1);
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        let old = self.ensure_account(address).balance;
        self.journal.push(JournalEntry::BalanceChanged(address, old));
        self.account_mut_unjournaled(address).balance = balance;
    }

    pub fn add_balance(&mut self, address: Address, amount: U256) {
        let balance = self.balance(address).saturating_add(amount);
        self.set_balance(address, balance);
    }

    /// Returns `false` without mutating when the balance is insufficient.
    #[must_use]
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> bool {
        let balance = self.balance(address);
        if balance < amount {
            return false;
        }
        self.set_balance(address, balance - amount);
        true
    }

    pub fn set_code(&mut self, address: Address, code: Vec<u8>) {
        let old = self.ensure_account(address).code.clone();
        self.journal.push(JournalEntry::CodeChanged(address, old));
        self.account_mut_unjournaled(address).code = code;
    }

    pub fn set_storage(&mut self, address: Address, key: H256, value: H256) {
        self.ensure_account(address);
        let slots = self.storage.entry(address).or_default();
        let old = slots.get(&key).copied();
        self.journal.push(JournalEntry::StorageChanged(address, key, old));
        if value.is_zero() {
            slots.remove(&key);
        } else {
            slots.insert(key, value);
        }
    }

    /// Registers the state root of a sealed block; `BLOCKHASH` resolves
    /// through this registry.
    pub fn record_block_root(&mut self, number: u64, root: H256) {
        self.journal.push(JournalEntry::BlockRootRecorded(number));
        self.block_roots.insert(number, root);
    }

    pub fn block_root(&self, number: u64) -> Option<H256> {
        self.block_roots.get(&number).copied()
    }

    /// Accounts in address order, for the committer.
    pub fn sorted_accounts(&self) -> Vec<(Address, &Account)> {
        let mut accounts: Vec<_> = self.accounts.iter().map(|(a, acc)| (*a, acc)).collect();
        accounts.sort_by_key(|(address, _)| *address);
        accounts
    }

    /// Storage slots of `address` in key order, for the committer.
    pub fn sorted_storage(&self, address: Address) -> Vec<(H256, H256)> {
        let mut slots: Vec<_> = self
            .storage
            .get(&address)
            .map(|slots| slots.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        slots.sort_by_key(|(key, _)| *key);
        slots
    }

    fn ensure_account(&mut self, address: Address) -> &mut Account {
        if !self.accounts.contains_key(&address) {
            self.journal.push(JournalEntry::AccountCreated(address));
            self.accounts.insert(address, Account::default());
        }
        self.accounts.get_mut(&address).expect("account just ensured")
    }

    fn account_mut_unjournaled(&mut self, address: Address) -> &mut Account {
        self.accounts.entry(address).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_revert_restores_everything() {
        let mut state = InMemoryState::new();
        let alice = Address::repeat_byte(1);
        state.set_balance(alice, U256::from(100u64));
        state.set_nonce(alice, 5);
        state.commit();

        let snapshot = state.snapshot();
        state.set_balance(alice, U256::from(50u64));
        state.set_nonce(alice, 6);
        state.set_storage(alice, H256::repeat_byte(9), H256::repeat_byte(1));
        state.record_block_root(7, H256::repeat_byte(7));
        state.revert_to_snapshot(snapshot);

        assert_eq!(state.balance(alice), U256::from(100u64));
        assert_eq!(state.nonce(alice), 5);
        assert_eq!(state.storage(alice, H256::repeat_byte(9)), H256::zero());
        assert_eq!(state.block_root(7), None);
    }

    #[test]
    fn revert_removes_created_accounts() {
        let mut state = InMemoryState::new();
        let snapshot = state.snapshot();
        let bob = Address::repeat_byte(2);
        state.set_balance(bob, U256::from(1u64));
        assert!(state.exists(bob));
        state.revert_to_snapshot(snapshot);
        assert!(!state.exists(bob));
    }

    #[test]
    fn nested_snapshots_revert_in_order() {
        let mut state = InMemoryState::new();
        let alice = Address::repeat_byte(1);
        state.set_balance(alice, U256::from(10u64));

        let outer = state.snapshot();
        state.set_balance(alice, U256::from(20u64));
        let inner = state.snapshot();
        state.set_balance(alice, U256::from(30u64));

        state.revert_to_snapshot(inner);
        assert_eq!(state.balance(alice), U256::from(20u64));
        state.revert_to_snapshot(outer);
        assert_eq!(state.balance(alice), U256::from(10u64));
    }

    #[test]
    fn sub_balance_refuses_overdraft() {
        let mut state = InMemoryState::new();
        let alice = Address::repeat_byte(1);
        state.set_balance(alice, U256::from(10u64));
        assert!(!state.sub_balance(alice, U256::from(11u64)));
        assert_eq!(state.balance(alice), U256::from(10u64));
        assert!(state.sub_balance(alice, U256::from(4u64)));
        assert_eq!(state.balance(alice), U256::from(6u64));
    }

    #[test]
    fn zero_storage_writes_clear_slots() {
        let mut state = InMemoryState::new();
        let alice = Address::repeat_byte(1);
        let key = H256::repeat_byte(3);
        state.set_storage(alice, key, H256::repeat_byte(1));
        state.set_storage(alice, key, H256::zero());
        assert!(state.sorted_storage(alice).is_empty());
    }
}
