//! The mempool collaborator.
//!
//! The sequencer only sees the [`MempoolProvider`] trait; the pool itself is
//! an external component. The in-memory [`MempoolGuard`] implementation
//! backs tests and single-process deployments.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use cdk_basic_types::{BatchNumber, L2BlockNumber, H256};
use cdk_types::Transaction;

/// What the sequencer asks of the pool.
#[async_trait]
pub trait MempoolProvider: 'static + fmt::Debug + Send + Sync {
    /// Yields up to `max_n` best transactions not present in
    /// `already_yielded`, each fitting `gas_limit`. The flag reports whether
    /// the pool was in a fully consistent condition for the yield.
    async fn yield_best(
        &self,
        max_n: usize,
        already_yielded: &HashSet<H256>,
        gas_limit: u64,
        execution_at: L2BlockNumber,
    ) -> (Vec<Transaction>, bool);

    /// Permanently discards a transaction that can never be sequenced.
    async fn mark_for_discard(&self, tx_hash: H256);

    /// The limbo handoff recorded for a rejected batch, if any.
    async fn get_limbo_tx(&self, batch: BatchNumber) -> Option<(u64, H256)>;

    /// Records the post-reprocess state root of a limbo transaction.
    async fn update_limbo_root(&self, tx_hash: H256, root: H256);

    /// Brackets during which the pool must not flush to its backing store.
    fn lock_flusher(&self);
    fn unlock_flusher(&self);
}

#[derive(Debug, Default)]
struct MempoolInner {
    transactions: HashMap<H256, Transaction>,
    discarded: HashSet<H256>,
    limbo: HashMap<BatchNumber, (u64, H256)>,
    limbo_roots: HashMap<H256, H256>,
    flusher_locked: bool,
}

/// Thread-safe in-memory pool. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MempoolGuard {
    inner: Arc<Mutex<MempoolInner>>,
}

impl MempoolGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tx: Transaction) {
        let mut inner = self.lock();
        let hash = tx.hash();
        if inner.discarded.contains(&hash) {
            return;
        }
        inner.transactions.insert(hash, tx);
    }

    pub fn insert_limbo(&self, batch: BatchNumber, timestamp: u64, tx_hash: H256) {
        self.lock().limbo.insert(batch, (timestamp, tx_hash));
    }

    pub fn limbo_root(&self, tx_hash: H256) -> Option<H256> {
        self.lock().limbo_roots.get(&tx_hash).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().transactions.is_empty()
    }

    pub fn contains(&self, tx_hash: H256) -> bool {
        self.lock().transactions.contains_key(&tx_hash)
    }

    pub fn is_discarded(&self, tx_hash: H256) -> bool {
        self.lock().discarded.contains(&tx_hash)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MempoolInner> {
        self.inner.lock().expect("mempool lock is poisoned")
    }
}

#[async_trait]
impl MempoolProvider for MempoolGuard {
    async fn yield_best(
        &self,
        max_n: usize,
        already_yielded: &HashSet<H256>,
        gas_limit: u64,
        _execution_at: L2BlockNumber,
    ) -> (Vec<Transaction>, bool) {
        let inner = self.lock();
        let mut candidates: Vec<&Transaction> = inner
            .transactions
            .iter()
            .filter(|(hash, tx)| {
                !already_yielded.contains(*hash)
                    && !inner.discarded.contains(*hash)
                    && tx.gas <= gas_limit
            })
            .map(|(_, tx)| tx)
            .collect();
        // Best price first; nonce order within a sender.
        candidates.sort_by(|a, b| {
            b.effective_gas_price()
                .cmp(&a.effective_gas_price())
                .then_with(|| a.from.cmp(&b.from))
                .then_with(|| a.nonce.cmp(&b.nonce))
        });
        let yielded = candidates.into_iter().take(max_n).cloned().collect();
        (yielded, !inner.flusher_locked)
    }

    async fn mark_for_discard(&self, tx_hash: H256) {
        let mut inner = self.lock();
        inner.transactions.remove(&tx_hash);
        inner.discarded.insert(tx_hash);
        tracing::debug!(?tx_hash, "transaction marked for permanent discard");
    }

    async fn get_limbo_tx(&self, batch: BatchNumber) -> Option<(u64, H256)> {
        self.lock().limbo.get(&batch).copied()
    }

    async fn update_limbo_root(&self, tx_hash: H256, root: H256) {
        self.lock().limbo_roots.insert(tx_hash, root);
    }

    fn lock_flusher(&self) {
        self.lock().flusher_locked = true;
    }

    fn unlock_flusher(&self) {
        self.lock().flusher_locked = false;
    }
}

#[cfg(test)]
mod tests {
    use cdk_basic_types::{Address, U256};
    use cdk_types::transaction::TransactionRequest;
    use secp256k1::SecretKey;

    use super::*;

    fn tx(nonce: u64, gas_price: u64, seed: u8) -> Transaction {
        Transaction::sign(
            TransactionRequest {
                nonce,
                gas_price: U256::from(gas_price),
                gas: 21_000,
                to: Some(Address::repeat_byte(0x11)),
                value: U256::zero(),
                data: vec![],
                effective_gas_price_pct: 255,
            },
            1001,
            &SecretKey::from_slice(&[seed; 32]).unwrap(),
        )
    }

    #[tokio::test]
    async fn yield_orders_by_price_and_respects_max() {
        let pool = MempoolGuard::new();
        pool.insert(tx(0, 100, 1));
        pool.insert(tx(0, 300, 2));
        pool.insert(tx(0, 200, 3));

        let (yielded, ok) = pool
            .yield_best(2, &HashSet::new(), 30_000_000, L2BlockNumber(1))
            .await;
        assert!(ok);
        assert_eq!(yielded.len(), 2);
        assert_eq!(yielded[0].gas_price, U256::from(300u64));
        assert_eq!(yielded[1].gas_price, U256::from(200u64));
    }

    #[tokio::test]
    async fn yield_deduplicates_against_the_yielded_set() {
        let pool = MempoolGuard::new();
        let first = tx(0, 100, 1);
        let hash = first.hash();
        pool.insert(first);
        pool.insert(tx(0, 50, 2));

        let mut yielded_set = HashSet::new();
        yielded_set.insert(hash);
        let (yielded, _) = pool
            .yield_best(10, &yielded_set, 30_000_000, L2BlockNumber(1))
            .await;
        assert_eq!(yielded.len(), 1);
        assert_ne!(yielded[0].hash(), hash);
    }

    #[tokio::test]
    async fn gas_limit_filters_oversized_transactions() {
        let pool = MempoolGuard::new();
        pool.insert(tx(0, 100, 1));
        let (yielded, _) = pool
            .yield_best(10, &HashSet::new(), 20_000, L2BlockNumber(1))
            .await;
        assert!(yielded.is_empty());
    }

    #[tokio::test]
    async fn discarded_transactions_never_come_back() {
        let pool = MempoolGuard::new();
        let transaction = tx(0, 100, 1);
        let hash = transaction.hash();
        pool.insert(transaction.clone());
        pool.mark_for_discard(hash).await;
        assert!(pool.is_discarded(hash));

        pool.insert(transaction);
        let (yielded, _) = pool
            .yield_best(10, &HashSet::new(), 30_000_000, L2BlockNumber(1))
            .await;
        assert!(yielded.is_empty());
    }

    #[tokio::test]
    async fn flusher_bracket_is_reported() {
        let pool = MempoolGuard::new();
        pool.lock_flusher();
        let (_, ok) = pool
            .yield_best(10, &HashSet::new(), 30_000_000, L2BlockNumber(1))
            .await;
        assert!(!ok);
        pool.unlock_flusher();
        let (_, ok) = pool
            .yield_best(10, &HashSet::new(), 30_000_000, L2BlockNumber(1))
            .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn limbo_records_round_trip() {
        let pool = MempoolGuard::new();
        let tx_hash = H256::repeat_byte(7);
        pool.insert_limbo(BatchNumber(9), 1_700_000_000, tx_hash);
        assert_eq!(
            pool.get_limbo_tx(BatchNumber(9)).await,
            Some((1_700_000_000, tx_hash))
        );
        pool.update_limbo_root(tx_hash, H256::repeat_byte(1)).await;
        assert_eq!(pool.limbo_root(tx_hash), Some(H256::repeat_byte(1)));
    }
}
