use std::sync::Arc;

use cdk_basic_types::{BatchNumber, ForkId, L1BlockNumber, L1InfoTreeIndex, L2BlockNumber, H256};
use cdk_config::L1WatchConfig;
use cdk_dal::{ConnectionPool, CoreDal};
use cdk_types::{block::L2BlockHeader, SealedL2Block};

use super::{events::testonly::*, testonly::MockL1Client, *};

async fn watcher(client: Arc<MockL1Client>, pool: &ConnectionPool) -> L1Watch {
    L1Watch::new(client, L1WatchConfig::for_tests(), pool.clone())
        .await
        .unwrap()
}

async fn run_window(watch: &mut L1Watch, pool: &ConnectionPool, from: u64, to: u64) {
    let mut storage = pool.connection().await.unwrap();
    watch
        .process_window(&mut storage, L1BlockNumber(from), L1BlockNumber(to))
        .await
        .unwrap();
    storage.commit().await.unwrap();
}

#[tokio::test]
async fn sequenced_and_verified_batches_are_recorded() {
    let client = Arc::new(MockL1Client::new());
    client.push_log(sequence_batches_etrog(5, H256::repeat_byte(1), 10));
    client.push_log(verify_batches_etrog(1, 5, H256::repeat_byte(2), 11));
    // A verification for a foreign rollup is ignored.
    client.push_log(verify_batches_etrog(9, 6, H256::repeat_byte(3), 12));

    let pool = ConnectionPool::new_in_memory();
    let mut watch = watcher(client, &pool).await;
    run_window(&mut watch, &pool, 1, 20).await;

    let mut storage = pool.connection().await.unwrap();
    let sequenced = storage
        .l1_info_dal()
        .get_sequenced_batch(BatchNumber(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sequenced.l1_info_root, Some(H256::repeat_byte(1)));
    assert_eq!(
        storage.l1_info_dal().highest_verified_batch().await.unwrap(),
        BatchNumber(5)
    );
    assert!(storage
        .l1_info_dal()
        .get_batch_verification(BatchNumber(6))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn info_tree_indices_are_dense_from_one() {
    let client = Arc::new(MockL1Client::new());
    client.push_log(update_l1_info_tree(H256::repeat_byte(1), H256::repeat_byte(2), 10));
    client.push_log(update_l1_info_tree(H256::repeat_byte(3), H256::repeat_byte(4), 11));

    let pool = ConnectionPool::new_in_memory();
    let mut watch = watcher(client, &pool).await;
    run_window(&mut watch, &pool, 1, 20).await;

    let mut storage = pool.connection().await.unwrap();
    let first = storage
        .l1_info_dal()
        .get_l1_info_tree_update(L1InfoTreeIndex(1))
        .await
        .unwrap()
        .unwrap();
    let second = storage
        .l1_info_dal()
        .get_l1_info_tree_update(L1InfoTreeIndex(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.index, L1InfoTreeIndex(1));
    assert_eq!(second.index, L1InfoTreeIndex(2));
    // Timestamps follow the resolved L1 headers, so they grow with indices.
    assert!(second.timestamp > first.timestamp);
    assert_ne!(
        storage
            .l1_info_dal()
            .get_l1_info_root(L1InfoTreeIndex(1))
            .await
            .unwrap(),
        storage
            .l1_info_dal()
            .get_l1_info_root(L1InfoTreeIndex(2))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn replaying_a_window_is_idempotent() {
    let client = Arc::new(MockL1Client::new());
    client.push_log(sequence_batches_etrog(1, H256::repeat_byte(1), 10));
    client.push_log(update_l1_info_tree(H256::repeat_byte(1), H256::repeat_byte(2), 10));
    client.push_log(verify_batches_etrog(1, 1, H256::repeat_byte(2), 11));

    let pool = ConnectionPool::new_in_memory();
    let mut watch = watcher(client, &pool).await;
    run_window(&mut watch, &pool, 1, 20).await;
    // The duplicate info-tree leaf is skipped; everything else overwrites
    // with identical contents.
    run_window(&mut watch, &pool, 1, 20).await;

    let mut storage = pool.connection().await.unwrap();
    assert!(storage
        .l1_info_dal()
        .get_l1_info_tree_update(L1InfoTreeIndex(2))
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        storage
            .l1_info_dal()
            .get_latest_l1_info_tree_update()
            .await
            .unwrap()
            .unwrap()
            .index,
        L1InfoTreeIndex(1)
    );
}

#[tokio::test]
async fn injected_batch_is_recorded_once() {
    let client = Arc::new(MockL1Client::new());
    let sequencer = cdk_basic_types::Address::repeat_byte(0x55);
    client.push_log(initial_sequence_batches(vec![0xaa; 8], sequencer, 7));
    client.push_log(initial_sequence_batches(vec![0xbb; 8], sequencer, 8));

    let pool = ConnectionPool::new_in_memory();
    let mut watch = watcher(client, &pool).await;
    run_window(&mut watch, &pool, 1, 20).await;

    let mut storage = pool.connection().await.unwrap();
    let injected = storage
        .l1_info_dal()
        .get_injected_batch()
        .await
        .unwrap()
        .unwrap();
    // The second announcement was ignored.
    assert_eq!(injected.transaction, vec![0xaa; 8]);
    assert_eq!(injected.l1_block_number, L1BlockNumber(7));
    assert_eq!(injected.sequencer, sequencer);
}

#[tokio::test]
async fn fork_transitions_are_learned_from_l1() {
    let client = Arc::new(MockL1Client::new());
    client.push_log(update_rollup(1, 11, 500, 15));

    let pool = ConnectionPool::new_in_memory();
    {
        let mut storage = pool.connection().await.unwrap();
        storage
            .forks_dal()
            .write_fork(ForkId(9), BatchNumber(1))
            .await
            .unwrap();
        storage.commit().await.unwrap();
    }
    let mut watch = watcher(client, &pool).await;
    run_window(&mut watch, &pool, 1, 20).await;

    let mut storage = pool.connection().await.unwrap();
    assert_eq!(
        storage
            .forks_dal()
            .fork_id_for_batch(BatchNumber(499))
            .await
            .unwrap(),
        Some(ForkId(9))
    );
    assert_eq!(
        storage
            .forks_dal()
            .fork_id_for_batch(BatchNumber(500))
            .await
            .unwrap(),
        Some(ForkId(11))
    );
}

#[tokio::test]
async fn verified_root_mismatch_is_fatal() {
    let pool = ConnectionPool::new_in_memory();
    {
        // A locally sealed block for batch 3 with a root L1 will disagree on.
        let mut storage = pool.connection().await.unwrap();
        storage
            .blocks_dal()
            .write_block_batch(L2BlockNumber(30), BatchNumber(3))
            .await
            .unwrap();
        let mut header = L2BlockHeader::new(
            L2BlockNumber(30),
            1_700_000_000,
            cdk_basic_types::Address::repeat_byte(1),
            ForkId(9),
        );
        header.state_root = H256::repeat_byte(0xaa);
        storage
            .blocks_dal()
            .write_sealed_block(&SealedL2Block {
                header,
                transactions: vec![],
            })
            .await
            .unwrap();
        storage.commit().await.unwrap();
    }

    let client = Arc::new(MockL1Client::new());
    client.push_log(verify_batches_etrog(1, 3, H256::repeat_byte(0xbb), 12));
    let mut watch = watcher(client, &pool).await;

    let mut storage = pool.connection().await.unwrap();
    let err = watch
        .process_window(&mut storage, L1BlockNumber(1), L1BlockNumber(20))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("diverges"));
}
