use std::sync::{Arc, Mutex};

use cdk_basic_types::{BatchNumber, L2BlockNumber};
use cdk_dal::{Connection, ConnectionPool, CoreDal};
use cdk_basic_types::{Address, H256};
use cdk_datastream::{BookmarkKind, Entry, L2BlockStart, StreamWriter};
use tempfile::TempDir;

use super::{stage::Stage, *};

/// Stage that records the order it was driven in.
#[derive(Debug)]
struct RecordingStage {
    id: StageId,
    advance_to: u64,
    log: Arc<Mutex<Vec<(StageId, &'static str)>>>,
}

#[async_trait::async_trait]
impl Stage for RecordingStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn forward(
        &mut self,
        _storage: &mut Connection,
        from: L2BlockNumber,
    ) -> anyhow::Result<L2BlockNumber> {
        self.log.lock().unwrap().push((self.id, "forward"));
        Ok(from.max(L2BlockNumber(self.advance_to)))
    }

    async fn unwind(
        &mut self,
        _storage: &mut Connection,
        _to: L2BlockNumber,
    ) -> anyhow::Result<()> {
        self.log.lock().unwrap().push((self.id, "unwind"));
        Ok(())
    }
}

fn recording_stages(
    advance_to: u64,
) -> (Vec<Box<dyn Stage>>, Arc<Mutex<Vec<(StageId, &'static str)>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let ids = [
        StageId::L1Watch,
        StageId::L1InfoTree,
        StageId::Execution,
        StageId::Datastream,
        StageId::Finish,
    ];
    let stages = ids
        .into_iter()
        .map(|id| {
            Box::new(RecordingStage {
                id,
                advance_to,
                log: Arc::clone(&log),
            }) as Box<dyn Stage>
        })
        .collect();
    (stages, log)
}

#[tokio::test]
async fn forward_runs_bottom_up_and_persists_progress() {
    let pool = ConnectionPool::new_in_memory();
    let (stages, log) = recording_stages(7);
    let mut sync = StagedSync::new(pool.clone(), stages);
    sync.run_once().await.unwrap();

    let order: Vec<StageId> = log.lock().unwrap().iter().map(|(id, _)| *id).collect();
    assert_eq!(
        order,
        vec![
            StageId::L1Watch,
            StageId::L1InfoTree,
            StageId::Execution,
            StageId::Datastream,
            StageId::Finish,
        ]
    );

    let mut storage = pool.connection().await.unwrap();
    for id in order {
        assert_eq!(
            storage
                .sync_dal()
                .get_stage_progress(id.as_str())
                .await
                .unwrap(),
            Some(L2BlockNumber(7))
        );
    }
}

#[tokio::test]
async fn unwind_runs_in_reverse_order_and_clamps_progress() {
    let pool = ConnectionPool::new_in_memory();
    let (stages, log) = recording_stages(10);
    let mut sync = StagedSync::new(pool.clone(), stages);
    sync.run_once().await.unwrap();
    log.lock().unwrap().clear();

    sync.unwind_to(L2BlockNumber(4)).await.unwrap();

    let unwinds: Vec<StageId> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, op)| *op == "unwind")
        .map(|(id, _)| *id)
        .collect();
    // Reverse stage order: the datastream is cut before execution state.
    assert_eq!(
        unwinds,
        vec![
            StageId::Finish,
            StageId::Datastream,
            StageId::Execution,
            StageId::L1InfoTree,
            StageId::L1Watch,
        ]
    );

    let mut storage = pool.connection().await.unwrap();
    assert_eq!(
        storage
            .sync_dal()
            .get_stage_progress(StageId::Execution.as_str())
            .await
            .unwrap(),
        Some(L2BlockNumber(4))
    );
}

#[tokio::test]
async fn stages_already_below_the_target_are_untouched() {
    let pool = ConnectionPool::new_in_memory();
    let (stages, log) = recording_stages(3);
    let mut sync = StagedSync::new(pool.clone(), stages);
    sync.run_once().await.unwrap();
    log.lock().unwrap().clear();

    sync.unwind_to(L2BlockNumber(5)).await.unwrap();
    assert!(log
        .lock()
        .unwrap()
        .iter()
        .all(|(_, op)| *op != "unwind"));
}

#[tokio::test]
async fn execution_stage_unwind_sweeps_the_store() {
    let pool = ConnectionPool::new_in_memory();
    {
        let mut storage = pool.connection().await.unwrap();
        for block in 1u64..=6 {
            storage
                .blocks_dal()
                .write_block_batch(L2BlockNumber(block), BatchNumber(1))
                .await
                .unwrap();
        }
        storage
            .sync_dal()
            .set_stage_progress(StageId::Execution.as_str(), L2BlockNumber(6))
            .await
            .unwrap();
        storage.commit().await.unwrap();
    }

    let mut sync = StagedSync::new(pool.clone(), vec![Box::new(ExecutionStage)]);
    sync.unwind_to(L2BlockNumber(4)).await.unwrap();

    let mut storage = pool.connection().await.unwrap();
    assert_eq!(
        storage
            .blocks_dal()
            .batch_of_block(L2BlockNumber(5))
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        storage
            .blocks_dal()
            .highest_block_in_batch(BatchNumber(1))
            .await
            .unwrap(),
        Some(L2BlockNumber(4))
    );
}

fn block_entry(block: u64) -> Entry {
    Entry::L2BlockStart(L2BlockStart {
        batch_number: 1,
        block_number: block,
        timestamp: 1_700_000_000 + block,
        delta_timestamp: 1,
        l1_info_tree_index: 0,
        l1_block_hash: H256::zero(),
        ger: H256::zero(),
        coinbase: Address::repeat_byte(1),
        fork_id: 9,
        chain_id: 1001,
        block_info_root: H256::zero(),
    })
}

#[tokio::test]
async fn datastream_stage_tracks_and_cuts_the_stream() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    writer.start_atomic_op().unwrap();
    for block in 1u64..=3 {
        writer.add_bookmark(BookmarkKind::L2Block, block).unwrap();
        writer.add_entry(block_entry(block)).unwrap();
    }
    writer.commit().unwrap();

    let pool = ConnectionPool::new_in_memory();
    let mut sync = StagedSync::new(pool.clone(), vec![Box::new(DatastreamStage::new(writer))]);
    sync.run_once().await.unwrap();

    let mut storage = pool.connection().await.unwrap();
    assert_eq!(
        storage
            .sync_dal()
            .get_stage_progress(StageId::Datastream.as_str())
            .await
            .unwrap(),
        Some(L2BlockNumber(3))
    );
    drop(storage);

    sync.unwind_to(L2BlockNumber(1)).await.unwrap();

    let mut storage = pool.connection().await.unwrap();
    assert_eq!(
        storage
            .sync_dal()
            .get_stage_progress(StageId::Datastream.as_str())
            .await
            .unwrap(),
        Some(L2BlockNumber(1))
    );
}
