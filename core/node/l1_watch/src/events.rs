//! Topic constants and decoders for the rollup-manager events of interest.

use cdk_basic_types::{BatchNumber, ForkId, H256};
use cdk_types::{
    hasher::keccak256,
    l1_events::{BatchVerification, RollupAdminEvent, SequencedBatch},
};
use ethabi::ParamType;
use once_cell::sync::Lazy;

use crate::client::L1Log;

macro_rules! topic {
    ($name:ident, $signature:expr) => {
        pub static $name: Lazy<H256> = Lazy::new(|| keccak256($signature.as_bytes()));
    };
}

topic!(SEQUENCE_BATCHES_PRE_ETROG, "SequenceBatches(uint64)");
topic!(SEQUENCE_BATCHES_ETROG, "SequenceBatches(uint64,bytes32)");
topic!(VERIFY_BATCHES_PRE_ETROG, "VerifyBatches(uint64,bytes32,address)");
topic!(
    VERIFY_BATCHES_ETROG,
    "VerifyBatchesTrustedAggregator(uint32,uint64,bytes32,bytes32,address)"
);
topic!(
    VERIFY_BATCHES_VALIDIUM_ETROG,
    "VerifyBatchesTrustedAggregatorValidium(uint32,uint64,bytes32,bytes32,address)"
);
topic!(UPDATE_L1_INFO_TREE, "UpdateL1InfoTree(bytes32,bytes32)");
topic!(
    INITIAL_SEQUENCE_BATCHES,
    "InitialSequenceBatches(bytes,address)"
);
topic!(
    ADD_NEW_ROLLUP_TYPE,
    "AddNewRollupType(uint32,uint64,bytes32)"
);
topic!(
    CREATE_NEW_ROLLUP,
    "CreateNewRollup(uint32,uint32,uint64,uint64)"
);
topic!(UPDATE_ROLLUP, "UpdateRollup(uint32,uint32,uint64,uint64)");

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("missing topic {0}")]
    MissingTopic(usize),
    #[error("bad ABI payload: {0}")]
    Abi(#[from] ethabi::Error),
    #[error("field {0} has an unexpected shape")]
    Shape(&'static str),
}

fn indexed_u64(log: &L1Log, index: usize) -> Result<u64, EventDecodeError> {
    let topic = log
        .topics
        .get(index)
        .ok_or(EventDecodeError::MissingTopic(index))?;
    Ok(cdk_basic_types::U256::from_big_endian(topic.as_bytes()).low_u64())
}

pub fn decode_sequence_batches_pre_etrog(log: &L1Log) -> Result<SequencedBatch, EventDecodeError> {
    Ok(SequencedBatch {
        batch_number: BatchNumber(indexed_u64(log, 1)?),
        l1_block_number: log.block_number,
        l1_tx_hash: log.tx_hash,
        state_root: None,
        l1_info_root: None,
        timestamp_limit: None,
    })
}

pub fn decode_sequence_batches_etrog(log: &L1Log) -> Result<SequencedBatch, EventDecodeError> {
    let tokens = ethabi::decode(&[ParamType::FixedBytes(32)], &log.data)?;
    let l1_info_root = tokens[0]
        .clone()
        .into_fixed_bytes()
        .ok_or(EventDecodeError::Shape("l1InfoRoot"))?;
    Ok(SequencedBatch {
        batch_number: BatchNumber(indexed_u64(log, 1)?),
        l1_block_number: log.block_number,
        l1_tx_hash: log.tx_hash,
        state_root: None,
        l1_info_root: Some(H256::from_slice(&l1_info_root)),
        timestamp_limit: None,
    })
}

pub fn decode_verify_batches_pre_etrog(
    log: &L1Log,
) -> Result<BatchVerification, EventDecodeError> {
    let tokens = ethabi::decode(&[ParamType::FixedBytes(32), ParamType::Address], &log.data)?;
    let state_root = tokens[0]
        .clone()
        .into_fixed_bytes()
        .ok_or(EventDecodeError::Shape("stateRoot"))?;
    Ok(BatchVerification {
        batch_number: BatchNumber(indexed_u64(log, 1)?),
        state_root: H256::from_slice(&state_root),
    })
}

/// Etrog and Validium-Etrog verifications; topic 1 carries the rollup id.
pub fn decode_verify_batches_etrog(
    log: &L1Log,
) -> Result<(u64, BatchVerification), EventDecodeError> {
    let rollup_id = indexed_u64(log, 1)?;
    let tokens = ethabi::decode(
        &[
            ParamType::Uint(64),
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
            ParamType::Address,
        ],
        &log.data,
    )?;
    let batch_number = tokens[0]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("numBatch"))?
        .low_u64();
    let state_root = tokens[1]
        .clone()
        .into_fixed_bytes()
        .ok_or(EventDecodeError::Shape("stateRoot"))?;
    Ok((
        rollup_id,
        BatchVerification {
            batch_number: BatchNumber(batch_number),
            state_root: H256::from_slice(&state_root),
        },
    ))
}

/// `UpdateL1InfoTree` carries both exit roots as indexed topics.
pub fn decode_update_l1_info_tree(log: &L1Log) -> Result<(H256, H256), EventDecodeError> {
    let mainnet = *log.topics.get(1).ok_or(EventDecodeError::MissingTopic(1))?;
    let rollup = *log.topics.get(2).ok_or(EventDecodeError::MissingTopic(2))?;
    Ok((mainnet, rollup))
}

/// `InitialSequenceBatches`: the seed transaction bytes and the trusted
/// sequencer address.
pub fn decode_initial_sequence_batches(
    log: &L1Log,
) -> Result<(Vec<u8>, cdk_basic_types::Address), EventDecodeError> {
    let tokens = ethabi::decode(&[ParamType::Bytes, ParamType::Address], &log.data)?;
    let transactions = tokens[0]
        .clone()
        .into_bytes()
        .ok_or(EventDecodeError::Shape("transactions"))?;
    let sequencer = tokens[1]
        .clone()
        .into_address()
        .ok_or(EventDecodeError::Shape("sequencer"))?;
    Ok((transactions, cdk_basic_types::Address::from(sequencer.0)))
}

pub fn decode_add_new_rollup_type(log: &L1Log) -> Result<RollupAdminEvent, EventDecodeError> {
    let tokens = ethabi::decode(&[ParamType::Uint(64), ParamType::FixedBytes(32)], &log.data)?;
    let fork_id = tokens[0]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("forkID"))?
        .low_u64();
    let genesis = tokens[1]
        .clone()
        .into_fixed_bytes()
        .ok_or(EventDecodeError::Shape("genesis"))?;
    Ok(RollupAdminEvent::AddNewRollupType {
        rollup_type_id: indexed_u64(log, 1)?,
        fork_id: ForkId(fork_id as u16),
        genesis_root: H256::from_slice(&genesis),
    })
}

pub fn decode_create_new_rollup(log: &L1Log) -> Result<RollupAdminEvent, EventDecodeError> {
    let tokens = ethabi::decode(
        &[ParamType::Uint(32), ParamType::Uint(64), ParamType::Uint(64)],
        &log.data,
    )?;
    let rollup_type_id = tokens[0]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("rollupTypeID"))?
        .low_u64();
    let fork_id = tokens[1]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("forkID"))?
        .low_u64();
    let chain_id = tokens[2]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("chainID"))?
        .low_u64();
    Ok(RollupAdminEvent::CreateNewRollup {
        rollup_id: indexed_u64(log, 1)?,
        rollup_type_id,
        fork_id: ForkId(fork_id as u16),
        chain_id,
    })
}

pub fn decode_update_rollup(log: &L1Log) -> Result<RollupAdminEvent, EventDecodeError> {
    let tokens = ethabi::decode(
        &[ParamType::Uint(32), ParamType::Uint(64), ParamType::Uint(64)],
        &log.data,
    )?;
    let new_rollup_type_id = tokens[0]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("newRollupTypeID"))?
        .low_u64();
    let new_fork_id = tokens[1]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("newForkID"))?
        .low_u64();
    let from_batch = tokens[2]
        .clone()
        .into_uint()
        .ok_or(EventDecodeError::Shape("fromBatch"))?
        .low_u64();
    Ok(RollupAdminEvent::UpdateRollup {
        rollup_id: indexed_u64(log, 1)?,
        new_rollup_type_id,
        new_fork_id: ForkId(new_fork_id as u16),
        from_batch: BatchNumber(from_batch),
    })
}

/// Helpers to fabricate logs in tests.
pub mod testonly {
    use cdk_basic_types::{Address, L1BlockNumber, U256};
    use ethabi::Token;

    use super::*;

    pub fn log_with(topics: Vec<H256>, data: Vec<u8>, block: u64) -> L1Log {
        L1Log {
            address: Address::repeat_byte(0x77),
            topics,
            data,
            block_number: L1BlockNumber(block),
            tx_hash: keccak256(&block.to_be_bytes()),
        }
    }

    pub fn u64_topic(value: u64) -> H256 {
        let mut bytes = [0u8; 32];
        U256::from(value).to_big_endian(&mut bytes);
        H256(bytes)
    }

    pub fn sequence_batches_etrog(batch: u64, l1_info_root: H256, block: u64) -> L1Log {
        log_with(
            vec![*SEQUENCE_BATCHES_ETROG, u64_topic(batch)],
            ethabi::encode(&[Token::FixedBytes(l1_info_root.as_bytes().to_vec())]),
            block,
        )
    }

    pub fn verify_batches_etrog(
        rollup_id: u64,
        batch: u64,
        state_root: H256,
        block: u64,
    ) -> L1Log {
        log_with(
            vec![*VERIFY_BATCHES_ETROG, u64_topic(rollup_id)],
            ethabi::encode(&[
                Token::Uint(batch.into()),
                Token::FixedBytes(state_root.as_bytes().to_vec()),
                Token::FixedBytes(vec![0u8; 32]),
                Token::Address(ethabi::Address::zero()),
            ]),
            block,
        )
    }

    pub fn update_l1_info_tree(mainnet: H256, rollup: H256, block: u64) -> L1Log {
        log_with(vec![*UPDATE_L1_INFO_TREE, mainnet, rollup], Vec::new(), block)
    }

    pub fn initial_sequence_batches(transaction: Vec<u8>, sequencer: Address, block: u64) -> L1Log {
        log_with(
            vec![*INITIAL_SEQUENCE_BATCHES],
            ethabi::encode(&[
                Token::Bytes(transaction),
                Token::Address(ethabi::Address::from(sequencer.0)),
            ]),
            block,
        )
    }

    pub fn update_rollup(rollup_id: u64, new_fork_id: u16, from_batch: u64, block: u64) -> L1Log {
        log_with(
            vec![*UPDATE_ROLLUP, u64_topic(rollup_id)],
            ethabi::encode(&[
                Token::Uint(1u64.into()),
                Token::Uint((new_fork_id as u64).into()),
                Token::Uint(from_batch.into()),
            ]),
            block,
        )
    }
}

#[cfg(test)]
mod tests {
    use cdk_basic_types::Address;

    use super::{testonly::*, *};

    #[test]
    fn etrog_verification_round_trips() {
        let log = verify_batches_etrog(3, 42, H256::repeat_byte(9), 100);
        let (rollup_id, verification) = decode_verify_batches_etrog(&log).unwrap();
        assert_eq!(rollup_id, 3);
        assert_eq!(verification.batch_number, BatchNumber(42));
        assert_eq!(verification.state_root, H256::repeat_byte(9));
    }

    #[test]
    fn injected_batch_round_trips() {
        let sequencer = Address::repeat_byte(0x12);
        let log = initial_sequence_batches(vec![1, 2, 3], sequencer, 5);
        let (transaction, decoded) = decode_initial_sequence_batches(&log).unwrap();
        assert_eq!(transaction, vec![1, 2, 3]);
        assert_eq!(decoded, sequencer);
    }

    #[test]
    fn topics_are_distinct() {
        let topics = [
            *SEQUENCE_BATCHES_PRE_ETROG,
            *SEQUENCE_BATCHES_ETROG,
            *VERIFY_BATCHES_PRE_ETROG,
            *VERIFY_BATCHES_ETROG,
            *UPDATE_L1_INFO_TREE,
            *INITIAL_SEQUENCE_BATCHES,
        ];
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
