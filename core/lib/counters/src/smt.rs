//! Poseidon-cost precomputation over a batch's state-tree node values.
//!
//! Hashing cost is a pure function of each value's length, so the work
//! partitions cleanly: `min(cpus, size / 4)` workers, joined before the
//! caller proceeds.

use rayon::prelude::*;

const HASH_CHUNK_BYTES: usize = 56;
const MIN_VALUES_PER_WORKER: usize = 4;

/// Total poseidon units needed to hash `values` into the state tree.
pub fn precompute_hash_costs(values: &[Vec<u8>]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let workers = num_cpus::get()
        .min(values.len() / MIN_VALUES_PER_WORKER)
        .max(1);
    if workers == 1 {
        return values.iter().map(|value| node_cost(value)).sum();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .expect("failed to build the SMT precompute pool");
    pool.install(|| values.par_iter().map(|value| node_cost(value)).sum())
}

fn node_cost(value: &[u8]) -> u64 {
    (value.len().max(1) as u64).div_ceil(HASH_CHUNK_BYTES as u64) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_costs_nothing() {
        assert_eq!(precompute_hash_costs(&[]), 0);
    }

    #[test]
    fn cost_matches_sequential_sum() {
        let values: Vec<Vec<u8>> = (0..1_000).map(|i| vec![0u8; i % 300]).collect();
        let expected: u64 = values.iter().map(|value| node_cost(value)).sum();
        assert_eq!(precompute_hash_costs(&values), expected);
    }

    #[test]
    fn longer_values_cost_more() {
        assert!(node_cost(&[0u8; 300]) > node_cost(&[0u8; 10]));
    }
}
