//! Gas schedule. Constant costs per opcode group plus the dynamic parts
//! (memory expansion, word-sized copies, storage writes).

pub const G_ZERO: u64 = 0;
pub const G_BASE: u64 = 2;
pub const G_VERY_LOW: u64 = 3;
pub const G_LOW: u64 = 5;
pub const G_MID: u64 = 8;
pub const G_HIGH: u64 = 10;
pub const G_JUMPDEST: u64 = 1;
pub const G_EXP: u64 = 10;
pub const G_EXP_BYTE: u64 = 50;
pub const G_KECCAK: u64 = 30;
pub const G_KECCAK_WORD: u64 = 6;
pub const G_COPY_WORD: u64 = 3;
pub const G_BALANCE: u64 = 700;
pub const G_EXTCODE: u64 = 700;
pub const G_EXTCODEHASH: u64 = 700;
pub const G_BLOCKHASH: u64 = 20;
pub const G_SLOAD: u64 = 800;
pub const G_SSTORE_SET: u64 = 20_000;
pub const G_SSTORE_RESET: u64 = 5_000;
pub const G_LOG: u64 = 375;
pub const G_LOG_TOPIC: u64 = 375;
pub const G_LOG_DATA_BYTE: u64 = 8;
pub const G_CALL: u64 = 700;
pub const G_CALL_VALUE: u64 = 9_000;
pub const G_CALL_STIPEND: u64 = 2_300;
pub const G_NEW_ACCOUNT: u64 = 25_000;
pub const G_CREATE: u64 = 32_000;
pub const G_CODE_DEPOSIT_BYTE: u64 = 200;
pub const G_SELFDESTRUCT: u64 = 5_000;

pub const G_TX: u64 = 21_000;
pub const G_TX_CREATE: u64 = 32_000;
pub const G_TX_DATA_ZERO: u64 = 4;
pub const G_TX_DATA_NONZERO: u64 = 16;

pub const MAX_CODE_SIZE: usize = 24_576;

/// Cost of having `words * 32` bytes of memory.
pub fn memory_cost(words: u64) -> u64 {
    3 * words + words * words / 512
}

/// Additional gas for growing memory to cover `offset + len`.
pub fn memory_expansion_cost(current_words: u64, offset: u64, len: u64) -> (u64, u64) {
    if len == 0 {
        return (current_words, 0);
    }
    let needed_words = (offset.saturating_add(len)).div_ceil(32);
    if needed_words <= current_words {
        (current_words, 0)
    } else {
        let cost = memory_cost(needed_words) - memory_cost(current_words);
        (needed_words, cost)
    }
}

pub fn copy_cost(len: u64) -> u64 {
    len.div_ceil(32) * G_COPY_WORD
}

/// Intrinsic gas of a transaction.
pub fn intrinsic_gas(data: &[u8], is_create: bool) -> u64 {
    let mut gas = G_TX;
    if is_create {
        gas += G_TX_CREATE;
    }
    for byte in data {
        gas += if *byte == 0 { G_TX_DATA_ZERO } else { G_TX_DATA_NONZERO };
    }
    gas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_gas_counts_data() {
        assert_eq!(intrinsic_gas(&[], false), 21_000);
        assert_eq!(intrinsic_gas(&[], true), 53_000);
        assert_eq!(intrinsic_gas(&[0, 1, 0], false), 21_000 + 4 + 16 + 4);
    }

    #[test]
    fn memory_expansion_is_quadratic_and_monotone() {
        let (words, first) = memory_expansion_cost(0, 0, 32);
        assert_eq!(words, 1);
        assert_eq!(first, 3);
        let (_, zero) = memory_expansion_cost(words, 0, 32);
        assert_eq!(zero, 0);
        let (_, big) = memory_expansion_cost(0, 0, 100_000);
        assert!(big > memory_cost(100));
    }
}
