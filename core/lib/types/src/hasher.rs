//! Keccak-256 helpers shared across the node.

use cdk_basic_types::H256;
use sha3::{Digest, Keccak256};

pub fn keccak256(data: &[u8]) -> H256 {
    H256::from_slice(Keccak256::digest(data).as_slice())
}

/// Keccak over the concatenation of several byte slices, avoiding an
/// intermediate buffer.
pub fn keccak256_concat<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> H256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    H256::from_slice(hasher.finalize().as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_digest() {
        let expected: H256 =
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
                .parse()
                .unwrap();
        assert_eq!(keccak256(&[]), expected);
    }

    #[test]
    fn concat_equals_single_buffer() {
        let whole = keccak256(b"hello world");
        let parts = keccak256_concat([b"hello ".as_slice(), b"world".as_slice()]);
        assert_eq!(whole, parts);
    }
}
