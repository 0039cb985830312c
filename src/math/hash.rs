//! Parameter fingerprinting: SHA-256 of the little-endian parameter words,
//! folded into four `u64` words.

use sha2::{Digest, Sha256};

pub const HASH_BLOCK_WORDS: usize = 4;

pub type HashBlock = [u64; HASH_BLOCK_WORDS];

pub const HASH_ZERO_BLOCK: HashBlock = [0; HASH_BLOCK_WORDS];

pub fn hash(input: &[u64], destination: &mut HashBlock) {
    let mut hasher = Sha256::new();
    for word in input {
        hasher.update(word.to_le_bytes());
    }
    let digest = hasher.finalize();
    for (word, bytes) in destination.iter_mut().zip(digest.chunks_exact(8)) {
        *word = u64::from_le_bytes(bytes.try_into().unwrap());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let data = [1u64, 2, 3, 4, 5, 6, 7, 8];
        let mut a = HASH_ZERO_BLOCK;
        let mut b = HASH_ZERO_BLOCK;
        hash(&data, &mut a);
        hash(&data, &mut b);
        assert_eq!(a, b);
        assert_ne!(a, HASH_ZERO_BLOCK);

        let mut c = HASH_ZERO_BLOCK;
        hash(&[1u64, 2, 3, 4, 5, 6, 7, 9], &mut c);
        assert_ne!(a, c);
    }
}
