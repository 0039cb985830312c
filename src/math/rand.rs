//! Deterministic PRNG over the BLAKE3 extendable-output function.
//!
//! A counter-mode XOF keeps refills independent, so a seed fully determines
//! the stream no matter how the consumer slices its reads.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::PRNG_SEED_BYTES;

#[derive(Copy, Clone)]
pub struct PrngSeed(pub [u8; PRNG_SEED_BYTES]);

impl Default for PrngSeed {
    fn default() -> Self {
        PrngSeed([0; PRNG_SEED_BYTES])
    }
}

impl AsMut<[u8]> for PrngSeed {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl AsRef<[u8]> for PrngSeed {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hands out [`Blake3Prng`] instances; either fresh ones from OS entropy, or
/// clones of a fixed seed for reproducible runs.
pub struct PrngFactory {
    use_random_seed: bool,
    seed: PrngSeed,
}

impl Default for PrngFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PrngFactory {
    pub fn new() -> Self {
        Self {
            use_random_seed: true,
            seed: PrngSeed::default(),
        }
    }

    pub fn from_seed(seed: PrngSeed) -> Self {
        Self {
            use_random_seed: false,
            seed,
        }
    }

    pub fn get_prng(&self) -> Blake3Prng {
        if self.use_random_seed {
            let mut seed = [0; PRNG_SEED_BYTES];
            ChaCha20Rng::from_entropy().fill_bytes(&mut seed);
            Blake3Prng::from_seed(PrngSeed(seed))
        } else {
            Blake3Prng::from_seed(self.seed)
        }
    }
}

const BUFFER_SIZE: usize = 4096;

pub struct Blake3Prng {
    buffer: Box<[u8; BUFFER_SIZE]>,
    seed: PrngSeed,
    counter: u64,
    cursor: usize,
}

impl SeedableRng for Blake3Prng {
    type Seed = PrngSeed;

    fn from_seed(seed: Self::Seed) -> Self {
        Self {
            seed,
            counter: 0,
            buffer: Box::new([0; BUFFER_SIZE]),
            cursor: BUFFER_SIZE,
        }
    }
}

impl Blake3Prng {
    fn refill(&mut self) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.seed.as_ref());
        hasher.update(&self.counter.to_le_bytes());
        hasher.finalize_xof().fill(&mut self.buffer[..]);
        self.cursor = 0;
        self.counter = self.counter.wrapping_add(1);
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        if self.cursor + N > BUFFER_SIZE {
            self.refill();
        }
        let mut out = [0; N];
        out.copy_from_slice(&self.buffer[self.cursor..self.cursor + N]);
        self.cursor += N;
        out
    }
}

impl RngCore for Blake3Prng {
    fn next_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take::<4>())
    }

    fn next_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take::<8>())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut filled = 0;
        while filled < dest.len() {
            if self.cursor >= BUFFER_SIZE {
                self.refill();
            }
            let len = (dest.len() - filled).min(BUFFER_SIZE - self.cursor);
            dest[filled..filled + len]
                .copy_from_slice(&self.buffer[self.cursor..self.cursor + len]);
            filled += len;
            self.cursor += len;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let mut a = Blake3Prng::from_seed(PrngSeed([7; PRNG_SEED_BYTES]));
        let mut b = Blake3Prng::from_seed(PrngSeed([7; PRNG_SEED_BYTES]));
        for _ in 0..1000 {
            assert_eq!(a.next_u32(), b.next_u32());
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let mut buf_a = [0u8; 777];
        let mut buf_b = [0u8; 777];
        a.fill_bytes(&mut buf_a);
        b.fill_bytes(&mut buf_b);
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_factory() {
        let factory = PrngFactory::from_seed(PrngSeed([1; PRNG_SEED_BYTES]));
        let mut a = factory.get_prng();
        let mut b = factory.get_prng();
        assert_eq!(a.next_u64(), b.next_u64());

        let factory = PrngFactory::new();
        let mut a = factory.get_prng();
        let mut b = factory.get_prng();
        assert_ne!(a.next_u64(), b.next_u64());
    }
}
