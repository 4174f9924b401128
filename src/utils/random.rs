//! Seeded random
//!
//! Deterministic pseudo-random source for reproducible execution order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hash of a seed string
fn hash_seed(seed: &str) -> u64 {
    seed.bytes()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Pseudo-random generator keyed by a printable seed.
///
/// The same seed always yields the same sequence, so a shuffled run can be
/// reproduced by reusing the seed it reported.
#[derive(Clone, Debug)]
pub struct SeededRandom {
    seed: String,
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: impl Into<String>) -> Self {
        let seed = seed.into();
        let rng = StdRng::seed_from_u64(hash_seed(&seed));
        Self { seed, rng }
    }

    /// Generator with a fresh random seed
    pub fn from_entropy() -> Self {
        Self::new(format!("{:016x}", rand::random::<u64>()))
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Restart the sequence from the beginning
    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(hash_seed(&self.seed));
    }

    pub fn next_u32(&mut self) -> u32 {
        self.rng.random()
    }

    /// Uniform float in `[0, 1)`
    pub fn next_f64(&mut self) -> f64 {
        self.rng.random()
    }

    /// Uniform integer in `[0, bound)`; zero for an empty range
    pub fn next_int(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        self.rng.random_range(0..bound)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Independent generator derived from this seed and a salt
    pub fn fork(&self, salt: &str) -> Self {
        Self::new(format!("{}/{}", self.seed, salt))
    }
}
