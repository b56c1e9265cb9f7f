//! Bounded integer noise
//!
//! The generator is not privacy-preserving in any formal sense; it only
//! obscures exact values.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Largest absolute offset added to a value
pub const NOISE_BOUND: i32 = 5;

/// Seed source for a run's generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseSeed {
    /// Current wall-clock second, taken at run start
    #[default]
    WallClock,
    /// Fixed seed for reproducible runs
    Fixed(u64),
}

impl NoiseSeed {
    pub fn from_setting(seed: Option<u64>) -> Self {
        seed.map_or(NoiseSeed::WallClock, NoiseSeed::Fixed)
    }

    fn resolve(self) -> u64 {
        match self {
            // Second granularity: runs started within the same second share a seed
            NoiseSeed::WallClock => chrono::Utc::now().timestamp().unsigned_abs(),
            NoiseSeed::Fixed(seed) => seed,
        }
    }
}

/// Per-run pseudo-random source of perturbations
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    rng: StdRng,
    seed: u64,
}

impl NoiseGenerator {
    /// Seed a new generator
    pub fn new(seed: NoiseSeed) -> Self {
        let seed = seed.resolve();
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Seed the generator was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Offset drawn uniformly from `[-NOISE_BOUND, NOISE_BOUND]`
    pub fn offset(&mut self) -> i32 {
        self.rng.gen_range(-NOISE_BOUND..=NOISE_BOUND)
    }

    /// `value + offset`, saturating at the i32 bounds
    pub fn perturb(&mut self, value: i32) -> i32 {
        value.saturating_add(self.offset())
    }

    /// `value + offset` for 64-bit targets, saturating at the i64 bounds
    pub fn perturb_wide(&mut self, value: i64) -> i64 {
        value.saturating_add(i64::from(self.offset()))
    }
}
