//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Seedable randomness for jitter, anomalies, and session identities."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Randomness consumed by the synthesizer and the connection manager.
pub trait RandomSource: Send {
    /// Uniform integer in `[low, high)`. Returns `low` when the range is empty.
    fn int_in(&mut self, low: i64, high: i64) -> i64;

    /// Bernoulli trial succeeding with `percent`/100 probability.
    fn chance_percent(&mut self, percent: u32) -> bool {
        self.int_in(0, 100) < i64::from(percent)
    }

    /// `int_in(low, high) / scale`, the bounded jitter used throughout synthesis.
    fn scaled(&mut self, low: i64, high: i64, scale: f64) -> f64 {
        self.int_in(low, high) as f64 / scale
    }

    /// Suffix for a fresh session identity.
    fn session_suffix(&mut self) -> u16 {
        self.int_in(0, 0xffff) as u16
    }
}

/// [`StdRng`]-backed source; the seed is kept so runs can be replayed.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
    seed: u64,
}

impl SeededRandom {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Draw a seed from OS entropy.
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random())
    }

    /// Seed for an independent stream derived from this one.
    pub fn fork(&mut self) -> Self {
        Self::from_seed(self.rng.gen())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for SeededRandom {
    fn int_in(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..high)
    }
}
