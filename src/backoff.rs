use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Retry count past which the contention window stops doubling.
pub const BACKOFF_EXPONENT_CAP: u32 = 10;
pub const DEFAULT_SEED: u64 = 0x5EED_CD_B05;

const_assert!(BACKOFF_EXPONENT_CAP < u64::BITS);

/// Truncated binary exponential backoff, measured in slot times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub exponent_cap: u32,
    /// One slot is the round-trip bound of the bus.
    pub slot_ticks: u64,
}

impl BackoffPolicy {
    pub fn for_bus(bus_length: usize) -> Self {
        Self {
            exponent_cap: BACKOFF_EXPONENT_CAP,
            slot_ticks: 2 * bus_length as u64,
        }
    }

    /// Inclusive upper bound of the multiplier after `tries` collisions.
    pub fn max_multiplier(&self, tries: u32) -> u64 {
        (1u64 << tries.min(self.exponent_cap)) - 1
    }

    pub fn ticks_for(&self, multiplier: u64) -> u64 {
        multiplier * self.slot_ticks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffDraw {
    pub multiplier: u64,
    pub ticks: u64,
}

/// The simulation's single pseudo-random source.
#[derive(Debug, Clone)]
pub struct BackoffRng {
    policy: BackoffPolicy,
    rng: ChaCha8Rng,
    draws: u64,
}

impl BackoffRng {
    pub fn new(policy: BackoffPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: ChaCha8Rng::seed_from_u64(seed),
            draws: 0,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Pick a waiting period after the station's `tries`-th collision.
    pub fn draw(&mut self, tries: u32) -> BackoffDraw {
        let multiplier = self.rng.gen_range(0..=self.policy.max_multiplier(tries));
        self.draws += 1;
        BackoffDraw {
            multiplier,
            ticks: self.policy.ticks_for(multiplier),
        }
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}
