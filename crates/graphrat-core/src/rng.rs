//! Reproducible 32-bit random number generation.
//!
//! Every worker runs the same multiplicative congruential generator so a
//! rat's draw sequence is identical no matter which zone owns it. A
//! migrating rat carries its current seed across the wire and the
//! receiver resumes the stream exactly where the sender left off.

use serde::{Deserialize, Serialize};

/// Modulus of the generator; seeds and draws stay in `[0, GROUP_SIZE)`.
pub const GROUP_SIZE: u64 = 2_147_483_647;

const SEED_MULTIPLIER: u64 = 48_271;
const STEP_MULTIPLIER: u64 = 16_807;
const INIT_SEED: u32 = 418;

/// Seed used when no `-s` option is given.
pub const DEFAULT_GLOBAL_SEED: u32 = 618;

/// Per-rat random number generator state.
///
/// The seed fits in 32 bits; stepping uses 64-bit intermediates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatRng(u32);

impl RatRng {
    /// Rebuild a generator from a seed shipped with a migrating rat.
    #[must_use]
    pub const fn from_raw(seed: u32) -> Self {
        Self(seed)
    }

    /// Current seed, as shipped with a migrating rat.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Advance the generator, mixing in `x`, and return the new value.
    pub fn next(&mut self, x: u32) -> u32 {
        let val =
            ((u64::from(x) + 1) * STEP_MULTIPLIER + u64::from(self.0) * SEED_MULTIPLIER)
                % GROUP_SIZE;
        self.0 = val as u32;
        val as u32
    }

    /// Reinitialize from a list of seed components, mixed in order.
    pub fn reseed(&mut self, parts: &[u32]) {
        self.0 = INIT_SEED;
        for &part in parts {
            self.next(part);
        }
    }

    /// Generator for rat `rat` under `global_seed`. Run identically on
    /// every zone after rat distribution; never re-derived afterwards
    /// (the shipped seed is authoritative once a rat has migrated).
    #[must_use]
    pub fn for_rat(global_seed: u32, rat: u32) -> Self {
        let mut rng = Self::default();
        rng.reseed(&[global_seed, rat]);
        rng
    }

    /// Draw a float in `[0, upper)`.
    pub fn next_float(&mut self, upper: f64) -> f64 {
        let val = self.next(0);
        f64::from(val) / GROUP_SIZE as f64 * upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_produces_known_sequence() {
        let mut rng = RatRng::from_raw(0);
        assert_eq!(rng.next(0), 16_807);
        assert_eq!(rng.next(0), 811_307_504);
    }

    #[test]
    fn reseed_is_independent_of_previous_state() {
        let mut a = RatRng::from_raw(0);
        let mut b = RatRng::from_raw(987_654_321);
        a.reseed(&[418, 0]);
        b.reseed(&[418, 0]);
        assert_eq!(a, b);
        assert_eq!(a.raw(), 1_795_696_871);
        // Same draw pattern afterwards regardless of history.
        assert_eq!(a.next(5), b.next(5));
        assert_eq!(a.next_float(2.0), b.next_float(2.0));
    }

    #[test]
    fn per_rat_seeds_differ_by_rat_id() {
        let r0 = RatRng::for_rat(42, 0);
        let r1 = RatRng::for_rat(42, 1);
        assert_ne!(r0, r1);
        assert_eq!(r0.raw(), 1_693_072_673);
        assert_eq!(r1.raw(), 1_693_089_480);
    }

    #[test]
    fn next_float_stays_in_range() {
        let mut rng = RatRng::for_rat(7, 3);
        for _ in 0..1_000 {
            let v = rng.next_float(3.5);
            assert!((0.0..3.5).contains(&v));
        }
    }

    #[test]
    fn values_stay_in_group() {
        let mut rng = RatRng::from_raw(u32::MAX % GROUP_SIZE as u32);
        for x in 0..1_000 {
            let v = rng.next(x);
            assert!(u64::from(v) < GROUP_SIZE);
        }
    }
}
