//! Deterministic seed hierarchy.
//!
//! A master seed is expanded into sub-seeds per `(scope, index)` pair via
//! BLAKE3. Derivation is hash-based, not sequential, so a value depends only
//! on its own coordinates and never on the order in which values are drawn.
//! This keeps synthetic data identical however a range is split into fetches.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn sub_seed(&self, scope: &str, index: i64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(scope.as_bytes());
        hasher.update(&index.to_le_bytes());
        let hash = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(word)
    }

    pub fn rng_for(&self, scope: &str, index: i64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(scope, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn sub_seeds_are_deterministic() {
        let h = SeedHierarchy::new(42);
        assert_eq!(h.sub_seed("price", 7), h.sub_seed("price", 7));
    }

    #[test]
    fn scopes_and_indices_are_independent() {
        let h = SeedHierarchy::new(42);
        assert_ne!(h.sub_seed("price", 0), h.sub_seed("load", 0));
        assert_ne!(h.sub_seed("price", 0), h.sub_seed("price", 1));
    }

    #[test]
    fn rng_streams_reproduce() {
        let h = SeedHierarchy::new(7);
        let a: f64 = h.rng_for("wind", 3).gen();
        let b: f64 = h.rng_for("wind", 3).gen();
        assert_eq!(a, b);
    }
}
