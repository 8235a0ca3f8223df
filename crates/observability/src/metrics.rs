//! Advisory counters.
//!
//! These never affect correctness; they exist so the status endpoint can report
//! hit ratios and volumes without taking any lock on the hot path.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Hit/miss pair for a lookup structure.
#[derive(Debug, Default)]
pub struct HitMissCounter {
    hits: Counter,
    misses: Counter,
}

/// Point-in-time view of a [`HitMissCounter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HitMissSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub hit_ratio: f64,
}

impl HitMissCounter {
    pub const fn new() -> Self {
        Self {
            hits: Counter::new(),
            misses: Counter::new(),
        }
    }

    pub fn hit(&self) {
        self.hits.incr();
    }

    pub fn miss(&self) {
        self.misses.incr();
    }

    pub fn snapshot(&self) -> HitMissSnapshot {
        let hits = self.hits.get();
        let misses = self.misses.get();
        let total = hits + misses;
        let hit_ratio = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        HitMissSnapshot {
            hits,
            misses,
            hit_ratio,
        }
    }

    pub fn reset(&self) {
        self.hits.reset();
        self.misses.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_zero_before_any_lookup() {
        let c = HitMissCounter::new();
        assert_eq!(c.snapshot().hit_ratio, 0.0);
    }

    #[test]
    fn ratio_tracks_hits_and_misses() {
        let c = HitMissCounter::new();
        c.hit();
        c.hit();
        c.hit();
        c.miss();

        let s = c.snapshot();
        assert_eq!(s.hits, 3);
        assert_eq!(s.misses, 1);
        assert!((s.hit_ratio - 0.75).abs() < f64::EPSILON);

        c.reset();
        assert_eq!(c.snapshot(), HitMissSnapshot::default());
    }
}
