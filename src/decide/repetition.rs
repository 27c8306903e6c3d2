//! Position occurrence counting.

use std::collections::HashMap;

use crate::board::{Move, PositionKey};

/// Occurrences at which reversing the last own move is avoided.
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Counts how often each position has been observed during one game.
#[derive(Debug, Clone)]
pub struct RepetitionTracker {
    counts: HashMap<PositionKey, u32>,
    threshold: u32,
}

impl Default for RepetitionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl RepetitionTracker {
    pub fn new(threshold: u32) -> Self {
        RepetitionTracker {
            counts: HashMap::new(),
            threshold,
        }
    }

    /// Increments the count of `key`, returning the new count.
    pub fn record_observed(&mut self, key: PositionKey) -> u32 {
        let n = self.counts.entry(key).or_insert(0);
        *n += 1;
        *n
    }

    pub fn count(&self, key: &PositionKey) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Applies `delta` to the count of `key`, saturating at zero.
    pub fn adjust(&mut self, key: PositionKey, delta: i32) {
        let next = (self.count(&key) as i64 + delta as i64).max(0) as u32;
        if next == 0 {
            self.counts.remove(&key);
        } else {
            self.counts.insert(key, next);
        }
    }

    /// True when `candidate` undoes `last_own` and `key` has already been seen
    /// at least `threshold` times.
    pub fn would_reverse_under_repetition(
        &self,
        candidate: Move,
        last_own: Option<Move>,
        key: &PositionKey,
    ) -> bool {
        last_own.is_some_and(|last| candidate.reverses(last)) && self.count(key) >= self.threshold
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Position, START_LAYOUT};

    fn key() -> PositionKey {
        Position::parse(&format!("{} w", START_LAYOUT)).unwrap().key()
    }

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    #[test]
    fn third_occurrence_flags_the_reversal_only() {
        let mut t = RepetitionTracker::default();
        let k = key();
        let last = Some(mv("g1f3"));
        t.record_observed(k);
        t.record_observed(k);
        assert!(!t.would_reverse_under_repetition(mv("f3g1"), last, &k));
        assert_eq!(t.record_observed(k), 3);

        assert!(t.would_reverse_under_repetition(mv("f3g1"), last, &k));
        assert!(!t.would_reverse_under_repetition(mv("f3e5"), last, &k));
        assert!(!t.would_reverse_under_repetition(mv("g1f3"), last, &k));
        assert!(!t.would_reverse_under_repetition(mv("f3g1"), None, &k));
    }

    #[test]
    fn adjust_rolls_back_and_saturates() {
        let mut t = RepetitionTracker::default();
        let k = key();
        t.record_observed(k);
        t.record_observed(k);
        t.adjust(k, -1);
        assert_eq!(t.count(&k), 1);
        t.adjust(k, -5);
        assert_eq!(t.count(&k), 0);
        t.adjust(k, 2);
        assert_eq!(t.count(&k), 2);
        t.clear();
        assert_eq!(t.count(&k), 0);
    }
}
