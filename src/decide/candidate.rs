//! Ranked candidate moves assembled from engine output.

use std::collections::{BTreeMap, HashMap};

use crate::board::Move;
use crate::protocol::{InfoLine, Score};

/// One engine-proposed move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveCandidate {
    pub mv: Move,
    /// 1-based rank among the returned lines.
    pub rank: u32,
    /// Centipawn-equivalent score from the side to move's point of view.
    pub score: i32,
    pub policy: Option<f64>,
}

/// Collects `info` and policy lines for one search until its `bestmove`.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    by_rank: BTreeMap<u32, (Move, Score)>,
    policy: HashMap<Move, f64>,
    last_score: Option<Score>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an `info` line. Later lines for the same rank come from deeper
    /// iterations and replace earlier ones.
    pub fn record_info(&mut self, info: &InfoLine) {
        if let Some(score) = info.score {
            if info.multipv == 1 {
                self.last_score = Some(score);
            }
            if let Some(mv) = info.pv {
                self.by_rank.insert(info.multipv, (mv, score));
            }
        }
    }

    pub fn record_policy(&mut self, mv: Move, probability: f64) {
        self.policy.insert(mv, probability);
    }

    pub fn is_empty(&self) -> bool {
        self.by_rank.is_empty()
    }

    /// Score of the principal line, if any was reported.
    pub fn principal_score(&self) -> Option<Score> {
        self.last_score
    }

    /// Candidates in rank order. When the engine reported no scored lines
    /// but did name a best move, that move is returned alone with a score of 0.
    pub fn ranked(&self, best: Option<Move>) -> Vec<MoveCandidate> {
        let mut out: Vec<MoveCandidate> = self
            .by_rank
            .iter()
            .map(|(&rank, &(mv, score))| MoveCandidate {
                mv,
                rank,
                score: score.centipawns(),
                policy: self.policy.get(&mv).copied(),
            })
            .collect();
        if out.is_empty() {
            if let Some(mv) = best {
                out.push(MoveCandidate {
                    mv,
                    rank: 1,
                    score: self.last_score.map_or(0, Score::centipawns),
                    policy: self.policy.get(&mv).copied(),
                });
            }
        }
        out
    }
}

/// Highest score among `candidates`.
pub fn best_score(candidates: &[MoveCandidate]) -> Option<i32> {
    candidates.iter().map(|c| c.score).max()
}

/// Number of candidates within `margin` centipawns of the best.
pub fn close_alternatives(candidates: &[MoveCandidate], margin: i32) -> usize {
    match best_score(candidates) {
        Some(best) => candidates.iter().filter(|c| best - c.score <= margin).count(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(multipv: u32, cp: i32, pv: &str) -> InfoLine {
        InfoLine {
            depth: Some(10),
            multipv,
            score: Some(Score::Centipawns(cp)),
            pv: Move::parse_uci(pv),
        }
    }

    #[test]
    fn deeper_lines_replace_shallower_ones() {
        let mut set = CandidateSet::new();
        set.record_info(&info(1, 20, "e2e4"));
        set.record_info(&info(2, 10, "d2d4"));
        set.record_info(&info(1, 35, "g1f3"));
        set.record_policy("g1f3".parse().unwrap(), 0.6);

        let ranked = set.ranked(None);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].mv.to_string(), "g1f3");
        assert_eq!(ranked[0].score, 35);
        assert_eq!(ranked[0].policy, Some(0.6));
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[1].policy, None);
        assert_eq!(set.principal_score(), Some(Score::Centipawns(35)));
    }

    #[test]
    fn bare_bestmove_becomes_single_candidate() {
        let set = CandidateSet::new();
        let ranked = set.ranked(Move::parse_uci("e2e4"));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].score, 0);
        assert!(set.ranked(None).is_empty());
    }

    #[test]
    fn close_alternatives_counts_within_margin() {
        let mut set = CandidateSet::new();
        set.record_info(&info(1, 100, "e2e4"));
        set.record_info(&info(2, 60, "d2d4"));
        set.record_info(&info(3, 20, "c2c4"));
        let ranked = set.ranked(None);
        assert_eq!(best_score(&ranked), Some(100));
        assert_eq!(close_alternatives(&ranked, 50), 2);
        assert_eq!(close_alternatives(&[], 50), 0);
    }
}
