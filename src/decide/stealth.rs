//! Stealth move selection.
//!
//! Picks among the engine's candidates with a softmax over the score gap to
//! the best move, and on every N-th move deliberately plays a candidate that
//! trails the best by at least the tolerance.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::candidate::MoveCandidate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StealthError {
    #[error("no candidate moves to choose from")]
    NoCandidates,
}

/// Tunables of the selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthParams {
    /// Softmax temperature, in pawns.
    pub temperature: f64,
    /// Minimum gap to the best score, in centipawns, for a forced pick.
    pub tolerance_cp: i32,
    /// Force a sub-optimal pick on every N-th move; 0 disables it.
    pub inject_every: u32,
    /// Average centipawn loss the policy is tuned towards.
    pub target_acpl: f64,
}

impl Default for StealthParams {
    fn default() -> Self {
        StealthParams {
            temperature: 0.035,
            tolerance_cp: 100,
            inject_every: 15,
            target_acpl: 60.0,
        }
    }
}

/// Chooses one of `candidates`.
///
/// `move_count` is the number of this move in the game; when it is a positive
/// multiple of `inject_every` a candidate trailing `best_score` by at least
/// the tolerance is chosen uniformly, if one exists. Otherwise candidate `i`
/// is drawn with weight `exp(-(best_score - score_i) / (temperature * 100))`.
/// `fen` is used for logging only.
pub fn pick_move<'a, R: Rng + ?Sized>(
    candidates: &'a [MoveCandidate],
    best_score: i32,
    move_count: u32,
    fen: &str,
    params: &StealthParams,
    rng: &mut R,
) -> Result<&'a MoveCandidate, StealthError> {
    let top = candidates
        .iter()
        .min_by_key(|c| c.rank)
        .ok_or(StealthError::NoCandidates)?;

    if params.inject_every > 0 && move_count > 0 && move_count % params.inject_every == 0 {
        let weaker: Vec<&MoveCandidate> = candidates
            .iter()
            .filter(|c| best_score - c.score >= params.tolerance_cp)
            .collect();
        if !weaker.is_empty() {
            let pick = weaker[rng.gen_range(0..weaker.len())];
            debug!("move {}: injected {} at {}", move_count, pick.mv, fen);
            return Ok(pick);
        }
    }

    let weights: Vec<f64> = candidates
        .iter()
        .map(|c| (-((best_score - c.score) as f64) / (params.temperature * 100.0)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Ok(top);
    }

    let mut r = rng.gen::<f64>() * sum;
    let mut idx = 0;
    while idx < weights.len() - 1 && r > weights[idx] {
        r -= weights[idx];
        idx += 1;
    }
    Ok(&candidates[idx])
}
