//! Human-paced timing: log-normal response delays and the hints passed to
//! the move worker.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use crate::board::BoardLayout;

/// Log-normal `(mu, sigma)` whose distribution has the given mean and
/// standard deviation.
pub fn lognormal_params(mean: f64, stddev: f64) -> (f64, f64) {
    let sigma2 = (1.0 + (stddev * stddev) / (mean * mean)).ln();
    (mean.ln() - sigma2 / 2.0, sigma2.sqrt())
}

/// Draws a log-normal sample with the given mean and standard deviation.
/// Returns 0 for a non-positive mean.
pub fn sample_lognormal<R: Rng + ?Sized>(rng: &mut R, mean: f64, stddev: f64) -> f64 {
    if mean <= 0.0 {
        return 0.0;
    }
    let (mu, sigma) = lognormal_params(mean, stddev.max(0.0));
    // Box-Muller
    let u1: f64 = rng.gen::<f64>().max(1e-30);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    (mu + sigma * z).exp()
}

/// Delay before a move is executed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayModel {
    pub base: Duration,
    pub stealth_mean_ms: f64,
    pub stealth_stddev_ms: f64,
}

impl DelayModel {
    /// Base delay, plus a log-normal draw in stealth mode.
    pub fn sample<R: Rng + ?Sized>(&self, stealth: bool, rng: &mut R) -> Duration {
        if !stealth {
            return self.base;
        }
        let extra = sample_lognormal(rng, self.stealth_mean_ms, self.stealth_stddev_ms);
        self.base + Duration::from_secs_f64(extra.max(0.0) / 1000.0)
    }
}

/// Coarse game phase, judged by material on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Opening,
    Middlegame,
    Endgame,
}

impl GamePhase {
    pub fn from_layout(layout: &BoardLayout) -> GamePhase {
        match layout.piece_count() {
            n if n >= 28 => GamePhase::Opening,
            n if n <= 12 => GamePhase::Endgame,
            _ => GamePhase::Middlegame,
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GamePhase::Opening => "opening",
            GamePhase::Middlegame => "mid",
            GamePhase::Endgame => "end",
        })
    }
}

/// Timing hints forwarded to the move worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveHints {
    pub phase: GamePhase,
    /// Candidates within 50 cp of the best.
    pub complexity: usize,
    /// Best score in pawns, from the mover's point of view.
    pub eval_pawns: f64,
}

impl MoveHints {
    /// Extra command-line arguments for the move worker.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--phase".to_string(),
            self.phase.to_string(),
            "--complexity".to_string(),
            self.complexity.to_string(),
            "--eval".to_string(),
            format!("{:.2}", self.eval_pawns),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{parse_layout, START_LAYOUT};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn params_reproduce_mean_and_stddev() {
        let (mu, sigma) = lognormal_params(1500.0, 500.0);
        let mean = (mu + sigma * sigma / 2.0).exp();
        let var = ((sigma * sigma).exp() - 1.0) * (2.0 * mu + sigma * sigma).exp();
        assert!((mean - 1500.0).abs() < 1e-6);
        assert!((var.sqrt() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn sample_mean_is_close_to_target() {
        let mut rng = SmallRng::seed_from_u64(42);
        let n = 20_000;
        let total: f64 = (0..n).map(|_| sample_lognormal(&mut rng, 1500.0, 500.0)).sum();
        let mean = total / n as f64;
        assert!((mean - 1500.0).abs() < 30.0, "mean {}", mean);
    }

    #[test]
    fn samples_are_positive() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(sample_lognormal(&mut rng, 1500.0, 500.0) > 0.0);
        }
        assert_eq!(sample_lognormal(&mut rng, 0.0, 500.0), 0.0);
    }

    #[test]
    fn stealth_adds_to_the_base_delay() {
        let model = DelayModel {
            base: Duration::from_millis(200),
            stealth_mean_ms: 1500.0,
            stealth_stddev_ms: 500.0,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(model.sample(false, &mut rng), Duration::from_millis(200));
        assert!(model.sample(true, &mut rng) > Duration::from_millis(200));
    }

    #[test]
    fn phase_follows_material() {
        let start = parse_layout(START_LAYOUT).unwrap();
        assert_eq!(GamePhase::from_layout(&start), GamePhase::Opening);
        let ending = parse_layout("4k3/8/8/8/8/8/4P3/4K3").unwrap();
        assert_eq!(GamePhase::from_layout(&ending), GamePhase::Endgame);
        let middle = parse_layout("r3k2r/ppp2ppp/8/8/8/8/PPP2PPP/R3K2R").unwrap();
        assert_eq!(GamePhase::from_layout(&middle), GamePhase::Middlegame);
    }

    #[test]
    fn hints_render_as_flags() {
        let hints = MoveHints {
            phase: GamePhase::Middlegame,
            complexity: 2,
            eval_pawns: -0.4,
        };
        assert_eq!(
            hints.to_args(),
            vec!["--phase", "mid", "--complexity", "2", "--eval", "-0.40"]
        );
    }
}
