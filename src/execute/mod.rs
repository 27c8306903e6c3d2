//! Move execution.
//!
//! `MoveExecutor` turns a chosen move into one run of the move worker after
//! a delay. At most one execution is in flight, a move is not repeated
//! until a new position has been observed, and the in-flight flag is
//! cleared whenever a run ends, successful or not.

pub mod delay;
pub mod runner;

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::Sender;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::board::Move;
use crate::locate::Rect;

pub use delay::{DelayModel, GamePhase, MoveHints};
pub use runner::{ExecutionOutcome, MoveJob, MoveRunner, ProcessRunner};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("malformed move request: {0}")]
    Malformed(String),

    #[error("an execution is already in flight")]
    InFlight,

    #[error("{0} was already executed and no new position has been seen")]
    Duplicate(Move),

    #[error("failed to start move worker: {0}")]
    SpawnFailed(String),
}

/// Settings of the move worker and its timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub base_delay_ms: u64,
    pub stealth_delay_mean_ms: f64,
    pub stealth_delay_stddev_ms: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            program: PathBuf::from("python3"),
            args: vec!["play_move.py".to_string()],
            base_delay_ms: 0,
            stealth_delay_mean_ms: 1500.0,
            stealth_delay_stddev_ms: 500.0,
        }
    }
}

impl ExecutionConfig {
    pub fn delay_model(&self) -> DelayModel {
        DelayModel {
            base: Duration::from_millis(self.base_delay_ms),
            stealth_mean_ms: self.stealth_delay_mean_ms,
            stealth_stddev_ms: self.stealth_delay_stddev_ms,
        }
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner {
            program: self.program.clone(),
            prefix_args: self.args.clone(),
        }
    }
}

/// A move chosen for execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub mv: Move,
    pub hints: MoveHints,
}

/// Validates a textual move descriptor: two squares, optionally followed by
/// a promotion letter.
pub fn parse_descriptor(s: &str) -> Result<Move, ExecutionError> {
    let mv: Move = s
        .trim()
        .parse()
        .map_err(|_| ExecutionError::Malformed(s.to_string()))?;
    if mv.from == mv.to {
        return Err(ExecutionError::Malformed(s.to_string()));
    }
    Ok(mv)
}

#[derive(Debug)]
pub struct MoveExecutor {
    delay: DelayModel,
    in_flight: bool,
    pending: Option<MoveJob>,
    last_executed: Option<Move>,
    observed_since_last: bool,
}

impl MoveExecutor {
    pub fn new(delay: DelayModel) -> Self {
        MoveExecutor {
            delay,
            in_flight: false,
            pending: None,
            last_executed: None,
            observed_since_last: true,
        }
    }

    /// True from `schedule` until the run has finished.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_executed(&self) -> Option<Move> {
        self.last_executed
    }

    /// Records that a fresh position was observed.
    pub fn note_position_observed(&mut self) {
        self.observed_since_last = true;
    }

    /// Accepts `req` and returns how long to wait before calling `fire`.
    pub fn schedule<R: Rng + ?Sized>(
        &mut self,
        req: MoveRequest,
        region: Option<Rect>,
        flipped: bool,
        stealth: bool,
        rng: &mut R,
    ) -> Result<Duration, ExecutionError> {
        if self.in_flight {
            return Err(ExecutionError::InFlight);
        }
        if req.mv.from == req.mv.to {
            return Err(ExecutionError::Malformed(req.mv.to_string()));
        }
        if self.last_executed == Some(req.mv) && !self.observed_since_last {
            debug!("suppressing repeated execution of {}", req.mv);
            return Err(ExecutionError::Duplicate(req.mv));
        }
        let region = match region {
            Some(r) if r.width >= 8 && r.height >= 8 => r,
            _ => return Err(ExecutionError::Malformed("no board region".to_string())),
        };

        let wait = self.delay.sample(stealth, rng);
        self.pending = Some(MoveJob {
            mv: req.mv,
            region,
            flipped,
            stealth,
            hints: req.hints,
        });
        self.in_flight = true;
        debug!("{} scheduled in {:?}", req.mv, wait);
        Ok(wait)
    }

    /// Starts the scheduled job. Returns the move that was started, if any.
    pub fn fire(
        &mut self,
        runner: &mut dyn MoveRunner,
        done: Sender<ExecutionOutcome>,
    ) -> Result<Option<Move>, ExecutionError> {
        let Some(job) = self.pending.take() else {
            return Ok(None);
        };
        if let Err(e) = runner.run(&job, done) {
            warn!("{}", e);
            self.in_flight = false;
            return Err(e);
        }
        self.last_executed = Some(job.mv);
        self.observed_since_last = false;
        Ok(Some(job.mv))
    }

    /// Clears the in-flight flag, whatever the outcome.
    pub fn finish(&mut self, outcome: &ExecutionOutcome) {
        if outcome.success {
            info!("{} executed", outcome.mv);
        } else {
            warn!("move worker failed for {} (exit code {:?})", outcome.mv, outcome.code);
        }
        self.in_flight = false;
    }

    /// Drops any scheduled job and forgets the last execution.
    pub fn reset(&mut self) {
        self.pending = None;
        self.in_flight = false;
        self.last_executed = None;
        self.observed_since_last = true;
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    const REGION: Option<Rect> = Some(Rect {
        x: 10,
        y: 20,
        width: 400,
        height: 400,
    });

    fn request(s: &str) -> MoveRequest {
        MoveRequest {
            mv: s.parse().unwrap(),
            hints: MoveHints {
                phase: GamePhase::Opening,
                complexity: 1,
                eval_pawns: 0.2,
            },
        }
    }

    fn executor() -> MoveExecutor {
        MoveExecutor::new(ExecutionConfig::default().delay_model())
    }

    #[test]
    fn descriptors_must_name_two_squares() {
        assert!(parse_descriptor("e2e4").is_ok());
        assert!(parse_descriptor("e7e8q").is_ok());
        assert!(matches!(parse_descriptor("e2"), Err(ExecutionError::Malformed(_))));
        assert!(matches!(parse_descriptor("e2e9"), Err(ExecutionError::Malformed(_))));
        assert!(matches!(parse_descriptor("e2e4e5"), Err(ExecutionError::Malformed(_))));
        assert!(matches!(parse_descriptor("e2e2"), Err(ExecutionError::Malformed(_))));
    }

    #[test]
    fn one_execution_at_a_time() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ex = executor();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut runner = FakeRunner::default();

        assert_eq!(
            ex.schedule(request("e2e4"), REGION, false, false, &mut rng),
            Ok(Duration::ZERO)
        );
        assert_eq!(
            ex.schedule(request("d2d4"), REGION, false, false, &mut rng),
            Err(ExecutionError::InFlight)
        );
        assert_eq!(ex.fire(&mut runner, tx).unwrap(), Some(request("e2e4").mv));
        assert!(ex.in_flight());
        assert!(rx.try_recv().is_err());
        assert_eq!(runner.jobs.lock().unwrap()[0].tile_size(), 50);
    }

    #[test]
    fn failure_still_clears_in_flight() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ex = executor();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut runner = FakeRunner {
            complete: Some(false),
            ..FakeRunner::default()
        };
        ex.schedule(request("e2e4"), REGION, false, false, &mut rng).unwrap();
        ex.fire(&mut runner, tx).unwrap();
        let outcome = rx.try_recv().unwrap();
        assert!(!outcome.success);
        ex.finish(&outcome);
        assert!(!ex.in_flight());
    }

    #[test]
    fn spawn_failure_clears_in_flight() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ex = executor();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut runner = FakeRunner {
            fail: true,
            ..FakeRunner::default()
        };
        ex.schedule(request("e2e4"), REGION, false, false, &mut rng).unwrap();
        assert!(matches!(
            ex.fire(&mut runner, tx),
            Err(ExecutionError::SpawnFailed(_))
        ));
        assert!(!ex.in_flight());
        assert_eq!(ex.last_executed(), None);
    }

    #[test]
    fn repeat_is_suppressed_until_a_new_position() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ex = executor();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut runner = FakeRunner {
            complete: Some(true),
            ..FakeRunner::default()
        };
        ex.schedule(request("e2e4"), REGION, false, false, &mut rng).unwrap();
        ex.fire(&mut runner, tx.clone()).unwrap();
        ex.finish(&rx.try_recv().unwrap());

        let again = request("e2e4");
        assert_eq!(
            ex.schedule(again, REGION, false, false, &mut rng),
            Err(ExecutionError::Duplicate(again.mv))
        );
        assert!(ex.schedule(request("d2d4"), REGION, false, false, &mut rng).is_ok());
        ex.fire(&mut runner, tx).unwrap();
        ex.finish(&rx.try_recv().unwrap());

        ex.note_position_observed();
        ex.note_position_observed();
        assert!(ex.schedule(request("d2d4"), REGION, false, false, &mut rng).is_ok());
    }

    #[test]
    fn missing_region_is_rejected_before_spawning() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ex = executor();
        assert!(matches!(
            ex.schedule(request("e2e4"), None, false, false, &mut rng),
            Err(ExecutionError::Malformed(_))
        ));
        assert!(!ex.in_flight());
    }

    #[test]
    fn stealth_adds_a_random_delay() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut ex = executor();
        let wait = ex
            .schedule(request("e2e4"), REGION, false, true, &mut rng)
            .unwrap();
        assert!(wait > Duration::ZERO);
    }
}
