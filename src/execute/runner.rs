//! Move worker invocation.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::delay::MoveHints;
use super::ExecutionError;
use crate::board::Move;
use crate::locate::Rect;

/// Everything the move worker needs to perform one move on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveJob {
    pub mv: Move,
    pub region: Rect,
    /// Board is drawn from black's side.
    pub flipped: bool,
    pub stealth: bool,
    pub hints: MoveHints,
}

impl MoveJob {
    pub fn tile_size(&self) -> u32 {
        self.region.width / 8
    }

    /// Positional arguments followed by the hint flags:
    /// `from to originX originY tileSize flipped stealth --phase .. --complexity .. --eval ..`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.mv.from.to_string(),
            self.mv.to.to_string(),
            self.region.x.to_string(),
            self.region.y.to_string(),
            self.tile_size().to_string(),
            self.flipped.to_string(),
            self.stealth.to_string(),
        ];
        args.extend(self.hints.to_args());
        args
    }
}

/// How a move execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub mv: Move,
    pub success: bool,
    pub code: Option<i32>,
}

/// Performs move jobs. Completion is reported on `done`, possibly from
/// another thread.
pub trait MoveRunner {
    fn run(&mut self, job: &MoveJob, done: Sender<ExecutionOutcome>) -> Result<(), ExecutionError>;
}

/// Runs the move worker as a child process, one per move.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub program: PathBuf,
    /// Arguments placed before the job arguments, such as a script path.
    pub prefix_args: Vec<String>,
}

impl MoveRunner for ProcessRunner {
    fn run(&mut self, job: &MoveJob, done: Sender<ExecutionOutcome>) -> Result<(), ExecutionError> {
        let args = job.args();
        debug!("move worker args: {:?}", args);
        let mut child = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;

        let mv = job.mv;
        info!("executing {}", mv);
        thread::Builder::new()
            .name("move-worker".to_string())
            .spawn(move || {
                let outcome = match child.wait() {
                    Ok(status) => ExecutionOutcome {
                        mv,
                        success: status.success(),
                        code: status.code(),
                    },
                    Err(e) => {
                        warn!("waiting on move worker failed: {}", e);
                        ExecutionOutcome {
                            mv,
                            success: false,
                            code: None,
                        }
                    }
                };
                let _ = done.send(outcome);
            })
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;
        Ok(())
    }
}
