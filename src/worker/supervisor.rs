//! Worker lifecycle: start, handshake, send, crash detection and bounded
//! restart.
//!
//! Every started instance gets a new generation number. Output and exit
//! events carry the generation of the instance that produced them, so events
//! from a replaced instance are recognised and dropped instead of acting on
//! the current one.

use std::io;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use super::{ExitKind, Launcher, Role, WorkerEvent, WorkerProcess, WorkerSpec};

/// Errors reported by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to start {role} worker: {source}")]
    StartFailed {
        role: Role,
        #[source]
        source: io::Error,
    },

    #[error("{0} worker is not running")]
    NotRunning(Role),
}

/// Crash-restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    /// Delay before the restart; zero still defers it to the next loop turn.
    pub delay: Duration,
    /// Consecutive crashes tolerated without a healthy line in between.
    pub max_consecutive: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            enabled: true,
            delay: Duration::ZERO,
            max_consecutive: 5,
        }
    }
}

/// What the caller should do after an exit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The event belongs to a replaced or stopped instance.
    Ignored,
    /// Clean exit, or restart disabled for that instance.
    Stopped,
    /// Call `restart_due(generation, ..)` after `delay`.
    RestartScheduled { generation: u64, delay: Duration },
    /// Too many consecutive crashes; no further restart.
    GaveUp { crashes: u32 },
}

struct WorkerHandle {
    generation: u64,
    process: Box<dyn WorkerProcess>,
    restart_on_crash: bool,
}

/// Keeps at most one live instance of a worker role.
pub struct Supervisor {
    role: Role,
    spec: WorkerSpec,
    policy: RestartPolicy,
    handshake: Vec<String>,
    events: Sender<WorkerEvent>,
    generation: u64,
    handle: Option<WorkerHandle>,
    pending_restart: Option<u64>,
    crashes: u32,
}

impl Supervisor {
    pub fn new(role: Role, spec: WorkerSpec, policy: RestartPolicy, events: Sender<WorkerEvent>) -> Self {
        Supervisor {
            role,
            spec,
            policy,
            handshake: Vec::new(),
            events,
            generation: 0,
            handle: None,
            pending_restart: None,
            crashes: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Generation of the most recently started instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Lines written to every new instance right after it starts.
    pub fn set_handshake(&mut self, lines: Vec<String>) {
        self.handshake = lines;
    }

    /// Consecutive crashes since the last healthy line.
    pub fn consecutive_crashes(&self) -> u32 {
        self.crashes
    }

    pub fn is_running(&mut self) -> bool {
        self.handle
            .as_mut()
            .is_some_and(|h| h.process.is_running())
    }

    /// Launches a new instance, replacing (and killing) any existing one.
    pub fn start(&mut self, launcher: &mut dyn Launcher) -> Result<u64, SupervisorError> {
        self.shutdown_current();
        self.pending_restart = None;

        self.generation += 1;
        let generation = self.generation;
        let process = launcher
            .launch(self.role, generation, &self.spec, self.events.clone())
            .map_err(|source| {
                error!("{} worker failed to start: {}", self.role, source);
                SupervisorError::StartFailed {
                    role: self.role,
                    source,
                }
            })?;

        let mut handle = WorkerHandle {
            generation,
            process,
            restart_on_crash: self.policy.enabled,
        };
        for line in &self.handshake {
            if let Err(e) = handle.process.write_line(line) {
                warn!("{} handshake write failed: {}", self.role, e);
            }
        }
        info!(
            "{} worker started ({}, generation {})",
            self.role,
            self.spec.program.display(),
            generation
        );
        self.handle = Some(handle);
        Ok(generation)
    }

    /// Writes one line to the running instance; a no-op with a warning otherwise.
    pub fn send(&mut self, line: &str) -> Result<(), SupervisorError> {
        let role = self.role;
        let Some(handle) = self.handle.as_mut() else {
            warn!("dropping line for stopped {} worker: {}", role, line);
            return Err(SupervisorError::NotRunning(role));
        };
        match handle.process.write_line(line) {
            Ok(()) => {
                debug!("{} <- {}", role, line);
                Ok(())
            }
            Err(e) => {
                warn!("write to {} worker failed ({}): {}", role, e, line);
                Err(SupervisorError::NotRunning(role))
            }
        }
    }

    /// Intentional shutdown: the restart policy of the current instance is
    /// disabled before it is killed.
    pub fn stop(&mut self) {
        if self.handle.is_some() {
            info!("stopping {} worker", self.role);
        }
        self.pending_restart = None;
        self.shutdown_current();
    }

    fn shutdown_current(&mut self) {
        if let Some(mut old) = self.handle.take() {
            old.restart_on_crash = false;
            old.process.kill();
        }
    }

    /// Whether a line tagged with `generation` comes from the live instance.
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.generation == generation)
    }

    /// Records that the live instance produced a healthy line.
    pub fn mark_healthy(&mut self) {
        if self.crashes > 0 {
            debug!("{} worker healthy again after {} crash(es)", self.role, self.crashes);
        }
        self.crashes = 0;
    }

    /// Handles the exit of instance `generation`.
    pub fn handle_exit(&mut self, generation: u64, kind: ExitKind) -> ExitOutcome {
        if !self.is_current(generation) {
            debug!("{} exit from stale generation {}", self.role, generation);
            return ExitOutcome::Ignored;
        }
        let restart_on_crash = self
            .handle
            .take()
            .is_some_and(|h| h.restart_on_crash);

        match kind {
            ExitKind::Normal => {
                info!("{} worker exited", self.role);
                ExitOutcome::Stopped
            }
            ExitKind::Crashed { code } => {
                warn!("{} worker crashed (exit code {:?})", self.role, code);
                if !restart_on_crash {
                    return ExitOutcome::Stopped;
                }
                self.crashes += 1;
                if self.crashes > self.policy.max_consecutive {
                    error!(
                        "{} worker crashed {} times in a row, not restarting",
                        self.role, self.crashes
                    );
                    return ExitOutcome::GaveUp {
                        crashes: self.crashes,
                    };
                }
                self.pending_restart = Some(generation);
                ExitOutcome::RestartScheduled {
                    generation,
                    delay: self.policy.delay,
                }
            }
        }
    }

    /// Performs a restart scheduled for the crash of `generation`. Does
    /// nothing when another instance was started in the meantime.
    pub fn restart_due(
        &mut self,
        generation: u64,
        launcher: &mut dyn Launcher,
    ) -> Option<Result<u64, SupervisorError>> {
        if self.pending_restart != Some(generation) || self.handle.is_some() {
            debug!("{} restart for generation {} superseded", self.role, generation);
            return None;
        }
        info!("restarting {} worker", self.role);
        Some(self.start(launcher))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown_current();
    }
}
