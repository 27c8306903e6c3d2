//! External worker processes.
//!
//! A worker is a long-running child process that speaks a line protocol on
//! stdin/stdout. `Supervisor` keeps one instance alive per `Role`; the
//! `Launcher` and `WorkerProcess` traits separate it from the OS so the
//! restart policy can be exercised without real processes.

pub mod process;
pub mod supervisor;

use std::fmt;
use std::io;
use std::path::PathBuf;

use crossbeam_channel::Sender;

pub use process::ProcessLauncher;
pub use supervisor::{ExitOutcome, RestartPolicy, Supervisor, SupervisorError};

/// The logical job a worker performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Vision,
    Engine,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Vision => f.write_str("vision"),
            Role::Engine => f.write_str("engine"),
        }
    }
}

/// How to launch a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with status 0.
    Normal,
    /// Non-zero exit code, or killed by a signal (`code` is `None`).
    Crashed { code: Option<i32> },
}

/// Output observed from a worker, tagged with the instance that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Line {
        role: Role,
        generation: u64,
        line: String,
    },
    Exited {
        role: Role,
        generation: u64,
        kind: ExitKind,
    },
}

/// A running worker instance.
pub trait WorkerProcess: Send {
    /// Writes one line to the worker's stdin.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Whether the process is still alive.
    fn is_running(&mut self) -> bool;

    /// Terminates the process. Its exit is still reported as a `WorkerEvent`.
    fn kill(&mut self);
}

/// Starts worker instances whose output is forwarded to `events`.
pub trait Launcher {
    fn launch(
        &mut self,
        role: Role,
        generation: u64,
        spec: &WorkerSpec,
        events: Sender<WorkerEvent>,
    ) -> io::Result<Box<dyn WorkerProcess>>;
}
