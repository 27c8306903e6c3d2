//! OS-process workers.
//!
//! Each child gets a reader thread that forwards stdout lines to the session
//! channel and reports the exit once stdout closes. The threads only forward
//! data; every decision happens on the session loop.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use super::{ExitKind, Launcher, Role, WorkerEvent, WorkerProcess, WorkerSpec};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Launches workers as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

struct ChildProcess {
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
}

impl WorkerProcess for ChildProcess {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        writeln!(stdin, "{}", line)?;
        stdin.flush()
    }

    fn is_running(&mut self) -> bool {
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Ok(mut child) = self.child.lock() {
            if let Err(e) = child.kill() {
                debug!("kill: {}", e);
            }
        }
    }
}

fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    if status.success() {
        ExitKind::Normal
    } else {
        ExitKind::Crashed {
            code: status.code(),
        }
    }
}

/// Calls `f` with every line of `reader`, without its line ending. Bytes
/// that are not UTF-8 are replaced rather than ending the stream. Stops at
/// end of input, on a read error, or when `f` returns false.
fn for_each_line(reader: impl Read, mut f: impl FnMut(String) -> bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                debug!("worker pipe read failed: {}", e);
                return;
            }
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        if !f(String::from_utf8_lossy(&buf).into_owned()) {
            return;
        }
    }
}

/// Polls until the child has exited. Never holds the lock while sleeping.
fn wait_for_exit(child: &Mutex<Child>) -> ExitKind {
    loop {
        let polled = match child.lock() {
            Ok(mut c) => c.try_wait(),
            Err(_) => return ExitKind::Crashed { code: None },
        };
        match polled {
            Ok(Some(status)) => return exit_kind(status),
            Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
            Err(e) => {
                warn!("waiting on worker failed: {}", e);
                return ExitKind::Crashed { code: None };
            }
        }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &mut self,
        role: Role,
        generation: u64,
        spec: &WorkerSpec,
        events: Sender<WorkerEvent>,
    ) -> std::io::Result<Box<dyn WorkerProcess>> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child = Arc::new(Mutex::new(child));

        if let Some(stderr) = stderr {
            thread::Builder::new()
                .name(format!("{}-stderr", role))
                .spawn(move || {
                    for_each_line(stderr, |line| {
                        debug!(worker = %role, "stderr: {}", line);
                        true
                    });
                })?;
        }

        let waiter = Arc::clone(&child);
        thread::Builder::new()
            .name(format!("{}-stdout", role))
            .spawn(move || {
                if let Some(stdout) = stdout {
                    let mut connected = true;
                    for_each_line(stdout, |line| {
                        connected = events
                            .send(WorkerEvent::Line {
                                role,
                                generation,
                                line,
                            })
                            .is_ok();
                        connected
                    });
                    if !connected {
                        return;
                    }
                }
                let kind = wait_for_exit(&waiter);
                let _ = events.send(WorkerEvent::Exited {
                    role,
                    generation,
                    kind,
                });
            })?;

        Ok(Box::new(ChildProcess {
            child,
            stdin,
        }))
    }
}
