//! End-to-end tests with real child processes.
//!
//! The vision and engine workers are small `sh` scripts that speak the same
//! line protocols as the real ones, so these tests exercise process
//! spawning, reader threads, crash detection and restart without Python or
//! a chess engine installed.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use image::{Rgba, RgbaImage};

use kibitz::capture::{CaptureError, FrameSource};
use kibitz::config::Config;
use kibitz::decide::CoordinatorEvent;
use kibitz::execute::ProcessRunner;
use kibitz::locate::Rect;
use kibitz::session::{Session, SessionEvent};
use kibitz::worker::{
    ExitKind, ExitOutcome, ProcessLauncher, RestartPolicy, Role, Supervisor, WorkerEvent,
    WorkerSpec,
};

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Answers every frame with the start position.
fn vision_script() -> String {
    format!(
        r#"echo ready
while read line; do
  case "$line" in
    "[color]"*) ;;
    *) echo "[FEN] {}" ;;
  esac
done"#,
        START_FEN
    )
}

/// Always proposes e2e4. When `crash_marker` is set, the first instance to
/// receive `go` exits with status 3 instead.
fn engine_script(crash_marker: Option<&Path>) -> String {
    let crash = match crash_marker {
        Some(p) => format!(
            r#"if [ ! -f "{0}" ]; then touch "{0}"; exit 3; fi; "#,
            p.display()
        ),
        None => String::new(),
    };
    format!(
        r#"while read line; do
  case "$line" in
    uci) echo "id name scripted"; echo uciok ;;
    isready) echo readyok ;;
    go*) {}echo "info depth 1 multipv 1 score cp 12 pv e2e4 e7e5"; echo "bestmove e2e4" ;;
    quit) exit 0 ;;
  esac
done"#,
        crash
    )
}

fn sh(script: String) -> WorkerSpec {
    WorkerSpec {
        program: "sh".into(),
        args: vec!["-c".to_string(), script],
    }
}

struct StaticScreen(RgbaImage);

impl FrameSource for StaticScreen {
    fn snapshot(&mut self) -> Result<RgbaImage, CaptureError> {
        Ok(self.0.clone())
    }
}

fn session(dir: &Path, crash_marker: Option<&Path>) -> (Session, Receiver<SessionEvent>) {
    let mut config = Config::default();
    config.vision.program = "sh".into();
    config.vision.args = vec!["-c".to_string(), vision_script()];
    config.engine.program = "sh".into();
    config.engine.args = vec!["-c".to_string(), engine_script(crash_marker)];
    config.capture.region = Some(Rect::new(0, 0, 80, 80));
    config.capture.frame_path = dir.join("frame.png");
    config.capture.interval_ms = 100;
    config.telemetry.path = dir.join("telemetry_log.json");
    config.decision.auto_execute = true;

    let args_file = dir.join("move_args.txt");
    let runner = ProcessRunner {
        program: "sh".into(),
        prefix_args: vec![
            "-c".to_string(),
            format!(r#"echo "$@" > "{}""#, args_file.display()),
            "move-worker".to_string(),
        ],
    };
    let screen = StaticScreen(RgbaImage::from_pixel(120, 120, Rgba([60, 60, 60, 255])));

    let mut session = Session::new(
        config,
        Box::new(ProcessLauncher),
        Box::new(screen),
        Box::new(runner),
        Some(5),
    )
    .expect("session setup");
    let events = session.subscribe();
    (session, events)
}

/// Steps the session until `done` sees a matching event or time runs out.
fn drive_until(
    session: &mut Session,
    events: &Receiver<SessionEvent>,
    timeout: Duration,
    mut done: impl FnMut(&SessionEvent) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        session.step(Duration::from_millis(20));
        if events.try_iter().any(|e| done(&e)) {
            return true;
        }
    }
    false
}

#[test]
fn frame_to_executed_move() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, events) = session(dir.path(), None);
    session.start();

    let executed = drive_until(&mut session, &events, Duration::from_secs(10), |e| {
        matches!(e, SessionEvent::Executed(o) if o.success)
    });
    assert!(executed, "move was never executed");

    let entries = session.telemetry().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].mv, "e2e4");
    assert_eq!(entries[0].eval_best, 12);
    assert_eq!(entries[0].fen, START_FEN);

    let args = fs::read_to_string(dir.path().join("move_args.txt")).unwrap();
    assert_eq!(
        args.trim(),
        "e2 e4 0 0 10 false false --phase opening --complexity 1 --eval 0.12"
    );
    session.stop();
}

#[test]
fn engine_crash_mid_search_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("crashed");
    let (mut session, events) = session(dir.path(), Some(&marker));
    session.start();

    let mut restarted = false;
    let chosen = drive_until(&mut session, &events, Duration::from_secs(10), |e| {
        if let SessionEvent::Status(s) = e {
            restarted |= s == "engine worker restarted";
        }
        matches!(e, SessionEvent::Decision(CoordinatorEvent::MoveChosen { .. }))
    });

    assert!(marker.exists());
    assert!(restarted);
    assert!(chosen, "no move chosen after the engine restart");
    assert_eq!(session.telemetry().entries().len(), 1);
    session.stop();
}

#[test]
fn supervisor_reports_output_and_exit_codes() {
    let (tx, rx) = unbounded();
    let mut launcher = ProcessLauncher;
    let mut sup = Supervisor::new(
        Role::Engine,
        sh("echo hello; exit 5".to_string()),
        RestartPolicy::default(),
        tx,
    );
    let gen = sup.start(&mut launcher).unwrap();

    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        first,
        WorkerEvent::Line {
            role: Role::Engine,
            generation: gen,
            line: "hello".to_string()
        }
    );
    let exit = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        exit,
        WorkerEvent::Exited {
            role: Role::Engine,
            generation: gen,
            kind: ExitKind::Crashed { code: Some(5) }
        }
    );
}

#[test]
fn killed_instance_exit_is_ignored_after_restart() {
    let (tx, rx) = unbounded();
    let mut launcher = ProcessLauncher;
    let mut sup = Supervisor::new(
        Role::Vision,
        sh("echo ready; while read line; do echo \"$line\"; done".to_string()),
        RestartPolicy::default(),
        tx,
    );
    let first = sup.start(&mut launcher).unwrap();
    let second = sup.start(&mut launcher).unwrap();
    assert_ne!(first, second);
    assert!(sup.is_running());

    // The replaced instance still reports its exit; it must not count.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut saw_old_exit = false;
    while Instant::now() < deadline && !saw_old_exit {
        if let Ok(WorkerEvent::Exited { generation, kind, .. }) =
            rx.recv_timeout(Duration::from_millis(100))
        {
            if generation == first {
                assert_eq!(sup.handle_exit(generation, kind), ExitOutcome::Ignored);
                saw_old_exit = true;
            }
        }
    }
    assert!(saw_old_exit);
    assert_eq!(sup.consecutive_crashes(), 0);

    sup.send("echo-me").unwrap();
    sup.stop();
}

#[test]
fn non_utf8_output_line_is_skipped() {
    let (tx, rx) = unbounded();
    let mut launcher = ProcessLauncher;
    let mut sup = Supervisor::new(
        Role::Vision,
        sh(r"printf '\377garbage\n'; echo ready; while read line; do :; done".to_string()),
        RestartPolicy::default(),
        tx,
    );
    let gen = sup.start(&mut launcher).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut lines = Vec::new();
    while Instant::now() < deadline && !lines.iter().any(|l| l == "ready") {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(WorkerEvent::Line { generation, line, .. }) if generation == gen => lines.push(line),
            Ok(WorkerEvent::Exited { kind, .. }) => panic!("worker exited early: {:?}", kind),
            _ => {}
        }
    }
    assert_eq!(lines.len(), 2, "lines: {:?}", lines);
    assert!(lines[0].ends_with("garbage"));
    assert_eq!(lines[1], "ready");
    assert!(sup.is_running());
    sup.stop();
}
