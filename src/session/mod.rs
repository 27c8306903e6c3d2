//! The session event loop.
//!
//! One thread owns every component. Worker output, move-worker completions
//! and operator commands arrive over channels; periodic capture, worker
//! restarts and delayed move execution come from a timer queue. Reader
//! threads only forward lines, so all state changes happen here, one event
//! at a time.

pub mod timers;

use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::board::Side;
use crate::capture::{CaptureError, FileScreen, FrameSource, RegionFrameSource};
use crate::config::Config;
use crate::decide::{Coordinator, CoordinatorEvent, Directive};
use crate::execute::{ExecutionOutcome, MoveExecutor, MoveRunner};
use crate::locate::Rect;
use crate::protocol::{classify_line, Control, EngineCommand, EngineLine, VisionRequest, WorkerLine};
use crate::telemetry::{TelemetryError, TelemetryRecorder};
use crate::worker::{
    ExitKind, ExitOutcome, Launcher, ProcessLauncher, Role, Supervisor, WorkerEvent,
};

pub use timers::{Timer, TimerQueue};

/// A frame left unanswered for this long no longer blocks the next one.
const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest single wait of `run`.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Moves listed by the `stats` command.
const RECENT_MOVES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Output for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(String),
    Decision(CoordinatorEvent),
    Executed(ExecutionOutcome),
    RegionChanged(Option<Rect>),
}

/// Sends operator commands to a running session from any thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: Sender<Control>,
}

impl SessionHandle {
    /// Returns false once the session is gone.
    pub fn send(&self, control: Control) -> bool {
        self.tx.send(control).is_ok()
    }
}

pub struct Session {
    config: Config,
    launcher: Box<dyn Launcher>,
    runner: Box<dyn MoveRunner>,
    frames: RegionFrameSource<Box<dyn FrameSource>>,
    vision: Supervisor,
    engine: Supervisor,
    coordinator: Coordinator<SmallRng>,
    executor: MoveExecutor,
    telemetry: TelemetryRecorder,
    rng: SmallRng,
    timers: TimerQueue,
    region: Option<Rect>,
    frame_sent_at: Option<Instant>,
    running: bool,
    worker_rx: Receiver<WorkerEvent>,
    outcome_tx: Sender<ExecutionOutcome>,
    outcome_rx: Receiver<ExecutionOutcome>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl Session {
    /// Wires a session from its collaborators. `seed` makes move choice and
    /// timing reproducible.
    pub fn new(
        config: Config,
        launcher: Box<dyn Launcher>,
        screen: Box<dyn FrameSource>,
        runner: Box<dyn MoveRunner>,
        seed: Option<u64>,
    ) -> Result<Session, SessionError> {
        let mut seeder = match seed {
            Some(s) => SmallRng::seed_from_u64(s),
            None => SmallRng::from_entropy(),
        };
        let coordinator_rng = SmallRng::seed_from_u64(seeder.gen());

        let (worker_tx, worker_rx) = unbounded();
        let (outcome_tx, outcome_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();

        let mut vision = Supervisor::new(
            Role::Vision,
            config.vision.spec(),
            config.vision.policy(),
            worker_tx.clone(),
        );
        vision.set_handshake(vec![VisionRequest::Color(config.player()).to_string()]);
        let mut engine = Supervisor::new(
            Role::Engine,
            config.engine.spec(),
            config.engine.policy(),
            worker_tx,
        );
        engine.set_handshake(vec![EngineCommand::Uci.to_string(), EngineCommand::IsReady.to_string()]);

        let telemetry = TelemetryRecorder::open(&config.telemetry.path, config.telemetry.rotate_bytes)?;
        let frames = RegionFrameSource::new(
            screen,
            &config.capture.frame_path,
            config.capture.frame_size,
            config.capture.device_pixel_ratio,
        );

        Ok(Session {
            coordinator: Coordinator::new(config.decision.clone(), coordinator_rng),
            executor: MoveExecutor::new(config.execution.delay_model()),
            region: config.capture.region,
            launcher,
            runner,
            frames,
            vision,
            engine,
            telemetry,
            rng: seeder,
            timers: TimerQueue::new(),
            frame_sent_at: None,
            running: false,
            worker_rx,
            outcome_tx,
            outcome_rx,
            control_tx,
            control_rx,
            subscribers: Vec::new(),
            config,
        })
    }

    /// A session backed by real child processes and the screenshot file
    /// named in the configuration.
    pub fn with_processes(config: Config) -> Result<Session, SessionError> {
        let screen = FileScreen::new(
            config.capture.screen_path.clone(),
            config.capture.screenshot_command.clone(),
        );
        let runner = config.execution.runner();
        Session::new(config, Box::new(ProcessLauncher), Box::new(screen), Box::new(runner), None)
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.control_tx.clone(),
        }
    }

    /// Receives every event emitted from now on.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn region(&self) -> Option<Rect> {
        self.region
    }

    pub fn coordinator(&self) -> &Coordinator<SmallRng> {
        &self.coordinator
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn status(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{}", msg);
        self.emit(SessionEvent::Status(msg));
    }

    fn flush_coordinator_events(&mut self) {
        for event in self.coordinator.drain_events() {
            self.emit(SessionEvent::Decision(event));
        }
    }

    fn supervisor(&mut self, role: Role) -> &mut Supervisor {
        match role {
            Role::Vision => &mut self.vision,
            Role::Engine => &mut self.engine,
        }
    }

    /// Starts both workers, finds the board if no region is configured and
    /// arms the capture loop. A worker that fails to start is reported as a
    /// status and left stopped; the session keeps running.
    pub fn start(&mut self) {
        for role in [Role::Vision, Role::Engine] {
            let launcher = self.launcher.as_mut();
            let supervisor = match role {
                Role::Vision => &mut self.vision,
                Role::Engine => &mut self.engine,
            };
            if let Err(e) = supervisor.start(launcher) {
                self.status(e.to_string());
            }
        }
        if self.region.is_none() {
            self.relocate();
        }
        self.running = true;
        self.coordinator.start();
        self.flush_coordinator_events();
        self.timers.schedule_in(Duration::ZERO, Timer::Capture);
    }

    /// Runs until `quit` or `stop`.
    pub fn run(&mut self) {
        self.start();
        while self.step(IDLE_WAIT) {}
    }

    /// Handles at most one channel message, then every due timer. Waits no
    /// longer than `max_wait` or the next deadline. Returns whether the
    /// session is still running.
    pub fn step(&mut self, max_wait: Duration) -> bool {
        let wait = self
            .timers
            .next_due()
            .map_or(max_wait, |due| due.saturating_duration_since(Instant::now()).min(max_wait));

        let (workers, outcomes, controls) = (
            self.worker_rx.clone(),
            self.outcome_rx.clone(),
            self.control_rx.clone(),
        );
        select! {
            recv(workers) -> event => {
                if let Ok(event) = event {
                    self.on_worker_event(event);
                }
            }
            recv(outcomes) -> outcome => {
                if let Ok(outcome) = outcome {
                    self.on_execution_outcome(outcome);
                }
            }
            recv(controls) -> control => {
                if let Ok(control) = control {
                    self.on_control(control);
                }
            }
            default(wait) => {}
        }

        self.fire_due_timers();
        self.running
    }

    /// Stops the workers and the capture loop.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.timers.clear();
        let _ = self.engine.send(&EngineCommand::Quit.to_string());
        self.engine.stop();
        self.vision.stop();
        self.status("Session stopped");
    }

    pub fn set_player_color(&mut self, side: Side) {
        self.coordinator.set_player(side);
        let line = VisionRequest::Color(side).to_string();
        self.vision.set_handshake(vec![line.clone()]);
        if self.vision.is_running() {
            let _ = self.vision.send(&line);
        }
        let name = match side {
            Side::White => "white",
            Side::Black => "black",
        };
        self.status(format!("Playing {}", name));
    }

    pub fn set_auto_execute(&mut self, enabled: bool) {
        self.coordinator.set_auto_execute(enabled);
        self.flush_coordinator_events();
    }

    pub fn set_stealth(&mut self, enabled: bool) {
        self.coordinator.set_stealth(enabled);
        self.flush_coordinator_events();
    }

    pub fn set_region(&mut self, region: Option<Rect>) {
        self.region = region;
        if let Some(r) = region {
            self.status(format!("Board region {}", r));
        }
        self.emit(SessionEvent::RegionChanged(region));
    }

    /// Runs the board locator on a fresh snapshot.
    pub fn relocate(&mut self) {
        match self.frames.locate(&self.config.locate) {
            Ok(found) => self.set_region(Some(found)),
            Err(e) => {
                warn!("board detection failed: {}", e);
                self.status(format!("{}; select the board region manually", e));
            }
        }
    }

    /// Forgets the game so far.
    pub fn new_game(&mut self) {
        self.coordinator.reset();
        self.executor.reset();
        self.timers.cancel(Timer::ExecuteMove);
        self.frame_sent_at = None;
        let _ = self.engine.send(&EngineCommand::Stop.to_string());
        let _ = self.engine.send(&EngineCommand::NewGame.to_string());
        if self.running {
            self.coordinator.start();
        }
        self.flush_coordinator_events();
    }

    fn on_control(&mut self, control: Control) {
        debug!("control: {:?}", control);
        match control {
            Control::SetPlayerColor(side) => self.set_player_color(side),
            Control::SetAutoExecute(on) => self.set_auto_execute(on),
            Control::SetStealth(on) => self.set_stealth(on),
            Control::SetRegion(r) => self.set_region(Some(r)),
            Control::Relocate => self.relocate(),
            Control::NewGame => self.new_game(),
            Control::ClearTelemetry => match self.telemetry.clear() {
                Ok(()) => self.status("Telemetry log cleared"),
                Err(e) => warn!("failed to clear telemetry: {}", e),
            },
            Control::Stats => {
                let s = self.telemetry.summary(RECENT_MOVES);
                self.status(format!(
                    "{} moves, best move {:.1}%, average loss {:.1} cp, recent think times {:?} ms",
                    s.entries, s.best_move_percent, s.average_cp_delta, s.recent_think_times
                ));
            }
            Control::Quit => self.stop(),
        }
    }

    fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Line {
                role,
                generation,
                line,
            } => {
                if !self.supervisor(role).is_current(generation) {
                    debug!("{} line from replaced instance {}: {}", role, generation, line);
                    return;
                }
                debug!("{} -> {}", role, line);
                if let Some(parsed) = classify_line(&line) {
                    self.on_worker_line(role, parsed);
                }
            }
            WorkerEvent::Exited {
                role,
                generation,
                kind,
            } => self.on_worker_exit(role, generation, kind),
        }
    }

    fn on_worker_line(&mut self, role: Role, line: WorkerLine) {
        if line.is_healthy_signal() {
            self.supervisor(role).mark_healthy();
        }

        let directives = match (role, line) {
            (Role::Vision, WorkerLine::PositionUpdate(pos)) => {
                self.frame_sent_at = None;
                if self.coordinator.current_key() != Some(pos.key()) {
                    self.executor.note_position_observed();
                }
                self.coordinator.on_position(pos)
            }
            (Role::Vision, WorkerLine::Skip) => {
                self.frame_sent_at = None;
                Vec::new()
            }
            (Role::Vision, WorkerLine::Ready)
            | (Role::Engine, WorkerLine::Engine(EngineLine::ReadyOk)) => {
                self.coordinator.on_worker_ready(role)
            }
            (Role::Engine, WorkerLine::Engine(engine_line)) => {
                self.coordinator.on_engine_line(engine_line)
            }
            (_, WorkerLine::Error(msg)) => {
                if role == Role::Vision {
                    self.frame_sent_at = None;
                }
                warn!("{} worker error: {}", role, msg);
                self.status(format!("{} error: {}", role, msg));
                Vec::new()
            }
            (_, other) => {
                debug!("ignoring {:?} from {} worker", other, role);
                Vec::new()
            }
        };
        self.apply(directives);
    }

    fn on_worker_exit(&mut self, role: Role, generation: u64, kind: ExitKind) {
        match self.supervisor(role).handle_exit(generation, kind) {
            ExitOutcome::Ignored => {}
            ExitOutcome::Stopped => self.status(format!("{} worker stopped", role)),
            ExitOutcome::RestartScheduled { generation, delay } => {
                self.worker_lost(role);
                self.timers.schedule_in(delay, Timer::Restart { role, generation });
            }
            ExitOutcome::GaveUp { crashes } => {
                self.worker_lost(role);
                self.status(format!(
                    "{} worker crashed {} times in a row; not restarting",
                    role, crashes
                ));
            }
        }
    }

    fn worker_lost(&mut self, role: Role) {
        if role == Role::Vision {
            self.frame_sent_at = None;
        }
        self.coordinator.on_worker_crashed(role);
        self.flush_coordinator_events();
    }

    fn apply(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::Engine(cmd) => {
                    let _ = self.engine.send(&cmd.to_string());
                }
                Directive::Execute(req) => {
                    let flipped = self.coordinator.config().player == Side::Black;
                    let stealth = self.coordinator.config().stealth_enabled;
                    match self
                        .executor
                        .schedule(req, self.region, flipped, stealth, &mut self.rng)
                    {
                        Ok(wait) => self.timers.schedule_in(wait, Timer::ExecuteMove),
                        Err(e) => {
                            self.coordinator.on_execution_rejected();
                            self.status(format!("Move {} not executed: {}", req.mv, e));
                        }
                    }
                }
                Directive::Record(entry) => {
                    if let Err(e) = self.telemetry.log(entry) {
                        warn!("telemetry write failed: {}", e);
                    }
                }
            }
        }
        self.flush_coordinator_events();
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while let Some(timer) = self.timers.pop_due(now) {
            match timer {
                Timer::Capture => self.capture_tick(),
                Timer::Restart { role, generation } => self.restart(role, generation),
                Timer::ExecuteMove => self.execute_due(),
            }
        }
    }

    fn capture_tick(&mut self) {
        if !self.running {
            return;
        }
        self.timers
            .schedule_in(self.config.capture.interval(), Timer::Capture);

        if self.executor.in_flight() {
            debug!("capture paused while a move is executing");
            return;
        }
        if !self.vision.is_running() {
            return;
        }
        if let Some(sent) = self.frame_sent_at {
            if sent.elapsed() < FRAME_TIMEOUT {
                debug!("previous frame still being analysed");
                return;
            }
            warn!("vision worker did not answer the last frame");
        }

        match self.frames.capture(self.region) {
            Ok(path) => {
                if self.vision.send(&VisionRequest::Frame(path).to_string()).is_ok() {
                    self.frame_sent_at = Some(Instant::now());
                }
            }
            Err(CaptureError::NoRegion) => debug!("no board region, capture skipped"),
            Err(e) => warn!("capture failed: {}", e),
        }
    }

    fn restart(&mut self, role: Role, generation: u64) {
        let launcher = self.launcher.as_mut();
        let supervisor = match role {
            Role::Vision => &mut self.vision,
            Role::Engine => &mut self.engine,
        };
        match supervisor.restart_due(generation, launcher) {
            None => {}
            Some(Ok(_)) => {
                if role == Role::Vision {
                    self.frame_sent_at = None;
                }
                self.status(format!("{} worker restarted", role));
            }
            Some(Err(e)) => {
                error!("{}", e);
                self.status(e.to_string());
            }
        }
    }

    fn execute_due(&mut self) {
        match self.executor.fire(self.runner.as_mut(), self.outcome_tx.clone()) {
            Ok(Some(mv)) => self.status(format!("Executing {}", mv)),
            Ok(None) => {}
            Err(e) => {
                self.coordinator.on_execution_rejected();
                self.status(format!("Move not executed: {}", e));
            }
        }
    }

    fn on_execution_outcome(&mut self, outcome: ExecutionOutcome) {
        self.executor.finish(&outcome);
        self.coordinator.on_execution_finished(outcome.mv, outcome.success);
        self.emit(SessionEvent::Executed(outcome));
        self.flush_coordinator_events();
        if self.running {
            self.timers.cancel(Timer::Capture);
            self.timers.schedule_in(Duration::ZERO, Timer::Capture);
        }
    }
}
