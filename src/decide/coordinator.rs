//! Decision coordinator.
//!
//! A state machine fed with classified worker output. It never performs I/O
//! itself: every input returns the `Directive`s the session must carry out,
//! and observable changes are queued as `CoordinatorEvent`s for the
//! presentation layer.
//!
//! Evaluation requests are answered strictly in order by the engine, so
//! outstanding requests are kept in a FIFO, each tagged with the position it
//! was sent for. A result is acted on only when its tag is still the tracked
//! position; otherwise it is stale and dropped.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::candidate::{best_score, close_alternatives, CandidateSet, MoveCandidate};
use super::repetition::{RepetitionTracker, DEFAULT_THRESHOLD};
use super::stealth::{pick_move, StealthParams};
use crate::board::{infer_move, Move, MoveHistory, Position, PositionKey, Side};
use crate::execute::{GamePhase, MoveHints, MoveRequest};
use crate::protocol::{EngineCommand, EngineLine, GoParams, Score};
use crate::telemetry::TelemetryEntry;
use crate::worker::Role;

/// Evaluation bar bound, in centipawns.
pub const EVAL_CLAMP: i32 = 1000;

/// Candidates within this many centipawns of the best count towards complexity.
const COMPLEXITY_MARGIN: i32 = 50;

/// Decision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// The side this session plays.
    pub player: Side,
    pub depth: u32,
    /// MultiPV used in stealth mode; 1 otherwise.
    pub stealth_lines: u32,
    pub stealth_enabled: bool,
    pub stealth: StealthParams,
    pub auto_execute: bool,
    /// Engine command whose answer contains `Legal moves:`.
    pub legal_moves_command: String,
    /// Occurrences of a position at which undoing the last own move is avoided.
    pub repetition_threshold: u32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            player: Side::White,
            depth: 15,
            stealth_lines: 3,
            stealth_enabled: false,
            stealth: StealthParams::default(),
            auto_execute: false,
            legal_moves_command: "d".to_string(),
            repetition_threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingPosition,
    Evaluating,
    Deciding,
    AwaitingExecution,
}

/// Work the session must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Engine(EngineCommand),
    Execute(MoveRequest),
    Record(TelemetryEntry),
}

/// Changes reported to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    StatusChanged(String),
    PositionObserved {
        key: PositionKey,
        my_turn: bool,
        occurrences: u32,
    },
    MoveInferred {
        mv: Move,
        mover: Side,
        history_line: String,
    },
    EvalUpdated {
        score: Score,
        /// Score for the controlled side, clamped to the bar range.
        for_player: i32,
    },
    MoveChosen {
        mv: Move,
        rank: u32,
        score: i32,
        best_score: i32,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum RequestKind {
    Evaluate,
    /// Search restricted to moves other than the avoided reversal.
    Constrained,
    /// Legal-move query issued to avoid `avoided`; `fallback` is played when
    /// it turns out to be the only legal move.
    LegalMoves {
        avoided: Move,
        fallback: Vec<MoveCandidate>,
        chosen: MoveCandidate,
    },
}

#[derive(Debug, Clone)]
struct Request {
    key: PositionKey,
    kind: RequestKind,
    /// Sent before a game reset; its answer is read and dropped.
    stale: bool,
}

impl Request {
    fn new(key: PositionKey, kind: RequestKind) -> Self {
        Request {
            key,
            kind,
            stale: false,
        }
    }

    fn is_search(&self) -> bool {
        !matches!(self.kind, RequestKind::LegalMoves { .. })
    }
}

pub struct Coordinator<R: Rng> {
    config: DecisionConfig,
    rng: R,
    state: State,
    repetition: RepetitionTracker,
    history: MoveHistory,
    current: Option<Position>,
    /// Last position seen before a vision restart, kept for move inference.
    anchor: Option<Position>,
    outstanding: VecDeque<Request>,
    candidates: CandidateSet,
    last_own_move: Option<Move>,
    decisions: u32,
    evaluation_started: Option<Instant>,
    reevaluate_when_ready: bool,
    events: Vec<CoordinatorEvent>,
}

impl<R: Rng> Coordinator<R> {
    pub fn new(config: DecisionConfig, rng: R) -> Self {
        let repetition = RepetitionTracker::new(config.repetition_threshold);
        Coordinator {
            config,
            rng,
            state: State::Idle,
            repetition,
            history: MoveHistory::new(),
            current: None,
            anchor: None,
            outstanding: VecDeque::new(),
            candidates: CandidateSet::new(),
            last_own_move: None,
            decisions: 0,
            evaluation_started: None,
            reevaluate_when_ready: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn history(&self) -> &MoveHistory {
        &self.history
    }

    pub fn repetition(&self) -> &RepetitionTracker {
        &self.repetition
    }

    /// Key of the most recently observed position.
    pub fn current_key(&self) -> Option<PositionKey> {
        self.current.as_ref().map(Position::key)
    }

    /// Takes the queued events.
    pub fn drain_events(&mut self) -> Vec<CoordinatorEvent> {
        std::mem::take(&mut self.events)
    }

    fn status(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{}", msg);
        self.events.push(CoordinatorEvent::StatusChanged(msg));
    }

    /// Arms the capture loop.
    pub fn start(&mut self) {
        self.state = State::AwaitingPosition;
        self.status("Waiting for the board");
    }

    /// Forgets the game: repetition counts and history. Requests still in
    /// flight stay queued so their answers are matched up, but are ignored.
    pub fn reset(&mut self) {
        self.repetition.clear();
        self.history.clear();
        self.current = None;
        self.anchor = None;
        for request in &mut self.outstanding {
            request.stale = true;
        }
        self.candidates = CandidateSet::new();
        self.last_own_move = None;
        self.decisions = 0;
        self.evaluation_started = None;
        self.reevaluate_when_ready = false;
        self.state = State::Idle;
    }

    pub fn set_player(&mut self, side: Side) {
        self.config.player = side;
    }

    pub fn set_stealth(&mut self, enabled: bool) {
        self.config.stealth_enabled = enabled;
        self.status(format!("Stealth mode {}", if enabled { "on" } else { "off" }));
    }

    pub fn set_auto_execute(&mut self, enabled: bool) {
        self.config.auto_execute = enabled;
        self.status(format!("Auto-move {}", if enabled { "on" } else { "off" }));
    }

    fn evaluation_commands(&mut self, position: &Position) -> Vec<Directive> {
        let lines = if self.config.stealth_enabled {
            self.config.stealth_lines.max(1)
        } else {
            1
        };
        self.outstanding
            .push_back(Request::new(position.key(), RequestKind::Evaluate));
        self.evaluation_started = Some(Instant::now());
        self.state = State::Evaluating;
        vec![
            Directive::Engine(EngineCommand::multipv(lines)),
            Directive::Engine(EngineCommand::Position {
                fen: position.fen(),
            }),
            Directive::Engine(EngineCommand::Go(GoParams {
                depth: Some(self.config.depth),
                ..GoParams::default()
            })),
        ]
    }

    /// Handles a position reported by the vision worker.
    pub fn on_position(&mut self, position: Position) -> Vec<Directive> {
        let key = position.key();
        if self.current_key() == Some(key) {
            debug!("position unchanged");
            return Vec::new();
        }

        let previous = self.current.take().or_else(|| self.anchor.take());
        if let Some(prev) = previous {
            if let Some(mv) = infer_move(&prev.layout, &position.layout) {
                let mover = prev.side;
                let idx = self.history.push(mv, mover);
                let history_line = self.history.lines()[idx].clone();
                if mover == self.config.player {
                    self.last_own_move = Some(mv);
                }
                self.events.push(CoordinatorEvent::MoveInferred {
                    mv,
                    mover,
                    history_line,
                });
            }
        }

        let occurrences = self.repetition.record_observed(key);
        let my_turn = position.side == self.config.player;
        self.events.push(CoordinatorEvent::PositionObserved {
            key,
            my_turn,
            occurrences,
        });
        self.current = Some(position.clone());
        // A legal-move query is only useful for the position it was sent for.
        self.outstanding.retain(|r| r.is_search() || r.key == key);

        if my_turn {
            self.status("My turn, analysing");
            self.evaluation_commands(&position)
        } else {
            self.state = State::AwaitingPosition;
            self.status("Opponent's turn, waiting");
            Vec::new()
        }
    }

    /// Handles one parsed line of engine output.
    pub fn on_engine_line(&mut self, line: EngineLine) -> Vec<Directive> {
        match line {
            EngineLine::Info(info) => {
                let front = self
                    .outstanding
                    .iter()
                    .find(|r| r.is_search())
                    .map(|r| (r.key, r.stale));
                if let (Some(score), Some((key, false))) = (info.score, front) {
                    if info.multipv == 1 && Some(key) == self.current_key() {
                        self.emit_eval(score, key.side);
                    }
                }
                if front.is_some() {
                    self.candidates.record_info(&info);
                }
                Vec::new()
            }
            EngineLine::Policy { mv, probability } => {
                self.candidates.record_policy(mv, probability);
                Vec::new()
            }
            EngineLine::BestMove(best) => self.on_best_move(best),
            EngineLine::LegalMoves(moves) => self.on_legal_moves(moves),
            EngineLine::UciOk | EngineLine::ReadyOk | EngineLine::Other(_) => Vec::new(),
        }
    }

    fn emit_eval(&mut self, score: Score, side_to_move: Side) {
        let cp = match score {
            Score::Mate(n) if n > 0 => EVAL_CLAMP,
            Score::Mate(_) => -EVAL_CLAMP,
            Score::Centipawns(cp) => cp.clamp(-EVAL_CLAMP, EVAL_CLAMP),
        };
        let for_player = if side_to_move == self.config.player {
            cp
        } else {
            -cp
        };
        self.events.push(CoordinatorEvent::EvalUpdated { score, for_player });
    }

    fn take_request(&mut self, search: bool) -> Option<Request> {
        let idx = self.outstanding.iter().position(|r| r.is_search() == search)?;
        self.outstanding.remove(idx)
    }

    fn on_best_move(&mut self, best: Option<Move>) -> Vec<Directive> {
        let Some(request) = self.take_request(true) else {
            debug!("bestmove without an outstanding search");
            return Vec::new();
        };
        let candidates = std::mem::take(&mut self.candidates).ranked(best);

        if request.stale || Some(request.key) != self.current_key() {
            debug!("discarding stale result for {}", request.key);
            return Vec::new();
        }
        if self
            .outstanding
            .iter()
            .any(|r| r.is_search() && !r.stale && r.key == request.key)
        {
            debug!("newer request pending for the same position");
            return Vec::new();
        }

        self.state = State::Deciding;
        if candidates.is_empty() {
            self.state = State::AwaitingPosition;
            self.status("Engine reported no move");
            return Vec::new();
        }

        let chosen = self.choose(&candidates, best);
        if request.kind == RequestKind::Evaluate
            && self
                .repetition
                .would_reverse_under_repetition(chosen.mv, self.last_own_move, &request.key)
        {
            self.status(format!("Repetition: looking for an alternative to {}", chosen.mv));
            self.outstanding.push_back(Request::new(
                request.key,
                RequestKind::LegalMoves {
                    avoided: chosen.mv,
                    fallback: candidates,
                    chosen,
                },
            ));
            self.state = State::Evaluating;
            return vec![Directive::Engine(EngineCommand::LegalMoves {
                command: self.config.legal_moves_command.clone(),
            })];
        }

        self.finalize(chosen, &candidates, request.key)
    }

    fn on_legal_moves(&mut self, moves: Vec<Move>) -> Vec<Directive> {
        let Some(request) = self.take_request(false) else {
            debug!("legal moves without an outstanding query");
            return Vec::new();
        };
        if request.stale || Some(request.key) != self.current_key() {
            debug!("discarding stale legal moves for {}", request.key);
            return Vec::new();
        }
        let RequestKind::LegalMoves {
            avoided,
            fallback,
            chosen,
        } = request.kind
        else {
            return Vec::new();
        };

        let alternatives: Vec<Move> = moves
            .into_iter()
            .filter(|m| m.from != avoided.from || m.to != avoided.to)
            .collect();
        if alternatives.is_empty() {
            self.status(format!("{} is the only legal move", avoided));
            return self.finalize(chosen, &fallback, request.key);
        }

        self.outstanding
            .push_back(Request::new(request.key, RequestKind::Constrained));
        self.state = State::Evaluating;
        vec![Directive::Engine(EngineCommand::Go(GoParams {
            depth: Some(self.config.depth),
            movetime: None,
            searchmoves: alternatives,
        }))]
    }

    fn choose(&mut self, candidates: &[MoveCandidate], best: Option<Move>) -> MoveCandidate {
        let top = candidates
            .iter()
            .find(|c| Some(c.mv) == best)
            .unwrap_or(&candidates[0])
            .clone();
        if !self.config.stealth_enabled || candidates.len() < 2 {
            return top;
        }
        let best_score = best_score(candidates).unwrap_or(top.score);
        let fen = self.current.as_ref().map(Position::fen).unwrap_or_default();
        match pick_move(
            candidates,
            best_score,
            self.decisions + 1,
            &fen,
            &self.config.stealth,
            &mut self.rng,
        ) {
            Ok(c) => c.clone(),
            Err(e) => {
                warn!("{}", e);
                top
            }
        }
    }

    fn finalize(
        &mut self,
        chosen: MoveCandidate,
        candidates: &[MoveCandidate],
        key: PositionKey,
    ) -> Vec<Directive> {
        self.decisions += 1;
        let best = best_score(candidates).unwrap_or(chosen.score);
        let think_time_ms = self
            .evaluation_started
            .take()
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        let fen = self.current.as_ref().map(Position::fen).unwrap_or_default();

        self.events.push(CoordinatorEvent::MoveChosen {
            mv: chosen.mv,
            rank: chosen.rank,
            score: chosen.score,
            best_score: best,
        });
        let label = if chosen.rank > 1 {
            format!("Best move: {} (line {})", chosen.mv, chosen.rank)
        } else {
            format!("Best move: {}", chosen.mv)
        };
        self.status(label);

        let mut out = vec![Directive::Record(TelemetryEntry {
            timestamp: Utc::now(),
            fen,
            mv: chosen.mv.to_string(),
            rank: chosen.rank,
            eval_played: chosen.score,
            eval_best: best,
            cp_delta: best - chosen.score,
            think_time_ms,
            policy_prob: chosen.policy,
        })];

        if key.side == self.config.player && self.config.auto_execute {
            let hints = MoveHints {
                phase: GamePhase::from_layout(&key.layout),
                complexity: close_alternatives(candidates, COMPLEXITY_MARGIN),
                eval_pawns: best as f64 / 100.0,
            };
            out.push(Directive::Execute(MoveRequest {
                mv: chosen.mv,
                hints,
            }));
            self.state = State::AwaitingExecution;
        } else {
            self.state = State::AwaitingPosition;
        }
        out
    }

    /// The executor could not take the move; wait for the next position.
    pub fn on_execution_rejected(&mut self) {
        if self.state == State::AwaitingExecution {
            self.state = State::AwaitingPosition;
        }
    }

    /// The move worker finished.
    pub fn on_execution_finished(&mut self, mv: Move, success: bool) {
        self.state = State::AwaitingPosition;
        if success {
            self.status(format!("Played {}", mv));
        } else {
            self.status(format!("Move worker failed for {}", mv));
        }
    }

    /// A supervised worker crashed.
    pub fn on_worker_crashed(&mut self, role: Role) {
        match role {
            Role::Vision => {
                // The restarted worker reports the board again as a first frame.
                if let Some(pos) = self.current.take() {
                    self.repetition.adjust(pos.key(), -1);
                    self.anchor = Some(pos);
                }
            }
            Role::Engine => {
                self.outstanding.clear();
                self.candidates = CandidateSet::new();
                self.reevaluate_when_ready = true;
            }
        }
        self.state = State::Idle;
        self.status(format!("{} worker crashed, restarting", role));
    }

    /// A worker (re)started and reported healthy.
    pub fn on_worker_ready(&mut self, role: Role) -> Vec<Directive> {
        if self.state == State::Idle {
            self.state = State::AwaitingPosition;
        }
        if role != Role::Engine || !std::mem::take(&mut self.reevaluate_when_ready) {
            return Vec::new();
        }
        match self.current.clone() {
            Some(pos) if pos.side == self.config.player => {
                self.status("Engine back, re-evaluating");
                self.evaluation_commands(&pos)
            }
            _ => Vec::new(),
        }
    }
}
