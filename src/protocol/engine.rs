//! Evaluation-engine line protocol.
//!
//! Serialises the commands sent to a UCI-style engine and parses the lines
//! it prints back. Unknown or malformed output is reported as
//! `EngineLine::Other` so the caller can skip it and carry on.

use std::fmt;

use tracing::warn;

use crate::board::Move;

/// Centipawn-equivalent magnitude assigned to a forced mate.
pub const MATE_SCORE: i32 = 10_000;

/// Longest mate distance accepted from engine output.
const MAX_MATE: i32 = 500;

/// An engine score from the side to move's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Mate in N moves; negative when the side to move is being mated.
    Mate(i32),
}

impl Score {
    /// Converts to centipawn-equivalent units; shorter mates score higher.
    pub fn centipawns(self) -> i32 {
        match self {
            Score::Centipawns(cp) => cp,
            Score::Mate(n) if n > 0 => MATE_SCORE - n,
            Score::Mate(n) => -MATE_SCORE - n,
        }
    }

    /// Human-readable form: pawns with two decimals, or `Mate in N`.
    pub fn display(self) -> String {
        match self {
            Score::Centipawns(cp) => format!("{:.2}", cp as f64 / 100.0),
            Score::Mate(n) => format!("Mate in {}", n),
        }
    }
}

/// Search constraints for `go`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoParams {
    pub depth: Option<u32>,
    pub movetime: Option<u64>,
    /// Restricts the search to these root moves when non-empty.
    pub searchmoves: Vec<Move>,
}

/// A command sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Uci,
    IsReady,
    NewGame,
    SetOption { name: String, value: String },
    Position { fen: String },
    Go(GoParams),
    Stop,
    /// Engine-specific query whose answer contains `Legal moves:`.
    LegalMoves { command: String },
    Quit,
}

impl EngineCommand {
    /// Shorthand for `setoption name MultiPV value <n>`.
    pub fn multipv(n: u32) -> EngineCommand {
        EngineCommand::SetOption {
            name: "MultiPV".to_string(),
            value: n.to_string(),
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Uci => f.write_str("uci"),
            EngineCommand::IsReady => f.write_str("isready"),
            EngineCommand::NewGame => f.write_str("ucinewgame"),
            EngineCommand::SetOption { name, value } => {
                write!(f, "setoption name {} value {}", name, value)
            }
            EngineCommand::Position { fen } => write!(f, "position fen {}", fen),
            EngineCommand::Go(params) => {
                f.write_str("go")?;
                if let Some(d) = params.depth {
                    write!(f, " depth {}", d)?;
                }
                if let Some(ms) = params.movetime {
                    write!(f, " movetime {}", ms)?;
                }
                if !params.searchmoves.is_empty() {
                    f.write_str(" searchmoves")?;
                    for mv in &params.searchmoves {
                        write!(f, " {}", mv)?;
                    }
                }
                Ok(())
            }
            EngineCommand::Stop => f.write_str("stop"),
            EngineCommand::LegalMoves { command } => f.write_str(command),
            EngineCommand::Quit => f.write_str("quit"),
        }
    }
}

/// Fields of an `info` line relevant to move selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    /// 1-based principal-variation index; engines omit it when MultiPV is 1.
    pub multipv: u32,
    pub score: Option<Score>,
    /// First move of the principal variation.
    pub pv: Option<Move>,
}

/// A parsed line of engine output.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    Info(InfoLine),
    /// `bestmove <m>`; `None` when the engine reports no legal move.
    BestMove(Option<Move>),
    LegalMoves(Vec<Move>),
    /// `info string policy <move> <p>` annotation.
    Policy { mv: Move, probability: f64 },
    UciOk,
    ReadyOk,
    Other(String),
}

/// Parses one line of engine output. Returns `None` for blank lines.
pub fn parse_engine_line(line: &str) -> Option<EngineLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(idx) = trimmed.find("Legal moves:") {
        let list = &trimmed[idx + "Legal moves:".len()..];
        let moves = list.split_whitespace().filter_map(Move::parse_uci).collect();
        return Some(EngineLine::LegalMoves(moves));
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let line = match tokens[0] {
        "uciok" => EngineLine::UciOk,
        "readyok" => EngineLine::ReadyOk,
        "bestmove" => EngineLine::BestMove(tokens.get(1).and_then(|t| Move::parse_uci(t))),
        "info" if tokens.get(1) == Some(&"string") => parse_info_string(&tokens, trimmed),
        "info" => parse_info(&tokens, trimmed),
        _ => EngineLine::Other(trimmed.to_string()),
    };
    Some(line)
}

/// Parses `info [depth n] [multipv k] [score cp|mate n] ... [pv m ...]`.
fn parse_info(tokens: &[&str], raw: &str) -> EngineLine {
    let mut info = InfoLine {
        depth: None,
        multipv: 1,
        score: None,
        pv: None,
    };

    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                info.depth = tokens.get(i + 1).and_then(|t| t.parse().ok());
                i += 1;
            }
            "multipv" => {
                match tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok()) {
                    Some(k) if k >= 1 => info.multipv = k,
                    _ => {
                        warn!("malformed multipv in engine line: {}", raw);
                        return EngineLine::Other(raw.to_string());
                    }
                }
                i += 1;
            }
            "score" => {
                let kind = tokens.get(i + 1).copied();
                let value = tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok());
                info.score = match (kind, value) {
                    (Some("cp"), Some(v)) => {
                        Some(Score::Centipawns(v.clamp(-MATE_SCORE, MATE_SCORE)))
                    }
                    (Some("mate"), Some(v)) => Some(Score::Mate(v.clamp(-MAX_MATE, MAX_MATE))),
                    _ => {
                        warn!("malformed score in engine line: {}", raw);
                        return EngineLine::Other(raw.to_string());
                    }
                };
                i += 2;
            }
            "pv" => {
                info.pv = tokens.get(i + 1).and_then(|t| Move::parse_uci(t));
                break;
            }
            _ => {}
        }
        i += 1;
    }

    EngineLine::Info(info)
}

/// Parses `info string ...`; only the policy annotation is structured.
fn parse_info_string(tokens: &[&str], raw: &str) -> EngineLine {
    if tokens.get(2) == Some(&"policy") {
        let mv = tokens.get(3).and_then(|t| Move::parse_uci(t));
        let p = tokens.get(4).and_then(|t| t.parse::<f64>().ok());
        if let (Some(mv), Some(probability)) = (mv, p) {
            if (0.0..=1.0).contains(&probability) {
                return EngineLine::Policy { mv, probability };
            }
        }
        warn!("malformed policy annotation: {}", raw);
    }
    EngineLine::Other(raw.to_string())
}
