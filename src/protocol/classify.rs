//! Worker output classification.
//!
//! Both workers print free-form lines. `classify_line` turns each one into a
//! tagged `WorkerLine` so a single dispatcher can act on it.

use tracing::warn;

use super::engine::{parse_engine_line, EngineLine};
use crate::board::Position;

/// Prefix of a successful vision result.
pub const FEN_TAG: &str = "[FEN]";
/// Vision worker saw the same frame again; state must not change.
pub const SKIP_TAG: &str = "[skip]";
/// Prefix of a worker-reported failure.
pub const ERROR_TAG: &str = "[error]";

/// A classified line of worker output.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerLine {
    PositionUpdate(Position),
    Engine(EngineLine),
    Ready,
    Error(String),
    Skip,
    Unrecognized(String),
}

impl WorkerLine {
    /// Whether this line shows that the worker came up and is responding.
    pub fn is_healthy_signal(&self) -> bool {
        matches!(
            self,
            WorkerLine::Ready
                | WorkerLine::Engine(EngineLine::UciOk)
                | WorkerLine::Engine(EngineLine::ReadyOk)
        )
    }
}

/// Classifies one line. Returns `None` for blank lines.
pub fn classify_line(line: &str) -> Option<WorkerLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix(FEN_TAG) {
        return Some(match Position::parse(rest) {
            Ok(pos) => WorkerLine::PositionUpdate(pos),
            Err(e) => {
                warn!("unparseable position from vision worker ({}): {}", e, trimmed);
                WorkerLine::Unrecognized(trimmed.to_string())
            }
        });
    }
    if trimmed == SKIP_TAG {
        return Some(WorkerLine::Skip);
    }
    if let Some(msg) = trimmed.strip_prefix(ERROR_TAG) {
        return Some(WorkerLine::Error(msg.trim().to_string()));
    }
    if trimmed == "ready" {
        return Some(WorkerLine::Ready);
    }

    Some(match parse_engine_line(trimmed)? {
        EngineLine::Other(raw) => WorkerLine::Unrecognized(raw),
        engine => WorkerLine::Engine(engine),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Side, START_LAYOUT};

    #[test]
    fn classify_vision_lines() {
        match classify_line(&format!("[FEN] {} b KQkq - 0 1", START_LAYOUT)) {
            Some(WorkerLine::PositionUpdate(pos)) => {
                assert_eq!(pos.side, Side::Black);
                assert_eq!(pos.layout.encode(), START_LAYOUT);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(classify_line("[skip]"), Some(WorkerLine::Skip));
        assert_eq!(classify_line("ready\n"), Some(WorkerLine::Ready));
        assert_eq!(
            classify_line("[error] model not loaded"),
            Some(WorkerLine::Error("model not loaded".to_string()))
        );
    }

    #[test]
    fn malformed_position_is_unrecognized() {
        assert!(matches!(
            classify_line("[FEN] 8/8/8 w"),
            Some(WorkerLine::Unrecognized(_))
        ));
        assert!(matches!(
            classify_line(&format!("[FEN] {}", START_LAYOUT)),
            Some(WorkerLine::Unrecognized(_))
        ));
    }

    #[test]
    fn engine_lines_pass_through() {
        assert_eq!(
            classify_line("readyok"),
            Some(WorkerLine::Engine(EngineLine::ReadyOk))
        );
        assert!(matches!(
            classify_line("bestmove e2e4"),
            Some(WorkerLine::Engine(EngineLine::BestMove(Some(_))))
        ));
        assert!(matches!(
            classify_line("id name Stockfish"),
            Some(WorkerLine::Unrecognized(_))
        ));
        assert_eq!(classify_line(""), None);
    }

    #[test]
    fn healthy_signals() {
        assert!(WorkerLine::Ready.is_healthy_signal());
        assert!(WorkerLine::Engine(EngineLine::UciOk).is_healthy_signal());
        assert!(!WorkerLine::Skip.is_healthy_signal());
        assert!(!WorkerLine::Error("x".into()).is_healthy_signal());
    }
}
