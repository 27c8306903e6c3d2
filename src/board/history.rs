//! Numbered move history built from inferred moves.

use super::layout::Side;
use super::square::Move;

/// Move list in `1. e2e4 e7e5` form, one line per full move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveHistory {
    lines: Vec<String>,
}

impl MoveHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a move made by `mover`. A white move (or the very first move)
    /// opens a new numbered line; a black move extends the last one.
    /// Returns the index of the line that was written.
    pub fn push(&mut self, mv: Move, mover: Side) -> usize {
        if mover == Side::White || self.lines.is_empty() {
            let n = self.lines.len() + 1;
            self.lines.push(format!("{}. {}", n, mv));
        } else if let Some(last) = self.lines.last_mut() {
            last.push(' ');
            last.push_str(&mv.to_string());
        }
        self.lines.len() - 1
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Renders the whole history, one line per full move.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    #[test]
    fn white_then_black_share_a_line() {
        let mut h = MoveHistory::new();
        assert_eq!(h.push(mv("e2e4"), Side::White), 0);
        assert_eq!(h.push(mv("e7e5"), Side::Black), 0);
        assert_eq!(h.push(mv("g1f3"), Side::White), 1);
        assert_eq!(h.render(), "1. e2e4 e7e5\n2. g1f3");
    }

    #[test]
    fn black_first_opens_a_line() {
        let mut h = MoveHistory::new();
        h.push(mv("e7e5"), Side::Black);
        assert_eq!(h.lines(), &["1. e7e5".to_string()]);
        h.clear();
        assert!(h.lines().is_empty());
    }
}
