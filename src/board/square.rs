//! Squares and moves in long algebraic (UCI) notation.
//!
//! A `Square` is addressed by file `a..h` and rank `1..8`. Grid helpers map
//! squares to the rank-major cell order used by `BoardLayout`, where row 0
//! is rank 8 and column 0 is the a-file.

use std::fmt;
use std::str::FromStr;

use super::layout::LayoutError;

/// A single square on the 8x8 board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square {
    /// File index, 0 = a-file.
    pub file: u8,
    /// Rank index, 0 = first rank.
    pub rank: u8,
}

impl Square {
    /// Creates a square from zero-based file and rank indices.
    pub fn new(file: u8, rank: u8) -> Option<Square> {
        if file < 8 && rank < 8 {
            Some(Square { file, rank })
        } else {
            None
        }
    }

    /// Returns the square stored at `(row, col)` of a rank-major grid.
    pub fn from_grid(row: usize, col: usize) -> Square {
        Square {
            file: col as u8,
            rank: 7 - row as u8,
        }
    }

    /// Returns the `(row, col)` grid coordinates of this square.
    pub fn grid(self) -> (usize, usize) {
        (7 - self.rank as usize, self.file as usize)
    }

    /// Returns the file letter, `'a'..='h'`.
    pub fn file_char(self) -> char {
        (b'a' + self.file) as char
    }

    /// Returns the rank digit, `'1'..='8'`.
    pub fn rank_char(self) -> char {
        (b'1' + self.rank) as char
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.file_char(), self.rank_char())
    }
}

impl FromStr for Square {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(LayoutError::InvalidSquare(s.to_string()));
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or_else(|| LayoutError::InvalidSquare(s.to_string()))
    }
}

/// A move from one square to another, with an optional promotion piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<char>,
}

impl Move {
    /// Creates a non-promoting move.
    pub fn new(from: Square, to: Square) -> Move {
        Move {
            from,
            to,
            promotion: None,
        }
    }

    /// Returns the move with origin and destination swapped.
    pub fn inverse(self) -> Move {
        Move::new(self.to, self.from)
    }

    /// True when `self` goes exactly back along `other` (destination/origin swapped).
    pub fn reverses(self, other: Move) -> bool {
        self.from == other.to && self.to == other.from
    }

    /// Parses a UCI move, returning `None` for `0000`, `(none)` and other non-moves.
    pub fn parse_uci(s: &str) -> Option<Move> {
        s.parse().ok()
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p)?;
        }
        Ok(())
    }
}

impl FromStr for Move {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() || (s.len() != 4 && s.len() != 5) {
            return Err(LayoutError::InvalidMove(s.to_string()));
        }
        let from: Square = s[0..2]
            .parse()
            .map_err(|_| LayoutError::InvalidMove(s.to_string()))?;
        let to: Square = s[2..4]
            .parse()
            .map_err(|_| LayoutError::InvalidMove(s.to_string()))?;
        let promotion = match s[4..].chars().next() {
            None => None,
            Some(c @ ('q' | 'r' | 'b' | 'n')) => Some(c),
            Some(_) => return Err(LayoutError::InvalidMove(s.to_string())),
        };
        Ok(Move {
            from,
            to,
            promotion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_parse_and_display() {
        let sq: Square = "e2".parse().unwrap();
        assert_eq!(sq, Square { file: 4, rank: 1 });
        assert_eq!(sq.to_string(), "e2");
        assert!("i1".parse::<Square>().is_err());
        assert!("a9".parse::<Square>().is_err());
        assert!("a".parse::<Square>().is_err());
    }

    #[test]
    fn grid_mapping_is_rank_major() {
        assert_eq!(Square::from_grid(0, 0).to_string(), "a8");
        assert_eq!(Square::from_grid(7, 7).to_string(), "h1");
        let e4: Square = "e4".parse().unwrap();
        assert_eq!(e4.grid(), (4, 4));
        assert_eq!(Square::from_grid(4, 4), e4);
    }

    #[test]
    fn move_parse_with_promotion() {
        let mv: Move = "e7e8q".parse().unwrap();
        assert_eq!(mv.promotion, Some('q'));
        assert_eq!(mv.to_string(), "e7e8q");
        assert!("e7e8k".parse::<Move>().is_err());
        assert!("e7e".parse::<Move>().is_err());
        assert_eq!(Move::parse_uci("0000"), None);
        assert_eq!(Move::parse_uci("(none)"), None);
    }

    #[test]
    fn inverse_and_reverses() {
        let mv: Move = "g1f3".parse().unwrap();
        assert_eq!(mv.inverse().to_string(), "f3g1");
        assert!(mv.inverse().reverses(mv));
        let other: Move = "f3e5".parse().unwrap();
        assert!(!other.reverses(mv));
    }
}
