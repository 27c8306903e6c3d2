//! Board layouts and positions.
//!
//! A board layout is the piece-placement field of a FEN string: eight
//! slash-separated ranks from rank 8 down to rank 1, with digits standing for
//! runs of empty squares. A `Position` adds the side to move and keeps the
//! remaining FEN fields verbatim so the engine receives what the vision
//! worker reported.

use std::fmt;
use std::str::FromStr;

/// Errors that can occur while parsing layouts, positions, squares and moves.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("expected 8 ranks separated by '/', got {0}")]
    WrongRankCount(usize),

    #[error("rank {rank} expands to {width} files, expected 8")]
    WrongRankWidth { rank: usize, width: usize },

    #[error("invalid piece character: '{0}'")]
    InvalidPiece(char),

    #[error("invalid side to move: '{0}'")]
    InvalidSide(String),

    #[error("missing side to move in '{0}'")]
    MissingSide(String),

    #[error("invalid square: '{0}'")]
    InvalidSquare(String),

    #[error("invalid move: '{0}'")]
    InvalidMove(String),
}

/// Piece or player colour; doubles as the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    #[serde(rename = "w")]
    White,
    #[serde(rename = "b")]
    Black,
}

impl Side {
    /// Returns the FEN character for this side.
    pub const fn fen_char(self) -> char {
        match self {
            Side::White => 'w',
            Side::Black => 'b',
        }
    }

    /// Returns the other side.
    pub const fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fen_char())
    }
}

impl FromStr for Side {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "w" => Ok(Side::White),
            "b" => Ok(Side::Black),
            other => Err(LayoutError::InvalidSide(other.to_string())),
        }
    }
}

/// The kind of a chess piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

/// A coloured piece occupying a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub side: Side,
    pub kind: PieceKind,
}

impl Piece {
    /// Parses a FEN piece letter; uppercase is white.
    pub fn from_fen_char(c: char) -> Option<Piece> {
        let kind = match c.to_ascii_lowercase() {
            'p' => PieceKind::Pawn,
            'n' => PieceKind::Knight,
            'b' => PieceKind::Bishop,
            'r' => PieceKind::Rook,
            'q' => PieceKind::Queen,
            'k' => PieceKind::King,
            _ => return None,
        };
        let side = if c.is_ascii_uppercase() {
            Side::White
        } else {
            Side::Black
        };
        Some(Piece { side, kind })
    }

    /// Returns the FEN piece letter.
    pub fn fen_char(self) -> char {
        let c = match self.kind {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        };
        match self.side {
            Side::White => c.to_ascii_uppercase(),
            Side::Black => c,
        }
    }
}

/// An 8x8 grid of cells, rank-major: `cells[0]` is rank 8, `cells[r][0]` the a-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardLayout {
    pub cells: [[Option<Piece>; 8]; 8],
}

impl BoardLayout {
    /// Returns a layout with every cell empty.
    pub fn empty() -> Self {
        BoardLayout {
            cells: [[None; 8]; 8],
        }
    }

    /// Returns the piece at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<Piece> {
        self.cells[row][col]
    }

    /// Number of occupied cells.
    pub fn piece_count(&self) -> usize {
        self.cells.iter().flatten().filter(|c| c.is_some()).count()
    }

    /// Encodes the layout back into slash-separated, run-length form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(72);
        for (r, rank) in self.cells.iter().enumerate() {
            if r > 0 {
                out.push('/');
            }
            let mut empty = 0u8;
            for cell in rank {
                match cell {
                    Some(p) => {
                        if empty > 0 {
                            out.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        out.push(p.fen_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push((b'0' + empty) as char);
            }
        }
        out
    }
}

impl fmt::Display for BoardLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for BoardLayout {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_layout(s)
    }
}

/// Parses a piece-placement string. Whitespace anywhere in the input is ignored.
pub fn parse_layout(s: &str) -> Result<BoardLayout, LayoutError> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let ranks: Vec<&str> = compact.split('/').collect();
    if ranks.len() != 8 {
        return Err(LayoutError::WrongRankCount(ranks.len()));
    }

    let mut layout = BoardLayout::empty();
    for (r, rank) in ranks.iter().enumerate() {
        let mut width = 0usize;
        for c in rank.chars() {
            if let Some(run) = c.to_digit(10) {
                if run == 0 || run > 8 {
                    return Err(LayoutError::InvalidPiece(c));
                }
                width += run as usize;
            } else {
                let piece = Piece::from_fen_char(c).ok_or(LayoutError::InvalidPiece(c))?;
                if width < 8 {
                    layout.cells[r][width] = Some(piece);
                }
                width += 1;
            }
        }
        if width != 8 {
            return Err(LayoutError::WrongRankWidth { rank: r, width });
        }
    }
    Ok(layout)
}

/// Layout plus side to move: the unit of repetition counting and staleness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub layout: BoardLayout,
    pub side: Side,
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.layout, self.side)
    }
}

/// A position as reported by the vision worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub layout: BoardLayout,
    pub side: Side,
    /// Castling, en-passant and clock fields, kept as received.
    pub rest: String,
}

impl Position {
    /// Parses `<layout> <side> [castling ep halfmove fullmove]`.
    pub fn parse(fen: &str) -> Result<Position, LayoutError> {
        let mut fields = fen.split_whitespace();
        let layout_field = fields
            .next()
            .ok_or_else(|| LayoutError::MissingSide(fen.to_string()))?;
        let layout = parse_layout(layout_field)?;
        let side: Side = fields
            .next()
            .ok_or_else(|| LayoutError::MissingSide(fen.to_string()))?
            .parse()?;
        let rest = fields.collect::<Vec<_>>().join(" ");
        Ok(Position { layout, side, rest })
    }

    /// Returns the repetition/staleness key of this position.
    pub fn key(&self) -> PositionKey {
        PositionKey {
            layout: self.layout,
            side: self.side,
        }
    }

    /// Full FEN suitable for `position fen`, filling in neutral fields when absent.
    pub fn fen(&self) -> String {
        if self.rest.is_empty() {
            format!("{} {} - - 0 1", self.layout, self.side)
        } else {
            format!("{} {} {}", self.layout, self.side, self.rest)
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen())
    }
}

/// Layout of the standard starting position.
pub const START_LAYOUT: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
