//! Board representation.
//!
//! Squares, moves, piece layouts parsed from FEN placement strings, the
//! layout differ that infers which move happened between two snapshots,
//! and the running move history.

pub mod diff;
pub mod history;
pub mod layout;
pub mod square;

pub use diff::infer_move;
pub use history::MoveHistory;
pub use layout::{
    parse_layout, BoardLayout, LayoutError, Piece, PieceKind, Position, PositionKey, Side,
    START_LAYOUT,
};
pub use square::{Move, Square};
