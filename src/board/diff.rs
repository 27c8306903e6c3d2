//! Move inference from two consecutive layouts.
//!
//! Scans all 64 cells in rank-major order and classifies each changed cell:
//!
//! - vacated (piece -> empty): origin candidate
//! - occupied (empty -> piece): destination
//! - changed (piece -> other piece): destination, and provisional origin
//!
//! The first vacated cell is the origin. A changed cell only supplies the
//! origin when nothing was vacated. The last occupied or changed cell is the
//! destination. Castling on the queen side and en-passant captures touch
//! more than two squares and can be misreported; callers use the result for
//! history only.

use super::layout::BoardLayout;
use super::square::{Move, Square};

/// Infers the move that turned `prev` into `curr`, or `None` when the layouts
/// are identical or no origin/destination pair can be derived.
pub fn infer_move(prev: &BoardLayout, curr: &BoardLayout) -> Option<Move> {
    let mut vacated: Option<Square> = None;
    let mut provisional: Option<Square> = None;
    let mut to: Option<Square> = None;

    for row in 0..8 {
        for col in 0..8 {
            let before = prev.get(row, col);
            let after = curr.get(row, col);
            if before == after {
                continue;
            }
            let sq = Square::from_grid(row, col);
            match (before, after) {
                (Some(_), None) => {
                    if vacated.is_none() {
                        vacated = Some(sq);
                    }
                }
                (None, Some(_)) => to = Some(sq),
                (Some(_), Some(_)) => {
                    to = Some(sq);
                    if provisional.is_none() {
                        provisional = Some(sq);
                    }
                }
                (None, None) => {}
            }
        }
    }

    let from = vacated.or(provisional)?;
    Some(Move::new(from, to?))
}
