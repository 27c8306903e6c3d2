//! Axis-aligned line transform.
//!
//! Boards on screen are never rotated, so only the two axis orientations are
//! voted on: every row (column) of the edge map is scanned for its longest
//! run of edge pixels, tolerating short gaps where pieces or grid corners
//! break the line. Adjacent rows that carry overlapping runs are merged into
//! one line.

use rayon::prelude::*;
use tracing::trace;

use super::edges::EdgeMap;

/// Maximum distance, in rows or columns, between pixels of one merged line.
const MERGE_DISTANCE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// A detected line: `pos` is its y (horizontal) or x (vertical) coordinate,
/// `start..=end` its extent along the other axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub orientation: Orientation,
    pub pos: f32,
    pub start: usize,
    pub end: usize,
}

impl Line {
    pub fn length(&self) -> usize {
        self.end - self.start + 1
    }

    /// Whether `self` and `other` (of the other orientation) cross within `tol` pixels.
    pub fn crosses(&self, other: &Line, tol: f32) -> bool {
        let within = |pos: f32, l: &Line| {
            pos >= l.start as f32 - tol && pos <= l.end as f32 + tol
        };
        self.orientation != other.orientation && within(other.pos, self) && within(self.pos, other)
    }
}

/// Longest run of `true` in `len` samples, allowing up to `gap` missing samples inside.
fn longest_run(len: usize, gap: usize, is_edge: impl Fn(usize) -> bool) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut current: Option<(usize, usize)> = None;

    for i in (0..len).filter(|&i| is_edge(i)) {
        current = match current {
            Some((s, e)) if i - e <= gap + 1 => Some((s, i)),
            _ => Some((i, i)),
        };
        if let Some((s, e)) = current {
            if best.map_or(true, |(bs, be)| e - s > be - bs) {
                best = Some((s, e));
            }
        }
    }
    best
}

/// Runs at least `min_len` long, one per scanned row (or column).
fn scan(edges: &EdgeMap, orientation: Orientation, min_len: usize, gap: usize) -> Vec<(usize, usize, usize)> {
    let (outer, inner) = match orientation {
        Orientation::Horizontal => (edges.height(), edges.width()),
        Orientation::Vertical => (edges.width(), edges.height()),
    };

    (0..outer)
        .into_par_iter()
        .filter_map(|o| {
            let (s, e) = match orientation {
                Orientation::Horizontal => longest_run(inner, gap, |i| edges.is_edge(i, o)),
                Orientation::Vertical => longest_run(inner, gap, |i| edges.is_edge(o, i)),
            }?;
            (e - s + 1 >= min_len).then_some((o, s, e))
        })
        .collect()
}

/// Detects lines of one orientation whose run covers at least `min_len` pixels.
pub fn detect_lines(edges: &EdgeMap, orientation: Orientation, min_len: usize, gap: usize) -> Vec<Line> {
    let runs = scan(edges, orientation, min_len.max(1), gap);

    let mut lines = Vec::new();
    // (first pos, last pos, pos sum, count, start, end)
    let mut group: Option<(usize, usize, usize, usize, usize, usize)> = None;
    for (pos, s, e) in runs {
        group = match group {
            Some((first, last, sum, n, gs, ge)) if pos - last <= MERGE_DISTANCE && s <= ge && e >= gs => {
                Some((first, pos, sum + pos, n + 1, gs.min(s), ge.max(e)))
            }
            Some(done) => {
                lines.push(finish(orientation, done));
                Some((pos, pos, pos, 1, s, e))
            }
            None => Some((pos, pos, pos, 1, s, e)),
        };
    }
    if let Some(done) = group {
        lines.push(finish(orientation, done));
    }

    trace!("{:?}: {} lines of length >= {}", orientation, lines.len(), min_len);
    lines
}

fn finish(orientation: Orientation, g: (usize, usize, usize, usize, usize, usize)) -> Line {
    let (_, _, sum, n, start, end) = g;
    Line {
        orientation,
        pos: sum as f32 / n as f32,
        start,
        end,
    }
}

/// Bounding box `(x0, y0, x1, y1)` of the outermost mutually crossing lines.
///
/// A line only counts when it crosses at least two lines of the other
/// orientation. Returns `None` when fewer than two lines of either
/// orientation survive.
pub fn grid_bounds(horizontal: &[Line], vertical: &[Line], tol: f32) -> Option<(f32, f32, f32, f32)> {
    let crossing = |lines: &[Line], others: &[Line]| -> Vec<Line> {
        lines
            .iter()
            .filter(|l| others.iter().filter(|o| l.crosses(o, tol)).count() >= 2)
            .copied()
            .collect()
    };
    let h = crossing(horizontal, vertical);
    let v = crossing(vertical, horizontal);
    if h.len() < 2 || v.len() < 2 {
        trace!("too few crossing lines: {} horizontal, {} vertical", h.len(), v.len());
        return None;
    }

    let min = |ls: &[Line]| ls.iter().map(|l| l.pos).fold(f32::INFINITY, f32::min);
    let max = |ls: &[Line]| ls.iter().map(|l| l.pos).fold(f32::NEG_INFINITY, f32::max);
    Some((min(&v), min(&h), max(&v), max(&h)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(size: usize, origin: usize, cell: usize) -> EdgeMap {
        EdgeMap::from_fn(size, size, |x, y| {
            let inside = |v: usize| v >= origin && v <= origin + 8 * cell;
            let on_line = |v: usize| inside(v) && (v - origin) % cell == 0;
            (on_line(x) && inside(y)) || (on_line(y) && inside(x))
        })
    }

    #[test]
    fn longest_run_bridges_small_gaps() {
        let row = [false, true, true, false, false, true, true, true, false, false, false, false, true];
        assert_eq!(longest_run(row.len(), 2, |i| row[i]), Some((1, 7)));
        assert_eq!(longest_run(row.len(), 0, |i| row[i]), Some((5, 7)));
        assert_eq!(longest_run(3, 5, |_| false), None);
    }

    #[test]
    fn detects_nine_lines_each_way() {
        let edges = grid(120, 10, 10);
        let h = detect_lines(&edges, Orientation::Horizontal, 40, 2);
        let v = detect_lines(&edges, Orientation::Vertical, 40, 2);
        assert_eq!(h.len(), 9);
        assert_eq!(v.len(), 9);
        assert_eq!(h[0].pos, 10.0);
        assert_eq!(h[8].pos, 90.0);
        assert_eq!((v[0].start, v[0].end), (10, 90));
    }

    #[test]
    fn adjacent_rows_merge_into_one_line() {
        let edges = EdgeMap::from_fn(50, 50, |x, y| (20..=21).contains(&y) && (5..45).contains(&x));
        let h = detect_lines(&edges, Orientation::Horizontal, 20, 0);
        assert_eq!(h.len(), 1);
        assert_eq!(h[0].pos, 20.5);
        assert_eq!(h[0].length(), 40);
    }

    #[test]
    fn bounds_of_grid() {
        let edges = grid(120, 10, 10);
        let h = detect_lines(&edges, Orientation::Horizontal, 40, 2);
        let v = detect_lines(&edges, Orientation::Vertical, 40, 2);
        assert_eq!(grid_bounds(&h, &v, 2.0), Some((10.0, 10.0, 90.0, 90.0)));
    }

    #[test]
    fn bounds_need_two_lines_per_orientation() {
        let edges = EdgeMap::from_fn(100, 100, |x, y| y == 50 || x == 30 || x == 70);
        let h = detect_lines(&edges, Orientation::Horizontal, 40, 0);
        let v = detect_lines(&edges, Orientation::Vertical, 40, 0);
        assert_eq!(h.len(), 1);
        assert_eq!(grid_bounds(&h, &v, 2.0), None);
    }
}
