//! Board localisation.
//!
//! Finds the axis-aligned rectangle of an 8x8 board in a screen image. Two
//! detectors share one edge map:
//!
//! - contours: connected edge regions whose bounding box is roughly square
//!   and large enough, scored by how many long grid lines run inside them
//! - lines: long horizontal and vertical lines, bounded by the outermost
//!   ones that cross each other
//!
//! Results are divided by the device pixel ratio so they are in logical
//! screen coordinates.

pub mod contours;
pub mod edges;
pub mod lines;

use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use contours::{find_regions, Region};
pub use edges::{detect_edges, EdgeMap};
pub use lines::{detect_lines, grid_bounds, Line, Orientation};

/// An axis-aligned rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Divides every coordinate by `dpr`, rounding to the nearest pixel.
    pub fn scaled(&self, dpr: f64) -> Rect {
        if dpr <= 0.0 || (dpr - 1.0).abs() < f64::EPSILON {
            return *self;
        }
        let s = |v: u32| (v as f64 / dpr).round() as u32;
        Rect::new(s(self.x), s(self.y), s(self.width), s(self.height))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Which detector(s) to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Contours first, line bounds when no region qualifies.
    #[default]
    Auto,
    Contours,
    Lines,
}

/// Detector thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocateConfig {
    pub strategy: Strategy,
    pub blur_sigma: f32,
    pub low_threshold: u16,
    pub high_threshold: u16,
    /// Minimum bounding-box area in physical pixels.
    pub min_area: u64,
    pub min_aspect: f64,
    pub max_aspect: f64,
    /// Minimum line length as a fraction of the shorter image side.
    pub min_line_fraction: f32,
    /// Missing pixels tolerated inside one line.
    pub gap_tolerance: usize,
}

impl Default for LocateConfig {
    fn default() -> Self {
        LocateConfig {
            strategy: Strategy::Auto,
            blur_sigma: 1.0,
            low_threshold: 50,
            high_threshold: 150,
            min_area: 10_000,
            min_aspect: 0.8,
            max_aspect: 1.2,
            min_line_fraction: 0.2,
            gap_tolerance: 6,
        }
    }
}

impl LocateConfig {
    fn accepts(&self, width: f64, height: f64) -> bool {
        if width <= 0.0 || height <= 0.0 {
            return false;
        }
        let aspect = width / height;
        aspect >= self.min_aspect && aspect <= self.max_aspect && width * height > self.min_area as f64
    }
}

/// Number of detected lines that lie inside `r` and span at least half of it.
fn grid_score(r: &Region, horizontal: &[Line], vertical: &[Line]) -> usize {
    let inside = |l: &Line, lo: usize, hi: usize, from: usize, to: usize| {
        let span = (to - from + 1) as f32;
        let overlap = l.end.min(to) as f32 - l.start.max(from) as f32 + 1.0;
        l.pos >= lo as f32 && l.pos <= hi as f32 && overlap >= span / 2.0
    };
    horizontal
        .iter()
        .filter(|l| inside(l, r.min_y, r.max_y, r.min_x, r.max_x))
        .count()
        + vertical
            .iter()
            .filter(|l| inside(l, r.min_x, r.max_x, r.min_y, r.max_y))
            .count()
}

fn by_contours(edges: &EdgeMap, h: &[Line], v: &[Line], cfg: &LocateConfig) -> Option<Rect> {
    let best = find_regions(edges)
        .into_iter()
        .filter(|r| cfg.accepts(r.width() as f64, r.height() as f64))
        .max_by_key(|r| (grid_score(r, h, v), r.area()))?;
    debug!(
        "contour candidate {}x{} at ({}, {})",
        best.width(),
        best.height(),
        best.min_x,
        best.min_y
    );
    Some(Rect::new(
        best.min_x as u32,
        best.min_y as u32,
        best.width() as u32,
        best.height() as u32,
    ))
}

fn by_lines(h: &[Line], v: &[Line], cfg: &LocateConfig) -> Option<Rect> {
    let (x0, y0, x1, y1) = grid_bounds(h, v, cfg.gap_tolerance as f32)?;
    let (w, hgt) = (x1 - x0, y1 - y0);
    if !cfg.accepts(w as f64, hgt as f64) {
        debug!("line bounds {:.0}x{:.0} rejected", w, hgt);
        return None;
    }
    Some(Rect::new(
        x0.round() as u32,
        y0.round() as u32,
        w.round() as u32,
        hgt.round() as u32,
    ))
}

/// Locates the board in `image`, returning its rectangle in logical pixels.
///
/// Returns `None` when no candidate passes the aspect and area thresholds.
pub fn locate_board(image: &RgbaImage, dpr: f64, cfg: &LocateConfig) -> Option<Rect> {
    let edges = detect_edges(image, cfg.blur_sigma, cfg.low_threshold, cfg.high_threshold);
    if edges.count() == 0 {
        debug!("no edges in {}x{} frame", image.width(), image.height());
        return None;
    }

    let shorter = edges.width().min(edges.height()) as f32;
    let min_len = (shorter * cfg.min_line_fraction).round() as usize;
    let h = detect_lines(&edges, Orientation::Horizontal, min_len, cfg.gap_tolerance);
    let v = detect_lines(&edges, Orientation::Vertical, min_len, cfg.gap_tolerance);
    debug!("{} horizontal and {} vertical lines", h.len(), v.len());

    let found = match cfg.strategy {
        Strategy::Contours => by_contours(&edges, &h, &v, cfg),
        Strategy::Lines => by_lines(&h, &v, cfg),
        Strategy::Auto => by_contours(&edges, &h, &v, cfg).or_else(|| by_lines(&h, &v, cfg)),
    };
    found.map(|r| r.scaled(dpr))
}
