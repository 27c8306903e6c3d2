//! Connected edge regions.
//!
//! Every 8-connected group of edge pixels is one region; its bounding box is
//! the bounding box of the region's outer contour.

use super::edges::EdgeMap;

/// Inclusive pixel bounds of one connected edge region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
    pub pixels: usize,
}

impl Region {
    pub fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// Width over height.
    pub fn aspect(&self) -> f64 {
        self.width() as f64 / self.height() as f64
    }
}

/// Labels the connected regions of `edges`, in scan order of their first pixel.
pub fn find_regions(edges: &EdgeMap) -> Vec<Region> {
    let (w, h) = (edges.width(), edges.height());
    let mut seen = vec![false; w * h];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if seen[y * w + x] || !edges.is_edge(x, y) {
                continue;
            }
            let mut r = Region {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixels: 0,
            };
            seen[y * w + x] = true;
            stack.push((x, y));

            while let Some((cx, cy)) = stack.pop() {
                r.pixels += 1;
                r.min_x = r.min_x.min(cx);
                r.max_x = r.max_x.max(cx);
                r.min_y = r.min_y.min(cy);
                r.max_y = r.max_y.max(cy);

                for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        let j = ny * w + nx;
                        if !seen[j] && edges.is_edge(nx, ny) {
                            seen[j] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
            regions.push(r);
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separate_outlines_are_separate_regions() {
        // A 20x20 square outline and a diagonal stroke far from it.
        let edges = EdgeMap::from_fn(60, 60, |x, y| {
            let square = (5..25).contains(&x)
                && (5..25).contains(&y)
                && (x == 5 || x == 24 || y == 5 || y == 24);
            let stroke = (40..50).contains(&x) && y == x;
            square || stroke
        });
        let regions = find_regions(&edges);
        assert_eq!(regions.len(), 2);

        let sq = regions[0];
        assert_eq!((sq.min_x, sq.min_y, sq.max_x, sq.max_y), (5, 5, 24, 24));
        assert_eq!(sq.area(), 400);
        assert_eq!(sq.pixels, 76);
        assert!((sq.aspect() - 1.0).abs() < 1e-9);

        let stroke = regions[1];
        assert_eq!((stroke.min_x, stroke.max_x), (40, 49));
        assert_eq!(stroke.pixels, 10);
    }

    #[test]
    fn empty_map_has_no_regions() {
        assert!(find_regions(&EdgeMap::from_fn(10, 10, |_, _| false)).is_empty());
        assert!(find_regions(&EdgeMap::from_fn(0, 0, |_, _| false)).is_empty());
    }
}
