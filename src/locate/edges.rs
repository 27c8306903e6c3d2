//! Edge extraction: grayscale, Gaussian blur, Sobel gradient magnitude and a
//! two-threshold hysteresis pass.

use image::{imageops, GrayImage, RgbaImage};
use rayon::prelude::*;

const SOBEL_GX: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const SOBEL_GY: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

/// Binary edge mask, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMap {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl EdgeMap {
    /// Builds a map by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        EdgeMap {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_edge(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.data[y * self.width + x]
    }

    /// Number of edge pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&e| e).count()
    }
}

/// Computes the Sobel magnitude (L1 norm) of every interior pixel.
fn gradient_magnitude(gray: &GrayImage) -> Vec<u16> {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    let raw = gray.as_raw();
    let mut mags = vec![0u16; width * height];
    if width < 3 || height < 3 {
        return mags;
    }

    mags.par_chunks_mut(width)
        .enumerate()
        .skip(1)
        .take(height - 2)
        .for_each(|(y, row)| {
            for x in 1..width - 1 {
                let mut gx = 0i32;
                let mut gy = 0i32;
                for ky in 0..3 {
                    for kx in 0..3 {
                        let p = raw[(y + ky - 1) * width + (x + kx - 1)] as i32;
                        gx += p * SOBEL_GX[ky][kx];
                        gy += p * SOBEL_GY[ky][kx];
                    }
                }
                row[x] = (gx.abs() + gy.abs()).min(u16::MAX as i32) as u16;
            }
        });
    mags
}

/// Keeps every pixel at or above `high`, plus pixels at or above `low` that
/// are 8-connected to one of those.
fn hysteresis(mags: &[u16], width: usize, height: usize, low: u16, high: u16) -> Vec<bool> {
    let mut out = vec![false; width * height];
    let mut stack: Vec<usize> = mags
        .iter()
        .enumerate()
        .filter(|(_, &m)| m >= high)
        .map(|(i, _)| i)
        .collect();
    for &i in &stack {
        out[i] = true;
    }

    while let Some(i) = stack.pop() {
        let x = i % width;
        let y = i / width;
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                let j = ny * width + nx;
                if !out[j] && mags[j] >= low {
                    out[j] = true;
                    stack.push(j);
                }
            }
        }
    }
    out
}

/// Extracts the edge map of an RGBA frame.
pub fn detect_edges(image: &RgbaImage, blur_sigma: f32, low: u16, high: u16) -> EdgeMap {
    let width = image.width() as usize;
    let height = image.height() as usize;
    if width == 0 || height == 0 {
        return EdgeMap::from_fn(0, 0, |_, _| false);
    }

    let gray = imageops::grayscale(image);
    let blurred = if blur_sigma > 0.0 {
        imageops::blur(&gray, blur_sigma)
    } else {
        gray
    };
    let mags = gradient_magnitude(&blurred);
    EdgeMap {
        width,
        height,
        data: hysteresis(&mags, width, height, low, high.max(low)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn flat_image_has_no_edges() {
        let img = RgbaImage::from_pixel(40, 30, Rgba([128, 128, 128, 255]));
        assert_eq!(detect_edges(&img, 1.0, 50, 150).count(), 0);
    }

    #[test]
    fn vertical_step_produces_a_column_of_edges() {
        let img = RgbaImage::from_fn(40, 30, |x, _| {
            if x < 20 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let edges = detect_edges(&img, 0.0, 50, 150);
        for y in 1..29 {
            assert!(edges.is_edge(19, y) || edges.is_edge(20, y), "row {}", y);
        }
        assert!(!edges.is_edge(5, 10));
        assert!(!edges.is_edge(35, 10));
    }

    #[test]
    fn weak_gradients_need_a_strong_neighbour() {
        let mags = vec![0, 60, 0, 0, 60, 200, 0, 0, 0];
        let out = hysteresis(&mags, 3, 3, 50, 150);
        assert!(out[5]);
        assert!(out[4]);
        assert!(out[1]);
        assert!(!out[0]);

        let isolated = vec![0, 60, 0, 0, 0, 0, 0, 0, 0];
        assert!(!hysteresis(&isolated, 3, 3, 50, 150)[1]);
    }
}
