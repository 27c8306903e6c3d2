//! Screen capture boundary.
//!
//! The screen grabber itself lives outside the crate; a `FrameSource` only
//! has to hand back a full-screen raster on demand. `RegionFrameSource`
//! crops that raster to the board, scales it to the vision worker's input
//! size and writes it to disk for the worker to read.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::{debug, info};

use crate::locate::{locate_board, LocateConfig, Rect};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("no board region selected")]
    NoRegion,

    #[error("no chess board found on screen")]
    BoardNotFound,

    #[error("region {region} lies outside the {width}x{height} screen")]
    OutOfBounds { region: Rect, width: u32, height: u32 },

    #[error("screenshot command exited with {0}")]
    Command(std::process::ExitStatus),
}

/// Supplies full-screen rasters in physical pixels.
pub trait FrameSource {
    fn snapshot(&mut self) -> Result<RgbaImage, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn snapshot(&mut self) -> Result<RgbaImage, CaptureError> {
        (**self).snapshot()
    }
}

/// Reads the screen from an image file, optionally refreshing it first by
/// running an external screenshot command.
#[derive(Debug, Clone)]
pub struct FileScreen {
    path: PathBuf,
    refresh: Vec<String>,
}

impl FileScreen {
    /// `refresh` is a program followed by its arguments; empty means the file
    /// is kept up to date by someone else.
    pub fn new(path: impl Into<PathBuf>, refresh: Vec<String>) -> Self {
        FileScreen {
            path: path.into(),
            refresh,
        }
    }
}

impl FrameSource for FileScreen {
    fn snapshot(&mut self) -> Result<RgbaImage, CaptureError> {
        if let Some((program, args)) = self.refresh.split_first() {
            let status = Command::new(program).args(args).status()?;
            if !status.success() {
                return Err(CaptureError::Command(status));
            }
        }
        Ok(image::open(&self.path)?.to_rgba8())
    }
}

/// Crops screen snapshots to the board and writes square frames.
pub struct RegionFrameSource<S> {
    screen: S,
    frame_path: PathBuf,
    frame_size: u32,
    dpr: f64,
}

impl<S: FrameSource> RegionFrameSource<S> {
    pub fn new(screen: S, frame_path: impl Into<PathBuf>, frame_size: u32, dpr: f64) -> Self {
        RegionFrameSource {
            screen,
            frame_path: frame_path.into(),
            frame_size: frame_size.max(8),
            dpr: if dpr > 0.0 { dpr } else { 1.0 },
        }
    }

    pub fn frame_path(&self) -> &Path {
        &self.frame_path
    }

    /// Runs the board locator on a fresh snapshot.
    pub fn locate(&mut self, cfg: &LocateConfig) -> Result<Rect, CaptureError> {
        let screen = self.screen.snapshot()?;
        let found = locate_board(&screen, self.dpr, cfg).ok_or(CaptureError::BoardNotFound)?;
        info!("board located at {}", found);
        Ok(found)
    }

    /// Captures `region` (logical pixels) and writes it as the next frame.
    pub fn capture(&mut self, region: Option<Rect>) -> Result<PathBuf, CaptureError> {
        let region = region.ok_or(CaptureError::NoRegion)?;
        let screen = self.screen.snapshot()?;
        let frame = crop_frame(&screen, region, self.dpr, self.frame_size)?;
        frame.save(&self.frame_path)?;
        debug!("frame written to {}", self.frame_path.display());
        Ok(self.frame_path.clone())
    }
}

/// Cuts the logical `region` out of a physical-pixel `screen` and scales it
/// to `size` x `size`.
pub fn crop_frame(
    screen: &RgbaImage,
    region: Rect,
    dpr: f64,
    size: u32,
) -> Result<RgbaImage, CaptureError> {
    let phys = |v: u32| (v as f64 * dpr).round() as u32;
    let (x, y) = (phys(region.x), phys(region.y));
    let (w, h) = (phys(region.width), phys(region.height));
    if w == 0 || h == 0 || x >= screen.width() || y >= screen.height() {
        return Err(CaptureError::OutOfBounds {
            region,
            width: screen.width(),
            height: screen.height(),
        });
    }
    let w = w.min(screen.width() - x);
    let h = h.min(screen.height() - y);
    let cropped = imageops::crop_imm(screen, x, y, w, h).to_image();
    Ok(imageops::resize(&cropped, size, size, FilterType::Triangle))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns a fixed raster and counts snapshots.
    pub struct StaticScreen {
        pub image: RgbaImage,
        pub grabs: Arc<AtomicUsize>,
    }

    impl StaticScreen {
        pub fn new(image: RgbaImage) -> Self {
            StaticScreen {
                image,
                grabs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FrameSource for StaticScreen {
        fn snapshot(&mut self) -> Result<RgbaImage, CaptureError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            Ok(self.image.clone())
        }
    }
}
