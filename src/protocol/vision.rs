//! Requests understood by the vision worker.

use std::fmt;
use std::path::PathBuf;

use crate::board::Side;

/// A line sent to the vision worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionRequest {
    /// Analyse the frame stored at this path.
    Frame(PathBuf),
    /// Out-of-band colour selection, accepted at any time.
    Color(Side),
}

impl fmt::Display for VisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisionRequest::Frame(path) => write!(f, "{}", path.display()),
            VisionRequest::Color(side) => write!(f, "[color] {}", side),
        }
    }
}
