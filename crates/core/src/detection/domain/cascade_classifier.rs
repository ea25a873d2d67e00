use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::face_box::FaceBox;

/// Parameters for one multi-scale cascade invocation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Image pyramid step between scales; must be > 1.
    pub scale_factor: f64,
    /// Overlapping raw hits required before a window is reported.
    pub min_neighbors: u32,
    /// Smallest square face edge, in pixels.
    pub min_size: u32,
    /// The image was mirrored horizontally before detection.
    #[serde(default)]
    pub flipped: bool,
}

impl DetectionParams {
    pub const fn new(scale_factor: f64, min_neighbors: u32, min_size: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size,
            flipped: false,
        }
    }

    pub fn mirrored(self) -> Self {
        Self {
            flipped: true,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(self.scale_factor > 1.0) {
            return Err(ParamsError::ScaleFactor(self.scale_factor));
        }
        if self.min_size == 0 {
            return Err(ParamsError::MinSize);
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ParamsError {
    #[error("scale_factor must be greater than 1, got {0}")]
    ScaleFactor(f64),
    #[error("min_size must be greater than 0")]
    MinSize,
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("classifier backend failed: {0}")]
    Backend(String),
    #[error("image buffer does not match {width}x{height}")]
    InvalidImage { width: u32, height: u32 },
}

/// One pretrained boosted-cascade model.
///
/// Implementations are deterministic for identical input and may return
/// overlapping boxes. Mirroring is the caller's job: when `params.flipped`
/// is set the caller has already flipped `gray` and will reflect the
/// returned boxes back.
pub trait CascadeClassifier: Send {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceBox>, DetectError>;
}
