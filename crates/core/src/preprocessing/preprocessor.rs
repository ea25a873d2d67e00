use image::GrayImage;
use thiserror::Error;

use crate::preprocessing::clahe::Clahe;
use crate::shared::frame::Frame;

const BILATERAL_WINDOW: u32 = 9;
const BILATERAL_SIGMA_COLOR: f32 = 75.0;
const BILATERAL_SIGMA_SPACE: f32 = 75.0;
const CLAHE_GRID: u32 = 8;
const CLAHE_CLIP_LIMIT: f64 = 2.0;

/// How much work goes into turning a color frame into the grayscale image
/// the classifiers see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreprocessMode {
    /// Grayscale + global histogram equalization.
    Base,
    /// Base + bilateral smoothing + CLAHE + min/max normalization.
    Enhanced,
    /// Grayscale + min/max normalization.
    Normalized,
    /// Grayscale only.
    Plain,
}

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("frame has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("unsupported channel count: {0}")]
    Channels(u8),
    #[error("frame buffer of {actual} bytes does not match {width}x{height}x{channels}")]
    BufferMismatch {
        width: u32,
        height: u32,
        channels: u8,
        actual: usize,
    },
}

pub struct Preprocessor {
    clahe: Clahe,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            clahe: Clahe::new(CLAHE_GRID, CLAHE_CLIP_LIMIT),
        }
    }

    pub fn preprocess(&self, frame: &Frame, mode: PreprocessMode) -> Result<GrayImage, PreprocessError> {
        let gray = to_grayscale(frame)?;
        Ok(match mode {
            PreprocessMode::Plain => gray,
            PreprocessMode::Normalized => normalize_min_max(gray),
            PreprocessMode::Base => imageproc::contrast::equalize_histogram(&gray),
            PreprocessMode::Enhanced => {
                let equalized = imageproc::contrast::equalize_histogram(&gray);
                let smoothed = smooth_edge_preserving(&equalized);
                normalize_min_max(self.clahe.apply(&smoothed))
            }
        })
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

/// BT.601 luma, the weighting the cascade models were trained against.
pub fn to_grayscale(frame: &Frame) -> Result<GrayImage, PreprocessError> {
    let (width, height, channels) = (frame.width(), frame.height(), frame.channels());
    if frame.is_empty() {
        return Err(PreprocessError::Empty { width, height });
    }
    let expected = width as usize * height as usize * channels as usize;
    let data = frame.data();
    if data.len() != expected {
        return Err(PreprocessError::BufferMismatch {
            width,
            height,
            channels,
            actual: data.len(),
        });
    }

    let luma: Vec<u8> = match channels {
        1 => data.to_vec(),
        3 | 4 => data
            .chunks_exact(channels as usize)
            .map(|px| {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((r * 299 + g * 587 + b * 114 + 500) / 1000) as u8
            })
            .collect(),
        other => return Err(PreprocessError::Channels(other)),
    };

    GrayImage::from_raw(width, height, luma).ok_or(PreprocessError::BufferMismatch {
        width,
        height,
        channels,
        actual: data.len(),
    })
}

/// Bilateral smoothing: flattens sensor noise while keeping strong edges.
pub fn smooth_edge_preserving(gray: &GrayImage) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    imageproc::filter::bilateral_filter(
        gray,
        BILATERAL_WINDOW,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    )
}

/// Linearly stretches intensities so the darkest pixel becomes 0 and the
/// brightest 255. A flat image is returned unchanged.
pub fn normalize_min_max(mut gray: GrayImage) -> GrayImage {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if max <= min {
        return gray;
    }
    let scale = 255.0 / (max - min) as f32;
    for p in gray.pixels_mut() {
        p[0] = ((p[0] - min) as f32 * scale).round() as u8;
    }
    gray
}
