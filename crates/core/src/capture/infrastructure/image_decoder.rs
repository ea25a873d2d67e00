use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum ImageDecodeError {
    #[error("image data is empty")]
    Empty,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has no pixels")]
    NoPixels,
}

/// Decodes an uploaded image (any format the `image` crate recognizes)
/// into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, ImageDecodeError> {
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ImageDecodeError::NoPixels);
    }
    Ok(Frame::from_rgb_image(rgb, 0))
}

pub fn read_image(path: &Path) -> Result<Frame, ImageDecodeError> {
    let bytes = std::fs::read(path).map_err(|e| ImageDecodeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    decode_image(&bytes)
}
