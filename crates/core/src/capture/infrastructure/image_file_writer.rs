use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum ImageWriteError {
    #[error("frame is not a {width}x{height} RGB image")]
    NotRgb { width: u32, height: u32 },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Writes a frame to an image file using the `image` crate; the format
/// follows the file extension.
///
/// The image is encoded next to the destination and renamed into place, so
/// a concurrent reader never sees a half-written snapshot.
pub struct ImageFileWriter;

impl ImageFileWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn write(&self, path: &Path, frame: &Frame) -> Result<(), ImageWriteError> {
        let io_err = |e| ImageWriteError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let encode_err = |e| ImageWriteError::Encode {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let img = frame.to_rgb_image().ok_or(ImageWriteError::NotRgb {
            width: frame.width(),
            height: frame.height(),
        })?;
        let format = image::ImageFormat::from_path(path).map_err(encode_err)?;

        let temp_path = path.with_extension("partial");
        if let Err(e) = img.save_with_format(&temp_path, format) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(encode_err(e));
        }
        std::fs::rename(&temp_path, path).map_err(io_err)
    }
}

impl Default for ImageFileWriter {
    fn default() -> Self {
        Self::new()
    }
}
