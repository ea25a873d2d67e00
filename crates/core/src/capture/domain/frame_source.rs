use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device {device} unavailable: {message}")]
    Unavailable { device: String, message: String },
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("capture source is closed")]
    Closed,
}

/// Successive color frames from a camera or stream.
///
/// A read error ends the detection session that owns the source.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Closes the underlying device. Further reads return
    /// [`CaptureError::Closed`].
    fn release(&mut self);
}
