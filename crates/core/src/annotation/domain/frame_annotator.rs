use thiserror::Error;

use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("cannot annotate a {0}-channel frame")]
    Channels(u8),
    #[error("frame buffer does not match {width}x{height}")]
    BufferMismatch { width: u32, height: u32 },
}

/// Draws the merged detections onto a frame in place. The caller owns
/// the frame and decides whether to annotate a copy.
pub trait FrameAnnotator: Send {
    fn annotate(&self, frame: &mut Frame, boxes: &[FaceBox]) -> Result<(), AnnotateError>;
}
