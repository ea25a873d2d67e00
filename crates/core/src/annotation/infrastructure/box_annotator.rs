use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::annotation::domain::frame_annotator::{AnnotateError, FrameAnnotator};
use crate::annotation::infrastructure::glyphs::{glyph, GLYPH_WIDTH};
use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: u32 = 3;
const LABEL_ORIGIN: (u32, u32) = (10, 10);

pub fn label_text(count: usize) -> String {
    format!("FACES: {count}")
}

/// Green box outlines plus a blue `FACES: n` label in the top-left corner.
pub struct BoxAnnotator;

impl BoxAnnotator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BoxAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAnnotator for BoxAnnotator {
    fn annotate(&self, frame: &mut Frame, boxes: &[FaceBox]) -> Result<(), AnnotateError> {
        let (width, height) = (frame.width(), frame.height());
        if frame.channels() != 3 {
            return Err(AnnotateError::Channels(frame.channels()));
        }
        let mut image = frame
            .to_rgb_image()
            .ok_or(AnnotateError::BufferMismatch { width, height })?;

        for b in boxes {
            if let Some(visible) = b.clipped(width, height) {
                draw_box(&mut image, &visible);
            }
        }
        draw_label(&mut image, &label_text(boxes.len()), LABEL_ORIGIN);

        frame.data_mut().copy_from_slice(image.as_raw());
        Ok(())
    }
}

/// Nested one-pixel outlines, growing inward.
fn draw_box(image: &mut RgbImage, b: &FaceBox) {
    for t in 0..BOX_THICKNESS {
        let (w, h) = (b.width - 2 * t, b.height - 2 * t);
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(b.x + t, b.y + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}

fn draw_label(image: &mut RgbImage, text: &str, origin: (u32, u32)) {
    let (mut x, y) = origin;
    for ch in text.chars() {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let px = x + col * LABEL_SCALE;
                    let py = y + row as u32 * LABEL_SCALE;
                    let cell = Rect::at(px as i32, py as i32).of_size(LABEL_SCALE, LABEL_SCALE);
                    draw_filled_rect_mut(image, cell, LABEL_COLOR);
                }
            }
        }
        x += (GLYPH_WIDTH + 1) * LABEL_SCALE;
    }
}
