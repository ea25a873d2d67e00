use std::io::{Cursor, ErrorKind};
use std::path::Path;

use image::GrayImage;

use crate::detection::domain::cascade_classifier::{CascadeClassifier, DetectError, DetectionParams};
use crate::detection::domain::classifier_loader::{CascadeModel, ClassifierLoader, LoadError};
use crate::detection::infrastructure::model_resolver::ModelStore;
use crate::shared::constants::{SEETA_MODEL_NAME, SEETA_MODEL_URL};
use crate::shared::face_box::FaceBox;

/// The funnel cascade refuses faces smaller than its 20 px window.
const MIN_FACE_SIZE: u32 = 20;
/// Score threshold contributed by each required neighbour.
const SCORE_PER_NEIGHBOR: f64 = 0.5;
const WINDOW_STEP: u32 = 4;

/// Frontal face classifier backed by the SeetaFace funnel-structured
/// cascade (`rustface`).
///
/// The model is parsed once at load; each call hands a clone to a fresh
/// detector, since detectors carry per-image state.
pub struct SeetaCascadeClassifier {
    model: rustface::Model,
}

impl SeetaCascadeClassifier {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, std::io::Error> {
        let model = rustface::read_model(Cursor::new(bytes))?;
        Ok(Self { model })
    }

    pub fn from_path(model: CascadeModel, path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LoadError::Missing {
                model,
                path: path.to_path_buf(),
            },
            _ => LoadError::Corrupt {
                model,
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;
        Self::from_bytes(&bytes).map_err(|e| LoadError::Corrupt {
            model,
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Maps cascade-style parameters onto the funnel detector's knobs:
/// pyramid factor is the reciprocal of the scale step, and each required
/// neighbour raises the score threshold.
fn seeta_settings(params: &DetectionParams) -> (u32, f32, f64) {
    let min_face = params.min_size.max(MIN_FACE_SIZE);
    let pyramid = (1.0 / params.scale_factor).clamp(0.5, 0.95) as f32;
    let score = params.min_neighbors as f64 * SCORE_PER_NEIGHBOR;
    (min_face, pyramid, score)
}

impl CascadeClassifier for SeetaCascadeClassifier {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceBox>, DetectError> {
        let (width, height) = gray.dimensions();
        let (min_face, pyramid, score) = seeta_settings(params);
        if width < min_face || height < min_face {
            return Ok(Vec::new());
        }
        if gray.as_raw().len() != width as usize * height as usize {
            return Err(DetectError::InvalidImage { width, height });
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(min_face);
        detector.set_score_thresh(score);
        detector.set_pyramid_scale_factor(pyramid);
        detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        Ok(faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                FaceBox::new(bbox.x(), bbox.y(), bbox.width() as i32, bbox.height() as i32)
                    .clipped(width, height)
            })
            .collect())
    }
}

/// SeetaFace ships a single frontal model, so only the primary slot loads.
pub struct SeetaClassifierLoader {
    store: ModelStore,
}

impl SeetaClassifierLoader {
    pub fn new(store: ModelStore) -> Self {
        Self { store }
    }
}

impl ClassifierLoader for SeetaClassifierLoader {
    fn backend_name(&self) -> &'static str {
        "seeta"
    }

    fn load(&self, model: CascadeModel) -> Result<Box<dyn CascadeClassifier>, LoadError> {
        if model != CascadeModel::FrontalDefault {
            return Err(LoadError::Unsupported {
                backend: self.backend_name(),
                model,
            });
        }
        let path = self
            .store
            .locate(SEETA_MODEL_NAME, SEETA_MODEL_URL)
            .map_err(|e| LoadError::Resolve {
                model,
                message: e.to_string(),
            })?;
        Ok(Box::new(SeetaCascadeClassifier::from_path(model, &path)?))
    }
}
