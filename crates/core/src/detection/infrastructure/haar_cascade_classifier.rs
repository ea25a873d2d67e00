use std::path::Path;

use image::GrayImage;
use opencv::{
    core::{self, Mat, Rect, Scalar, Size},
    objdetect,
    prelude::*,
};

use crate::detection::domain::cascade_classifier::{CascadeClassifier, DetectError, DetectionParams};
use crate::detection::domain::classifier_loader::{CascadeModel, ClassifierLoader, LoadError};
use crate::detection::infrastructure::model_resolver::ModelStore;
use crate::shared::constants::{
    HAAR_CASCADE_BASE_URL, HAAR_FRONTAL_ALT, HAAR_FRONTAL_ALT2, HAAR_FRONTAL_DEFAULT, HAAR_PROFILE,
};
use crate::shared::face_box::FaceBox;

/// Haar cascade file for a slot.
pub fn artifact_name(model: CascadeModel) -> &'static str {
    match model {
        CascadeModel::FrontalDefault => HAAR_FRONTAL_DEFAULT,
        CascadeModel::FrontalAlt => HAAR_FRONTAL_ALT,
        CascadeModel::FrontalAlt2 => HAAR_FRONTAL_ALT2,
        CascadeModel::Profile => HAAR_PROFILE,
    }
}

/// One OpenCV Haar cascade run through `detectMultiScale`.
pub struct HaarCascadeClassifier {
    inner: objdetect::CascadeClassifier,
}

// SAFETY: the classifier is owned by exactly one ensemble and only used
// from the thread that currently owns it.
unsafe impl Send for HaarCascadeClassifier {}

impl HaarCascadeClassifier {
    pub fn from_path(model: CascadeModel, path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::Missing {
                model,
                path: path.to_path_buf(),
            });
        }
        let corrupt = |message: String| LoadError::Corrupt {
            model,
            path: path.to_path_buf(),
            message,
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| corrupt("path is not valid UTF-8".into()))?;
        let inner =
            objdetect::CascadeClassifier::new(path_str).map_err(|e| corrupt(e.to_string()))?;
        if inner.empty().map_err(|e| corrupt(e.to_string()))? {
            return Err(corrupt("cascade file holds no stages".into()));
        }
        Ok(Self { inner })
    }
}

fn to_mat(gray: &GrayImage) -> opencv::Result<Mat> {
    let (width, height) = gray.dimensions();
    let mut mat = Mat::new_rows_cols_with_default(
        height as i32,
        width as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(gray.as_raw());
    Ok(mat)
}

impl CascadeClassifier for HaarCascadeClassifier {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceBox>, DetectError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        if gray.as_raw().len() != width as usize * height as usize {
            return Err(DetectError::InvalidImage { width, height });
        }

        let backend = |e: opencv::Error| DetectError::Backend(e.to_string());
        let mat = to_mat(gray).map_err(backend)?;
        let mut rects = core::Vector::<Rect>::new();
        let min = params.min_size as i32;
        self.inner
            .detect_multi_scale(
                &mat,
                &mut rects,
                params.scale_factor,
                params.min_neighbors as i32,
                0,
                Size::new(min, min),
                Size::default(),
            )
            .map_err(backend)?;

        Ok(rects
            .iter()
            .map(|r| FaceBox::new(r.x, r.y, r.width, r.height))
            .collect())
    }
}

/// Loads the four stock OpenCV Haar cascades through the model store.
pub struct HaarClassifierLoader {
    store: ModelStore,
}

impl HaarClassifierLoader {
    pub fn new(store: ModelStore) -> Self {
        Self { store }
    }
}

impl ClassifierLoader for HaarClassifierLoader {
    fn backend_name(&self) -> &'static str {
        "haar"
    }

    fn load(&self, model: CascadeModel) -> Result<Box<dyn CascadeClassifier>, LoadError> {
        let name = artifact_name(model);
        let url = format!("{HAAR_CASCADE_BASE_URL}/{name}");
        let path = self
            .store
            .locate(name, &url)
            .map_err(|e| LoadError::Resolve {
                model,
                message: e.to_string(),
            })?;
        Ok(Box::new(HaarCascadeClassifier::from_path(model, &path)?))
    }
}
