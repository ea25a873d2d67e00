use image::GrayImage;

use crate::detection::domain::cascade_classifier::{CascadeClassifier, DetectionParams};
use crate::detection::domain::classifier_loader::{CascadeModel, ClassifierLoader, LoadError};
use crate::detection::domain::detection_batch::{candidate_count, DetectionBatch};
use crate::detection::domain::tuning::PassTuning;

const FRONTAL_MODELS: [CascadeModel; 3] = [
    CascadeModel::FrontalDefault,
    CascadeModel::FrontalAlt,
    CascadeModel::FrontalAlt2,
];

/// The primary frontal classifier plus whichever optional classifiers
/// loaded at setup.
pub struct CascadeEnsemble {
    frontal_default: Box<dyn CascadeClassifier>,
    frontal_alt: Option<Box<dyn CascadeClassifier>>,
    frontal_alt2: Option<Box<dyn CascadeClassifier>>,
    profile: Option<Box<dyn CascadeClassifier>>,
}

impl CascadeEnsemble {
    pub fn new(frontal_default: Box<dyn CascadeClassifier>) -> Self {
        Self {
            frontal_default,
            frontal_alt: None,
            frontal_alt2: None,
            profile: None,
        }
    }

    pub fn with_classifier(
        mut self,
        model: CascadeModel,
        classifier: Box<dyn CascadeClassifier>,
    ) -> Self {
        match model {
            CascadeModel::FrontalDefault => self.frontal_default = classifier,
            CascadeModel::FrontalAlt => self.frontal_alt = Some(classifier),
            CascadeModel::FrontalAlt2 => self.frontal_alt2 = Some(classifier),
            CascadeModel::Profile => self.profile = Some(classifier),
        }
        self
    }

    /// Loads every slot once. The primary slot is required; any other
    /// slot that fails is logged and left empty.
    pub fn load(loader: &dyn ClassifierLoader) -> Result<Self, LoadError> {
        let backend = loader.backend_name();
        let mut ensemble = Self::new(loader.load(CascadeModel::FrontalDefault)?);
        log::info!("Loaded {} classifier ({backend})", CascadeModel::FrontalDefault);

        for model in &CascadeModel::ALL[1..] {
            match loader.load(*model) {
                Ok(classifier) => {
                    log::info!("Loaded {model} classifier ({backend})");
                    ensemble = ensemble.with_classifier(*model, classifier);
                }
                Err(e) => log::debug!("{model} classifier not loaded: {e}"),
            }
        }

        let missing = ensemble.missing_models();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|m| m.to_string()).collect();
            log::warn!(
                "Running a reduced ensemble ({backend}): no {} classifier",
                names.join(", ")
            );
        }
        Ok(ensemble)
    }

    pub fn is_loaded(&self, model: CascadeModel) -> bool {
        match model {
            CascadeModel::FrontalDefault => true,
            CascadeModel::FrontalAlt => self.frontal_alt.is_some(),
            CascadeModel::FrontalAlt2 => self.frontal_alt2.is_some(),
            CascadeModel::Profile => self.profile.is_some(),
        }
    }

    pub fn loaded_models(&self) -> Vec<CascadeModel> {
        CascadeModel::ALL
            .into_iter()
            .filter(|m| self.is_loaded(*m))
            .collect()
    }

    /// Optional slots left empty at load.
    pub fn missing_models(&self) -> Vec<CascadeModel> {
        CascadeModel::ALL
            .into_iter()
            .filter(|m| !self.is_loaded(*m))
            .collect()
    }

    /// Primary classifier only.
    pub fn run_fast(&mut self, gray: &GrayImage, params: &DetectionParams) -> Vec<DetectionBatch> {
        self.run_one(CascadeModel::FrontalDefault, gray, params)
            .into_iter()
            .collect()
    }

    /// The three frontal classifiers in order; when none of them finds
    /// anything, the profile classifier on the image and on its mirror.
    pub fn run_accurate(&mut self, gray: &GrayImage, tuning: &PassTuning) -> Vec<DetectionBatch> {
        let mut batches: Vec<DetectionBatch> = FRONTAL_MODELS
            .iter()
            .filter_map(|model| self.run_one(*model, gray, &tuning.params_for(*model)))
            .collect();

        if candidate_count(&batches) == 0 && self.profile.is_some() {
            let params = tuning.profile;
            batches.extend(self.run_one(CascadeModel::Profile, gray, &params));
            batches.extend(self.run_mirrored(CascadeModel::Profile, gray, &params));
        }
        batches
    }

    fn classifier_mut(
        &mut self,
        model: CascadeModel,
    ) -> Option<&mut (dyn CascadeClassifier + 'static)> {
        match model {
            CascadeModel::FrontalDefault => Some(self.frontal_default.as_mut()),
            CascadeModel::FrontalAlt => self.frontal_alt.as_deref_mut(),
            CascadeModel::FrontalAlt2 => self.frontal_alt2.as_deref_mut(),
            CascadeModel::Profile => self.profile.as_deref_mut(),
        }
    }

    /// `None` when the slot is empty. A classifier error counts as an
    /// empty batch.
    fn run_one(
        &mut self,
        model: CascadeModel,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Option<DetectionBatch> {
        let classifier = self.classifier_mut(model)?;
        let boxes = match classifier.detect(gray, params) {
            Ok(boxes) => boxes,
            Err(e) => {
                log::warn!("{model} classifier failed, treating as no detections: {e}");
                Vec::new()
            }
        };
        log::debug!(
            "{model}{} found {} candidate(s)",
            if params.flipped { " (mirrored)" } else { "" },
            boxes.len()
        );
        Some(DetectionBatch {
            model,
            flipped: params.flipped,
            boxes,
        })
    }

    fn run_mirrored(
        &mut self,
        model: CascadeModel,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Option<DetectionBatch> {
        let mirrored = image::imageops::flip_horizontal(gray);
        let mut batch = self.run_one(model, &mirrored, &params.mirrored())?;
        let width = gray.width();
        for b in &mut batch.boxes {
            *b = b.unmirrored(width);
        }
        Some(batch)
    }
}
