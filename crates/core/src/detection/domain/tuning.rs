use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::detection::domain::cascade_classifier::{DetectionParams, ParamsError};
use crate::detection::domain::classifier_loader::CascadeModel;

/// A parameter set that failed validation, with its `pass.slot` location.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{location}: {source}")]
pub struct TuningError {
    pub location: String,
    pub source: ParamsError,
}

/// Per-slot parameters for one multi-classifier pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassTuning {
    pub frontal_default: DetectionParams,
    pub frontal_alt: DetectionParams,
    pub frontal_alt2: DetectionParams,
    pub profile: DetectionParams,
}

impl PassTuning {
    pub fn params_for(&self, model: CascadeModel) -> DetectionParams {
        match model {
            CascadeModel::FrontalDefault => self.frontal_default,
            CascadeModel::FrontalAlt => self.frontal_alt,
            CascadeModel::FrontalAlt2 => self.frontal_alt2,
            CascadeModel::Profile => self.profile,
        }
    }

    /// Stream accurate pass and single-image tier 1.
    pub const fn accurate() -> Self {
        Self {
            frontal_default: DetectionParams::new(1.08, 4, 30),
            frontal_alt: DetectionParams::new(1.08, 3, 30),
            frontal_alt2: DetectionParams::new(1.1, 4, 35),
            profile: DetectionParams::new(1.1, 3, 35),
        }
    }

    /// Single-image tier 2.
    pub const fn relaxed() -> Self {
        Self {
            frontal_default: DetectionParams::new(1.05, 3, 24),
            frontal_alt: DetectionParams::new(1.05, 2, 24),
            frontal_alt2: DetectionParams::new(1.05, 3, 24),
            profile: DetectionParams::new(1.05, 2, 24),
        }
    }

    /// Single-image tier 3.
    pub const fn loosest() -> Self {
        Self {
            frontal_default: DetectionParams::new(1.03, 2, 20),
            frontal_alt: DetectionParams::new(1.03, 1, 20),
            frontal_alt2: DetectionParams::new(1.03, 2, 20),
            profile: DetectionParams::new(1.03, 1, 20),
        }
    }

    fn validate(&self, pass: &str) -> Result<(), TuningError> {
        for model in CascadeModel::ALL {
            self.params_for(model)
                .validate()
                .map_err(|source| TuningError {
                    location: format!("{pass}.{model}"),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Parameter sets for every pass the ensemble can run.
///
/// When deserialized, each pass is laid over its own defaults, so a
/// settings file may name a single field of a single slot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleTuning {
    #[serde(deserialize_with = "fast_over_defaults")]
    pub fast: DetectionParams,
    #[serde(deserialize_with = "accurate_over_defaults")]
    pub accurate: PassTuning,
    #[serde(deserialize_with = "relaxed_over_defaults")]
    pub relaxed: PassTuning,
    #[serde(deserialize_with = "loosest_over_defaults")]
    pub loosest: PassTuning,
}

impl EnsembleTuning {
    pub fn validate(&self) -> Result<(), TuningError> {
        self.fast.validate().map_err(|source| TuningError {
            location: "fast".into(),
            source,
        })?;
        self.accurate.validate("accurate")?;
        self.relaxed.validate("relaxed")?;
        self.loosest.validate("loosest")
    }
}

impl Default for EnsembleTuning {
    fn default() -> Self {
        Self {
            fast: FAST_PARAMS,
            accurate: PassTuning::accurate(),
            relaxed: PassTuning::relaxed(),
            loosest: PassTuning::loosest(),
        }
    }
}

const FAST_PARAMS: DetectionParams = DetectionParams::new(1.1, 5, 50);

/// Any subset of a [`DetectionParams`].
#[derive(Default, Deserialize)]
#[serde(default)]
struct ParamsOverrides {
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
    min_size: Option<u32>,
    flipped: Option<bool>,
}

impl ParamsOverrides {
    fn apply(self, base: DetectionParams) -> DetectionParams {
        DetectionParams {
            scale_factor: self.scale_factor.unwrap_or(base.scale_factor),
            min_neighbors: self.min_neighbors.unwrap_or(base.min_neighbors),
            min_size: self.min_size.unwrap_or(base.min_size),
            flipped: self.flipped.unwrap_or(base.flipped),
        }
    }
}

/// Any subset of a [`PassTuning`], slot by slot.
#[derive(Default, Deserialize)]
#[serde(default)]
struct PassOverrides {
    frontal_default: ParamsOverrides,
    frontal_alt: ParamsOverrides,
    frontal_alt2: ParamsOverrides,
    profile: ParamsOverrides,
}

impl PassOverrides {
    fn apply(self, base: PassTuning) -> PassTuning {
        PassTuning {
            frontal_default: self.frontal_default.apply(base.frontal_default),
            frontal_alt: self.frontal_alt.apply(base.frontal_alt),
            frontal_alt2: self.frontal_alt2.apply(base.frontal_alt2),
            profile: self.profile.apply(base.profile),
        }
    }
}

fn fast_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<DetectionParams, D::Error> {
    Ok(ParamsOverrides::deserialize(d)?.apply(FAST_PARAMS))
}

fn accurate_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<PassTuning, D::Error> {
    Ok(PassOverrides::deserialize(d)?.apply(PassTuning::accurate()))
}

fn relaxed_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<PassTuning, D::Error> {
    Ok(PassOverrides::deserialize(d)?.apply(PassTuning::relaxed()))
}

fn loosest_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<PassTuning, D::Error> {
    Ok(PassOverrides::deserialize(d)?.apply(PassTuning::loosest()))
}
